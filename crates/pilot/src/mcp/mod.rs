//! MCP (Model Context Protocol) client support
//!
//! Tool providers are MCP servers, reached over stdio or HTTP.
//!
//! ```text
//! ┌─────────────────┐ ┌─────────────────┐
//! │  McpClient      │ │  McpClient      │
//! │  (search)       │ │  (fabric)       │
//! └────────┬────────┘ └────────┬────────┘
//!          │                   │
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  StdioTransport │ │  HttpTransport  │
//! └────────┬────────┘ └────────┬────────┘
//!          │                   │
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  MCP Server     │ │  MCP Server     │
//! │  (uvx ...)      │ │  (https://...)  │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use pilot::mcp::{McpClient, ProviderConfig};
//!
//! let config = ProviderConfig::stdio("search", "uvx").with_args(["browser-use[cli]", "--mcp"]);
//! let client = McpClient::connect(&config).await?;
//! for tool in client.list_tools().await? {
//!     println!("{}", tool.name);
//! }
//! client.close().await?;
//! ```

pub mod client;
pub mod config;
mod error;
pub mod transport;

pub use client::{McpClient, McpToolInfo, MCP_PROTOCOL_VERSION};
pub use config::{expand_env_string, ProviderConfig, TransportDescriptor};
pub use error::McpError;
pub use transport::{HttpTransport, McpTransport, StdioTransport};
