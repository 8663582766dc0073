//! pilot: a bounded-step agent that plans with a language model and acts
//! through tools served by MCP providers.
//!
//! Control flows from the [`agent::AgentLoop`] through the
//! [`tools::ToolDispatcher`] and its [`middleware::MiddlewareChain`] to the
//! provider that [`tools::ToolRegistry`] resolved the tool to.

pub mod agent;
pub mod config;
pub mod error;
pub mod mcp;
pub mod middleware;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use error::{AgentError, ToolError};
