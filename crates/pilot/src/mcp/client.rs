//! MCP client implementation
//!
//! Implements the Model Context Protocol client for communication with MCP servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::config::{ProviderConfig, TransportDescriptor};
use super::error::McpError;
use super::transport::{HttpTransport, JsonRpcRequest, McpTransport, StdioTransport};
use crate::tools::{ProviderSession, ToolCallResult};

/// MCP protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client info for initialization
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "pilot".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server info returned during initialization
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Initialize result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ServerInfo,
}

/// MCP Tool definition from server
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Tool list result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    tools: Vec<McpToolInfo>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// MCP Client
pub struct McpClient {
    server: String,
    transport: Mutex<Box<dyn McpTransport>>,
    request_id: AtomicU64,
    initialized: AtomicBool,
}

impl McpClient {
    /// Create a new MCP client with the given transport
    pub fn new(server: impl Into<String>, transport: Box<dyn McpTransport>) -> Self {
        Self {
            server: server.into(),
            transport: Mutex::new(transport),
            request_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
        }
    }

    /// Open the configured transport and run the initialize handshake
    pub async fn connect(config: &ProviderConfig) -> Result<Self, McpError> {
        let transport: Box<dyn McpTransport> = match config
            .transport()
            .map_err(|e| McpError::Transport(e.to_string()))?
        {
            TransportDescriptor::Stdio { command, args } => Box::new(StdioTransport::spawn(
                &config.name,
                &command,
                &args,
                &config.env,
                config.cwd.as_deref(),
            )?),
            TransportDescriptor::Http { url } => Box::new(HttpTransport::new(url, &config.headers)?),
        };

        let client = Self::new(config.name.clone(), transport);
        let result = client.initialize().await?;
        info!(
            "MCP server {} initialized: {} v{}",
            config.name,
            result.server_info.name,
            result.server_info.version.as_deref().unwrap_or("unknown")
        );

        Ok(client)
    }

    /// Name of the configured server
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Get the next request ID
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and get the typed result
    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, McpError> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);

        // Holding the lock keeps request/response pairs on stdio in order
        let transport = self.transport.lock().await;
        if !transport.is_connected() {
            return Err(McpError::Closed);
        }
        let response = transport.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(error.into());
        }

        let result = response
            .result
            .ok_or_else(|| McpError::Protocol("MCP response missing result".into()))?;
        Ok(serde_json::from_value(result)?)
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    /// Initialize the connection with the MCP server
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": ClientInfo::default()
        });

        let result: InitializeResult = self.request("initialize", Some(params)).await?;

        {
            let transport = self.transport.lock().await;
            transport
                .send_notification("notifications/initialized", None)
                .await?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// List available tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(result.tools);

            match result.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.server, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolCallResult, McpError> {
        self.ensure_initialized()?;

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        self.request("tools/call", Some(params)).await
    }

    /// Ping the server
    pub async fn ping(&self) -> Result<(), McpError> {
        self.ensure_initialized()?;
        let _: Value = self.request("ping", None).await?;
        Ok(())
    }

    /// Close the connection
    pub async fn close(&self) -> Result<(), McpError> {
        self.initialized.store(false, Ordering::SeqCst);
        let transport = self.transport.lock().await;
        transport.close().await
    }
}

#[async_trait]
impl ProviderSession for McpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        McpClient::list_tools(self).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolCallResult, McpError> {
        McpClient::call_tool(self, name, arguments).await
    }

    async fn close(&self) -> Result<(), McpError> {
        McpClient::close(self).await
    }
}
