use serde_json::Value;
use thiserror::Error;

/// Errors raised while talking to an MCP server
#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("MCP server closed connection")]
    Closed,

    #[error("invalid message from MCP server: {0}")]
    Protocol(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("MCP client not initialized")]
    NotInitialized,
}

impl McpError {
    /// JSON-RPC error code, if the server sent one
    pub fn code(&self) -> Option<i64> {
        match self {
            McpError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// JSON-RPC error data, if the server sent any
    pub fn data(&self) -> Option<&Value> {
        match self {
            McpError::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(err.to_string())
    }
}
