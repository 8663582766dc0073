//! Tool system for pilot
//!
//! Tools are discovered from MCP providers, held in a [`ToolRegistry`] and
//! invoked through a [`ToolDispatcher`], which runs every call through the
//! middleware chain before it reaches the owning provider.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::ToolDispatcher;
pub use registry::{ToolProvider, ToolRegistry};

use async_trait::async_trait;
use pilot_llm::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::{McpError, McpToolInfo};

/// A tool advertised by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub input_schema: Value,
    /// Name of the provider that owns the tool
    pub provider: String,
}

impl Tool {
    pub fn from_info(provider: &str, info: McpToolInfo) -> Self {
        let input_schema = if info.input_schema.is_null() {
            serde_json::json!({"type": "object", "properties": {}})
        } else {
            info.input_schema
        };

        Self {
            name: info.name,
            description: info.description.unwrap_or_default(),
            input_schema,
            provider: provider.to_string(),
        }
    }

    /// Function definition in the form the chat API expects
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.name, &self.description, self.input_schema.clone())
    }
}

/// A single tool invocation chosen by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
    /// Step number this call will occupy in the transcript (1-based)
    pub step: usize,
    /// Identifier linking the call to its result in the conversation
    pub call_id: String,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            step: 0,
            call_id: String::new(),
        }
    }
}

/// One content block of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Unsupported,
}

/// Result of a `tools/call` request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Flatten the content blocks into the text the model sees
    pub fn to_observation_text(&self) -> String {
        let parts: Vec<String> = self
            .content
            .iter()
            .filter_map(|content| match content {
                ToolContent::Text { text } => Some(text.clone()),
                ToolContent::Image { .. } => Some("[Image data]".to_string()),
                ToolContent::Resource { resource } => {
                    let uri = resource.get("uri").and_then(Value::as_str);
                    match resource.get("text").and_then(Value::as_str) {
                        Some(text) => Some(text.to_string()),
                        None => Some(format!("[Resource: {}]", uri.unwrap_or("unknown"))),
                    }
                }
                ToolContent::Unsupported => None,
            })
            .collect();

        parts.join("\n")
    }
}

/// A live connection to a provider
///
/// Implemented by [`crate::mcp::McpClient`]; tests substitute in-process fakes.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolCallResult, McpError>;

    async fn close(&self) -> Result<(), McpError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_from_info_defaults_schema() {
        let info = McpToolInfo {
            name: "web_search".to_string(),
            description: None,
            input_schema: Value::Null,
        };
        let tool = Tool::from_info("search", info);
        assert_eq!(tool.provider, "search");
        assert_eq!(tool.input_schema["type"], "object");

        let def = tool.to_definition();
        assert_eq!(def.function.name, "web_search");
    }

    #[test]
    fn test_result_parses_mixed_content() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "resource", "resource": {"uri": "file:///tmp/a.txt"}},
                {"type": "audio", "data": "zzz"}
            ],
            "isError": true
        }))
        .unwrap();

        assert!(result.is_error);
        assert_eq!(result.content.len(), 4);
        assert_eq!(
            result.to_observation_text(),
            "first\n[Image data]\n[Resource: file:///tmp/a.txt]"
        );
    }

    #[test]
    fn test_result_without_is_error() {
        let result: ToolCallResult =
            serde_json::from_value(json!({"content": [{"type": "text", "text": "ok"}]})).unwrap();
        assert!(!result.is_error);
        assert_eq!(result, ToolCallResult::text("ok"));
    }
}
