//! Error taxonomy for tool dispatch and agent runs

use serde_json::Value;
use thiserror::Error;

/// Failure of a single tool call or of provider setup
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Provider could not be started, connected or discovered in time
    #[error("provider '{provider}' is unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool '{tool}' is ambiguous, exposed by providers: {}", .providers.join(", "))]
    AmbiguousTool { tool: String, providers: Vec<String> },

    #[error("call to tool '{tool}' on provider '{provider}' failed: {message}")]
    ProviderCallFailed {
        provider: String,
        tool: String,
        message: String,
        code: Option<i64>,
        data: Option<Value>,
    },

    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// A middleware refused the call
    #[error("call to tool '{tool}' was rejected: {reason}")]
    Rejected { tool: String, reason: String },
}

impl ToolError {
    /// Whether this error ends the run instead of becoming an observation.
    ///
    /// Provider unavailability is always fatal. A provider call failure is
    /// fatal only when its error code is listed in `fatal_codes`.
    pub fn is_fatal(&self, fatal_codes: &[i64]) -> bool {
        match self {
            ToolError::ProviderUnavailable { .. } => true,
            ToolError::ProviderCallFailed { code: Some(code), .. } => fatal_codes.contains(code),
            _ => false,
        }
    }
}

/// Failure that aborts an agent run
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("model request failed: {0}")]
    Model(String),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_failed(code: Option<i64>) -> ToolError {
        ToolError::ProviderCallFailed {
            provider: "fabric".to_string(),
            tool: "get_summaries".to_string(),
            message: "boom".to_string(),
            code,
            data: None,
        }
    }

    #[test]
    fn test_fatal_classification() {
        let unavailable = ToolError::ProviderUnavailable {
            provider: "search".to_string(),
            reason: "spawn failed".to_string(),
        };
        assert!(unavailable.is_fatal(&[]));
        assert!(!ToolError::ToolNotFound("ghost_tool".to_string()).is_fatal(&[]));
        assert!(!call_failed(Some(-32000)).is_fatal(&[]));
        assert!(call_failed(Some(-32000)).is_fatal(&[-32000]));
        assert!(!call_failed(None).is_fatal(&[-32000]));
    }

    #[test]
    fn test_ambiguous_message_lists_providers() {
        let err = ToolError::AmbiguousTool {
            tool: "search".to_string(),
            providers: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "tool 'search' is ambiguous, exposed by providers: a, b");
    }
}
