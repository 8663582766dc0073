//! pilot-llm: chat-completions client used by the pilot agent
//!
//! Provides:
//! - Model endpoint configuration
//! - OpenAI-compatible chat client with tool definitions and tool calls

pub mod config;
pub mod openai;

pub use config::LlmConfig;
pub use openai::{
    ChatClient, ChatMessageWithTools, ChatOptions, ChatResponse, FunctionCall,
    FunctionDefinition, Role, ToolCall, ToolDefinition, Usage,
};
