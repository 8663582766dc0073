//! Language model seam for the agent loop

use anyhow::{Context, Result};
use async_trait::async_trait;
use pilot_llm::{
    ChatClient, ChatMessageWithTools, ChatOptions, FunctionCall, LlmConfig, ToolCall,
    ToolDefinition,
};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use super::state::AgentStep;
use crate::tools::Tool;

/// Everything the model sees when planning
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub system_prompt: &'a str,
    pub objective: &'a str,
    pub transcript: &'a [AgentStep],
    pub tools: &'a [Tool],
}

/// A tool call as requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedCall {
    /// Model-assigned id; may be empty
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl RequestedCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            arguments,
        }
    }
}

/// The model's choice for one planning turn
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    FinalAnswer(String),
    /// Calls to execute, in the order the model listed them
    ToolCalls(Vec<RequestedCall>),
}

/// Something that can plan the next move of an agent run
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision>;
}

/// [`LanguageModel`] backed by an OpenAI-compatible chat endpoint
pub struct OpenAiModel {
    client: ChatClient,
    model: String,
}

impl OpenAiModel {
    pub fn new(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = ChatClient::from_config(config)?;
        Ok(Self::new(client, config.model.clone()))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision> {
        let messages = build_messages(&request);
        let tool_defs: Vec<ToolDefinition> = request.tools.iter().map(Tool::to_definition).collect();

        let response = self
            .client
            .chat_with_tools(&self.model, &messages, Some(&tool_defs), Some(ChatOptions::default()))
            .await
            .with_context(|| format!("Chat request to model {} failed", self.model))?;

        if let Some(usage) = &response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Model usage"
            );
        }

        Ok(interpret_message(response.message, request.tools))
    }
}

/// Rebuild the conversation from the transcript
///
/// Each planning turn becomes one assistant message carrying its tool calls,
/// followed by one tool message per executed call.
pub(crate) fn build_messages(request: &DecisionRequest<'_>) -> Vec<ChatMessageWithTools> {
    let mut messages = vec![
        ChatMessageWithTools::system(request.system_prompt),
        ChatMessageWithTools::user(request.objective),
    ];

    for turn in request.transcript.chunk_by(|a, b| a.turn == b.turn) {
        let calls = turn
            .iter()
            .map(|step| ToolCall {
                id: step.request.call_id.clone(),
                function: FunctionCall {
                    name: step.request.name.clone(),
                    arguments: Value::Object(step.request.arguments.clone()),
                },
            })
            .collect();
        messages.push(ChatMessageWithTools::assistant("", calls));

        for step in turn {
            messages.push(ChatMessageWithTools::tool_result(
                step.request.call_id.clone(),
                step.observation(),
            ));
        }
    }

    messages
}

/// Turn the model's reply into a decision
///
/// Native tool calls win. Otherwise the content is searched for JSON tool
/// calls naming known tools, for models that write calls as text.
pub(crate) fn interpret_message(message: ChatMessageWithTools, tools: &[Tool]) -> Decision {
    if let Some(calls) = message.tool_calls.filter(|c| !c.is_empty()) {
        return Decision::ToolCalls(
            calls
                .into_iter()
                .map(|c| RequestedCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect(),
        );
    }

    let known: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    if let Some(calls) = parse_json_tool_calls(&message.content) {
        let calls: Vec<RequestedCall> = calls
            .into_iter()
            .filter(|c| known.contains(c.name.as_str()))
            .collect();
        if !calls.is_empty() {
            debug!(count = calls.len(), "Parsed tool calls from content JSON");
            return Decision::ToolCalls(calls);
        }
    }

    Decision::FinalAnswer(message.content)
}

#[derive(serde::Deserialize)]
struct ToolCallJson {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl ToolCallJson {
    fn into_call(self) -> Option<RequestedCall> {
        if self.name.is_empty() {
            return None;
        }
        let arguments = if self.arguments.is_null() {
            Value::Object(Default::default())
        } else {
            self.arguments
        };
        Some(RequestedCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            arguments,
        })
    }
}

/// Parse JSON tool calls from content text
///
/// Supports:
/// - Raw JSON: `{"name": "tool_name", "arguments": {...}}`
/// - Markdown code blocks: ```json\n{"name": ...}\n```
/// - Arrays of calls, or several objects embedded in prose
fn parse_json_tool_calls(content: &str) -> Option<Vec<RequestedCall>> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    let json_content = extract_json_from_markdown(content).unwrap_or(content);

    if let Ok(single) = serde_json::from_str::<ToolCallJson>(json_content) {
        return single.into_call().map(|c| vec![c]);
    }

    if let Ok(many) = serde_json::from_str::<Vec<ToolCallJson>>(json_content) {
        let calls: Vec<_> = many.into_iter().filter_map(ToolCallJson::into_call).collect();
        return (!calls.is_empty()).then_some(calls);
    }

    extract_json_objects(content)
}

/// Extract JSON content from markdown code blocks
fn extract_json_from_markdown(content: &str) -> Option<&str> {
    let patterns = ["```json\n", "```JSON\n", "```\n"];

    for pattern in patterns {
        if let Some(start) = content.find(pattern) {
            let json_start = start + pattern.len();
            if let Some(end) = content[json_start..].find("```") {
                return Some(content[json_start..json_start + end].trim());
            }
        }
    }

    None
}

/// Find top-level `{...}` spans in prose that parse as tool calls
fn extract_json_objects(content: &str) -> Option<Vec<RequestedCall>> {
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(parsed) = serde_json::from_str::<ToolCallJson>(&content[s..=i]) {
                            calls.extend(parsed.into_call());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    (!calls.is_empty()).then_some(calls)
}
