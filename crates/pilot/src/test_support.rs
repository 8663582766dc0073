//! In-process fakes shared by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::{Decision, DecisionRequest, LanguageModel, RequestedCall};
use crate::mcp::{McpError, McpToolInfo};
use crate::tools::{ProviderSession, ToolCallResult, ToolRegistry};

/// Provider session that answers every call with a canned text result
pub struct MockSession {
    tools: Vec<McpToolInfo>,
    calls: Mutex<Vec<(String, Value)>>,
    discovery_delay: Option<Duration>,
    call_delay: Option<Duration>,
    discovery_error: Option<McpError>,
    call_error: Option<McpError>,
    flagged: bool,
    closed: AtomicBool,
}

impl MockSession {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|name| McpToolInfo {
                    name: name.to_string(),
                    description: Some(format!("{} tool", name)),
                    input_schema: serde_json::json!({"type": "object", "properties": {}}),
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
            discovery_delay: None,
            call_delay: None,
            discovery_error: None,
            call_error: None,
            flagged: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = Some(delay);
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub fn failing_discovery(mut self, error: McpError) -> Self {
        self.discovery_error = Some(error);
        self
    }

    pub fn failing_calls(mut self, error: McpError) -> Self {
        self.call_error = Some(error);
        self
    }

    /// Results come back with `isError` set
    pub fn flagging_errors(mut self) -> Self {
        self.flagged = true;
        self
    }

    /// Calls received so far, as (tool, arguments)
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSession for MockSession {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        if let Some(delay) = self.discovery_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.discovery_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.tools.clone()),
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolCallResult, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), Value::Object(arguments.clone())));

        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = &self.call_error {
            return Err(e.clone());
        }

        let text = format!("{} ok: {}", name, Value::Object(arguments.clone()));
        Ok(if self.flagged {
            ToolCallResult::error_text(text)
        } else {
            ToolCallResult::text(text)
        })
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry of mock providers, registered in the given order
pub async fn registry_with(providers: &[(&str, &[&str])]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (name, tools) in providers {
        registry
            .register_session(name, Arc::new(MockSession::new(tools)), Duration::from_secs(1))
            .await
            .unwrap();
    }
    registry
}

/// Model that replays a fixed list of decisions
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Decision, String>>>,
    repeat: Option<Decision>,
    delay: Option<Duration>,
    /// Observations visible at each planning turn
    seen: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Decision>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            repeat: None,
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns the same decision forever
    pub fn repeating(decision: Decision) -> Self {
        Self {
            repeat: Some(decision),
            ..Self::new(Vec::new())
        }
    }

    pub fn failing(message: &str) -> Self {
        let model = Self::new(Vec::new());
        model.script.lock().unwrap().push_back(Err(message.to_string()));
        model
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn turns(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<Vec<String>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision> {
        self.seen
            .lock()
            .unwrap()
            .push(request.transcript.iter().map(|s| s.observation()).collect());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(decision)) => Ok(decision),
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .repeat
                .clone()
                .ok_or_else(|| anyhow!("script exhausted")),
        }
    }
}

/// One tool call with JSON arguments
pub fn call(name: &str, arguments: Value) -> Decision {
    Decision::ToolCalls(vec![RequestedCall::new(name, arguments)])
}

pub fn batch(calls: &[(&str, Value)]) -> Decision {
    Decision::ToolCalls(
        calls
            .iter()
            .map(|(name, args)| RequestedCall::new(*name, args.clone()))
            .collect(),
    )
}
