//! Agent state management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AgentError, ToolError};
use crate::tools::{ToolCallRequest, ToolCallResult};

/// Configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of tool calls in one run
    pub max_steps: usize,
    /// System prompt template; `{now}` is replaced with the current time
    pub system_prompt: Option<String>,
    /// Issue the calls of one planning turn concurrently
    pub concurrent_tool_calls: bool,
    /// Provider error codes that end the run instead of being observed
    pub fatal_error_codes: Vec<i64>,
    /// Tools hidden from the model
    pub disallowed_tools: Vec<String>,
    /// Tools the model can see but whose calls are refused
    pub denied_tools: Vec<String>,
    /// Default per-call timeout, in seconds
    pub call_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            system_prompt: None,
            concurrent_tool_calls: false,
            fatal_error_codes: Vec::new(),
            disallowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            call_timeout_secs: 120,
        }
    }
}

impl AgentConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_concurrent_tool_calls(mut self, concurrent: bool) -> Self {
        self.concurrent_tool_calls = concurrent;
        self
    }

    pub fn with_fatal_error_codes(mut self, codes: Vec<i64>) -> Self {
        self.fatal_error_codes = codes;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// One executed tool call
#[derive(Debug, Clone)]
pub struct AgentStep {
    /// 1-based position in the transcript
    pub number: usize,
    /// Planning turn that requested the call (1-based)
    pub turn: usize,
    pub request: ToolCallRequest,
    pub outcome: Result<ToolCallResult, ToolError>,
}

impl AgentStep {
    /// Whether the call went through and the provider did not flag an error
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, Ok(result) if !result.is_error)
    }

    /// Text fed back to the model for this step
    pub fn observation(&self) -> String {
        match &self.outcome {
            Ok(result) if result.is_error => format!("Error: {}", result.to_observation_text()),
            Ok(result) => result.to_observation_text(),
            Err(e) => format!("Error: {}", e),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The model produced a final answer
    Answer(String),
    /// The step budget ran out before an answer
    Exhausted { max_steps: usize },
    Cancelled,
    Failed(AgentError),
}

impl AgentOutcome {
    pub fn is_answer(&self) -> bool {
        matches!(self, AgentOutcome::Answer(_))
    }
}

/// Record of one agent run
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub system_prompt: String,
    pub objective: String,
    pub max_steps: usize,
    /// Append-only; never longer than `max_steps`
    pub transcript: Vec<AgentStep>,
    /// Number of planning turns sent to the model
    pub turns: usize,
    pub outcome: AgentOutcome,
}

impl AgentRun {
    pub(crate) fn new(system_prompt: String, objective: String, max_steps: usize) -> Self {
        Self {
            system_prompt,
            objective,
            max_steps,
            transcript: Vec::new(),
            turns: 0,
            outcome: AgentOutcome::Cancelled,
        }
    }

    pub fn remaining_steps(&self) -> usize {
        self.max_steps.saturating_sub(self.transcript.len())
    }

    pub(crate) fn push_step(&mut self, request: ToolCallRequest, outcome: Result<ToolCallResult, ToolError>) {
        debug_assert!(self.transcript.len() < self.max_steps);
        let number = self.transcript.len() + 1;
        self.transcript.push(AgentStep {
            number,
            turn: self.turns,
            request,
            outcome,
        });
    }

    /// The final answer, if the run produced one
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            AgentOutcome::Answer(answer) => Some(answer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn step(outcome: Result<ToolCallResult, ToolError>) -> AgentStep {
        AgentStep {
            number: 1,
            turn: 1,
            request: ToolCallRequest::new("web_search", Map::new()),
            outcome,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
        assert!(!config.concurrent_tool_calls);
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: AgentConfig = toml::from_str("max_steps = 5\nfatal_error_codes = [-32001]").unwrap();
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.fatal_error_codes, vec![-32001]);
        assert_eq!(config.call_timeout_secs, 120);
    }

    #[test]
    fn test_step_observation() {
        assert_eq!(step(Ok(ToolCallResult::text("3 hits"))).observation(), "3 hits");
        assert!(step(Ok(ToolCallResult::text("3 hits"))).is_success());

        let flagged = step(Ok(ToolCallResult::error_text("rate limited")));
        assert!(!flagged.is_success());
        assert_eq!(flagged.observation(), "Error: rate limited");

        let missing = step(Err(ToolError::ToolNotFound("ghost_tool".to_string())));
        assert_eq!(missing.observation(), "Error: tool not found: ghost_tool");
    }

    #[test]
    fn test_run_numbers_steps() {
        let mut run = AgentRun::new("sys".to_string(), "goal".to_string(), 3);
        run.turns = 1;
        run.push_step(ToolCallRequest::new("a", Map::new()), Ok(ToolCallResult::text("x")));
        run.push_step(ToolCallRequest::new("b", Map::new()), Ok(ToolCallResult::text("y")));
        assert_eq!(run.transcript[1].number, 2);
        assert_eq!(run.transcript[1].turn, 1);
        assert_eq!(run.remaining_steps(), 1);
        assert!(run.answer().is_none());
    }
}
