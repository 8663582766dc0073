//! Agent loop - the plan/act cycle

use std::sync::Arc;

use chrono::Local;
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::model::{Decision, DecisionRequest, LanguageModel, RequestedCall};
use super::prompt::render_system_prompt;
use super::state::{AgentConfig, AgentOutcome, AgentRun};
use crate::error::{AgentError, ToolError};
use crate::tools::{Tool, ToolCallRequest, ToolCallResult, ToolDispatcher};

/// A call ready for dispatch, or the reason it cannot be dispatched
type PreparedCall = (ToolCallRequest, Option<ToolError>);

/// The agent loop: plans with the model, acts through the dispatcher
pub struct AgentLoop {
    model: Arc<dyn LanguageModel>,
    dispatcher: ToolDispatcher,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn LanguageModel>, dispatcher: ToolDispatcher, config: AgentConfig) -> Self {
        Self {
            model,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run until the model answers, the step budget is spent, a fatal error
    /// occurs or `cancel` fires
    #[instrument(skip_all, fields(max_steps = self.config.max_steps))]
    pub async fn run(&self, objective: &str, cancel: CancellationToken) -> AgentRun {
        let tools = self.dispatcher.registry().list_tools();
        let system_prompt =
            render_system_prompt(self.config.system_prompt.as_deref(), &tools, Local::now());

        info!(objective_len = objective.len(), tools = tools.len(), "Starting agent run");

        let mut run = AgentRun::new(system_prompt, objective.to_string(), self.config.max_steps);
        run.outcome = self.drive(&mut run, &tools, &cancel).await;

        match &run.outcome {
            AgentOutcome::Answer(_) => {
                info!(steps = run.transcript.len(), turns = run.turns, "Agent produced an answer")
            }
            AgentOutcome::Exhausted { max_steps } => {
                warn!(max_steps, turns = run.turns, "Step budget exhausted")
            }
            AgentOutcome::Cancelled => info!(steps = run.transcript.len(), "Agent run cancelled"),
            AgentOutcome::Failed(e) => warn!(error = %e, "Agent run failed"),
        }

        run
    }

    async fn drive(&self, run: &mut AgentRun, tools: &[Tool], cancel: &CancellationToken) -> AgentOutcome {
        loop {
            if run.remaining_steps() == 0 {
                return AgentOutcome::Exhausted {
                    max_steps: run.max_steps,
                };
            }
            if cancel.is_cancelled() {
                return AgentOutcome::Cancelled;
            }

            run.turns += 1;
            debug!(turn = run.turns, steps = run.transcript.len(), "Planning");

            let request = DecisionRequest {
                system_prompt: &run.system_prompt,
                objective: &run.objective,
                transcript: &run.transcript,
                tools,
            };

            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => return AgentOutcome::Cancelled,
                decision = self.model.decide(request) => decision,
            };

            let mut calls = match decision {
                Ok(Decision::FinalAnswer(answer)) => return AgentOutcome::Answer(answer),
                Ok(Decision::ToolCalls(calls)) if calls.is_empty() => {
                    return AgentOutcome::Failed(AgentError::Model(
                        "model returned an empty list of tool calls".to_string(),
                    ))
                }
                Ok(Decision::ToolCalls(calls)) => calls,
                Err(e) => return AgentOutcome::Failed(AgentError::Model(format!("{:#}", e))),
            };

            let remaining = run.remaining_steps();
            if calls.len() > remaining {
                warn!(
                    requested = calls.len(),
                    remaining, "Batch exceeds step budget, dropping the calls that do not fit"
                );
                calls.truncate(remaining);
            }

            let first_step = run.transcript.len() + 1;
            let prepared: Vec<PreparedCall> = calls
                .into_iter()
                .enumerate()
                .map(|(i, call)| prepare_call(call, first_step + i))
                .collect();

            let stop = if self.config.concurrent_tool_calls {
                self.act_concurrently(run, prepared, cancel).await
            } else {
                self.act_sequentially(run, prepared, cancel).await
            };

            if let Some(outcome) = stop {
                return outcome;
            }
        }
    }

    async fn act_sequentially(
        &self,
        run: &mut AgentRun,
        prepared: Vec<PreparedCall>,
        cancel: &CancellationToken,
    ) -> Option<AgentOutcome> {
        for (request, invalid) in prepared {
            if cancel.is_cancelled() {
                return Some(AgentOutcome::Cancelled);
            }

            let outcome = self.execute(&request, invalid).await;

            // A call that finished after cancellation is not recorded
            if cancel.is_cancelled() {
                return Some(AgentOutcome::Cancelled);
            }
            if let Some(stop) = self.record(run, request, outcome) {
                return Some(stop);
            }
        }
        None
    }

    async fn act_concurrently(
        &self,
        run: &mut AgentRun,
        prepared: Vec<PreparedCall>,
        cancel: &CancellationToken,
    ) -> Option<AgentOutcome> {
        if cancel.is_cancelled() {
            return Some(AgentOutcome::Cancelled);
        }

        let outcomes = join_all(
            prepared
                .iter()
                .map(|(request, invalid)| self.execute(request, invalid.clone())),
        )
        .await;

        if cancel.is_cancelled() {
            return Some(AgentOutcome::Cancelled);
        }

        // join_all keeps input order, so the transcript follows the model's order
        for ((request, _), outcome) in prepared.into_iter().zip(outcomes) {
            if let Some(stop) = self.record(run, request, outcome) {
                return Some(stop);
            }
        }
        None
    }

    async fn execute(
        &self,
        request: &ToolCallRequest,
        invalid: Option<ToolError>,
    ) -> Result<ToolCallResult, ToolError> {
        match invalid {
            Some(e) => Err(e),
            None => self.dispatcher.dispatch(request.clone()).await,
        }
    }

    /// Append a step; returns the terminal outcome if the error is fatal
    fn record(
        &self,
        run: &mut AgentRun,
        request: ToolCallRequest,
        outcome: Result<ToolCallResult, ToolError>,
    ) -> Option<AgentOutcome> {
        let fatal = match &outcome {
            Ok(result) => {
                debug!(tool = %request.name, step = request.step, is_error = result.is_error, "Tool call returned");
                None
            }
            Err(e) if e.is_fatal(&self.config.fatal_error_codes) => {
                warn!(tool = %request.name, step = request.step, error = %e, "Fatal tool error");
                Some(e.clone())
            }
            Err(e) => {
                info!(tool = %request.name, step = request.step, error = %e, "Tool call failed, reporting to model");
                None
            }
        };

        run.push_step(request, outcome);
        fatal.map(|e| AgentOutcome::Failed(AgentError::Tool(e)))
    }
}

/// Turn a model-requested call into a dispatchable request
///
/// Missing arguments count as `{}`; any other non-object is rejected without
/// dispatch.
fn prepare_call(call: RequestedCall, step: usize) -> PreparedCall {
    let call_id = if call.id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        call.id
    };

    let (arguments, invalid) = match call.arguments {
        Value::Object(map) => (map, None),
        Value::Null => (Map::new(), None),
        other => {
            let kind = match other {
                Value::String(_) => "a string",
                Value::Array(_) => "an array",
                Value::Number(_) => "a number",
                _ => "a boolean",
            };
            let error = ToolError::InvalidArguments {
                tool: call.name.clone(),
                message: format!("arguments must be a JSON object, got {}", kind),
            };
            (Map::new(), Some(error))
        }
    };

    let request = ToolCallRequest {
        name: call.name,
        arguments,
        step,
        call_id,
    };
    (request, invalid)
}
