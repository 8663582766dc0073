//! Agent framework for objective-driven tool use
//!
//! Implements a bounded plan/act loop: the model plans, tools act, and the
//! results are fed back until the model answers or the step budget runs out.

mod agent_loop;
pub mod model;
pub mod prompt;
mod state;

pub use agent_loop::AgentLoop;
pub use model::{Decision, DecisionRequest, LanguageModel, OpenAiModel, RequestedCall};
pub use state::{AgentConfig, AgentOutcome, AgentRun, AgentStep};
