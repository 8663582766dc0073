//! CLI commands implementation

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pilot::agent::{AgentLoop, AgentOutcome, OpenAiModel};
use pilot::config::PilotConfig;
use pilot::middleware::{
    CallToolLogMiddleware, DenyToolsMiddleware, MiddlewareChain, TimingMiddleware,
};
use pilot::tools::{ToolDispatcher, ToolRegistry};

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Exit code for a run that ran out of steps
const EXIT_EXHAUSTED: u8 = 2;
/// Exit code for a run stopped by Ctrl-C
const EXIT_CANCELLED: u8 = 130;

/// Start every enabled provider; already-started ones are closed on failure
async fn start_providers(config: &PilotConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new()
        .with_disallowed(config.agent.disallowed_tools.iter().cloned())
        .with_call_timeout(config.agent.call_timeout());

    if let Err(e) = registry.register_all(config.enabled_providers()).await {
        registry.shutdown().await;
        return Err(e).context("Failed to start tool providers");
    }

    Ok(registry)
}

fn middleware(config: &PilotConfig) -> MiddlewareChain {
    let mut chain = MiddlewareChain::new()
        .with(CallToolLogMiddleware::new())
        .with(TimingMiddleware);

    if !config.agent.denied_tools.is_empty() {
        chain.push(DenyToolsMiddleware::new(config.agent.denied_tools.iter().cloned()));
    }

    chain
}

/// Run the agent on one objective and print the result
pub async fn run(
    config_path: Option<&Path>,
    objective: &str,
    max_steps: Option<usize>,
    model: Option<String>,
) -> Result<ExitCode> {
    let mut config = PilotConfig::load(config_path).context("Failed to load configuration")?;
    if let Some(max_steps) = max_steps {
        config.agent.max_steps = max_steps;
    }
    if let Some(model) = model {
        config.llm.model = model;
    }

    if config.llm.api_key.is_none() {
        warn!("No API key configured; set OPENAI_API_KEY or llm.api_key");
    }

    let model = OpenAiModel::from_config(&config.llm)?;
    let registry = Arc::new(start_providers(&config).await?);
    let dispatcher = ToolDispatcher::new(Arc::clone(&registry), middleware(&config));
    let agent = AgentLoop::new(Arc::new(model), dispatcher, config.agent.clone());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let run = agent.run(objective, cancel).await;
    registry.shutdown().await;

    println!(
        "{}[{} step(s) in {} turn(s)]{}",
        DIM,
        run.transcript.len(),
        run.turns,
        RESET
    );

    let code = match &run.outcome {
        AgentOutcome::Answer(answer) => {
            println!("\nResult: {}", answer);
            ExitCode::SUCCESS
        }
        AgentOutcome::Exhausted { max_steps } => {
            eprintln!(
                "{}Stopped: step budget of {} exhausted without a final answer{}",
                YELLOW, max_steps, RESET
            );
            ExitCode::from(EXIT_EXHAUSTED)
        }
        AgentOutcome::Cancelled => {
            eprintln!("{}Cancelled{}", YELLOW, RESET);
            ExitCode::from(EXIT_CANCELLED)
        }
        AgentOutcome::Failed(e) => {
            eprintln!("{}Failed: {}{}", RED, e, RESET);
            ExitCode::FAILURE
        }
    };

    Ok(code)
}

/// List the tools each configured provider exposes
pub async fn tools(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = PilotConfig::load(config_path).context("Failed to load configuration")?;
    let registry = start_providers(&config).await?;

    if registry.is_empty() {
        println!("No MCP servers configured.");
        return Ok(ExitCode::SUCCESS);
    }

    for provider in registry.providers() {
        println!(
            "{}{}{} {}({}){}",
            BOLD, provider.name, RESET, DIM, provider.descriptor, RESET
        );
        for tool in &provider.tools {
            let visible = registry.resolve(&tool.name).is_ok();
            let marker = if visible {
                format!("{}✓{}", GREEN, RESET)
            } else {
                format!("{}✗{}", RED, RESET)
            };
            if tool.description.is_empty() {
                println!("  {} {}", marker, tool.name);
            } else {
                println!("  {} {} - {}", marker, tool.name, tool.description);
            }
        }
    }

    registry.shutdown().await;
    Ok(ExitCode::SUCCESS)
}
