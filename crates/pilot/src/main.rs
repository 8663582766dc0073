//! pilot: run a tool-calling agent against MCP servers

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pilot")]
#[command(about = "Bounded-step tool-calling agent over MCP servers", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to pilot.toml (default: search current directory and parents)
    #[arg(short, long, global = true, env = "PILOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Work on an objective until the agent answers
    Run {
        /// The objective, in natural language
        #[arg(required = true)]
        objective: Vec<String>,

        /// Maximum number of tool calls
        #[arg(long)]
        max_steps: Option<usize>,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// List the tools exposed by the configured MCP servers
    Tools,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            objective,
            max_steps,
            model,
        } => {
            let objective = objective.join(" ");
            commands::run(config, &objective, max_steps, model).await
        }
        Commands::Tools => commands::tools(config).await,
    }
}
