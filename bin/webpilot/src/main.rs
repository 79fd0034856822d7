mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "webpilot")]
#[command(about = "A browser-automation agent driven by a hosted model", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a browser task
    Run {
        /// The task to perform, in natural language
        task: String,

        /// Launch a visible browser window
        #[arg(long)]
        headed: bool,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the orchestrator iteration cap
        #[arg(long)]
        max_iterations: Option<usize>,
    },

    /// Check the environment (browser binary, API key, automation server)
    Doctor {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Run {
            task,
            headed,
            config,
            max_iterations,
        } => commands::run::execute(&task, headed, config.as_deref(), max_iterations).await,
        Commands::Doctor { config } => commands::doctor::execute(config.as_deref()),
    }
}
