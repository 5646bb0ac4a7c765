//! caseflow - case workflow command line
//!
//! # Usage
//!
//! ```bash
//! # Check the catalog
//! caseflow validate
//!
//! # Start a workflow (in memory unless CASEFLOW_DATABASE_URL is set)
//! caseflow run client-onboarding --data jurisdiction=KY --data aum=2000000
//!
//! # Resolve the task it paused on (database builds only)
//! caseflow complete-task <task-id> --output '{"signed": true}'
//!
//! # Try the evaluators directly
//! caseflow eval-expr 'round(aum * 0.0015, 2)' --var aum=2000000
//! caseflow eval-rules risk-tier --input jurisdiction=KY
//! ```

mod commands;
mod config;

use clap::Parser;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "caseflow")]
#[command(version)]
#[command(about = "Run case workflows and evaluate their rules and formulas")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    #[command(flatten)]
    config: config::CliConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,caseflow_core=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match commands::execute(cli.command, &cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
