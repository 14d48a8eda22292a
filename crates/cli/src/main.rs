//! Keepframe CLI - Main Entry Point
//!
//! Operator commands for the test artifact store: connection checks,
//! one-off uploads, report publishing, and running a test command inside a
//! recording scope.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keepframe_common::{KeepframeConfig, DEFAULT_CONFIG_FILE};

mod commands;
mod output;

use commands::{check, config, run, upload, upload_report};

/// Keepframe - keep the recordings of failing tests, drop the rest
#[derive(Parser)]
#[command(name = "keepframe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (missing file means defaults plus environment)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, env = "KEEPFRAME_CONFIG", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify bucket access by uploading a small test file
    Check,

    /// Upload a single file
    Upload(upload::UploadArgs),

    /// Upload a generated HTML report directory
    UploadReport(upload_report::UploadReportArgs),

    /// Run a test command inside a recording scope
    Run(run::RunArgs),

    /// Show or write the effective configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let cfg = KeepframeConfig::load(&cli.config)?;

    match cli.command {
        Commands::Check => check::execute(&cfg, cli.format).await?,
        Commands::Upload(args) => upload::execute(args, &cfg, cli.format).await?,
        Commands::UploadReport(args) => upload_report::execute(args, &cfg, cli.format).await?,
        Commands::Run(args) => run::execute(args, &cfg, cli.format).await?,
        Commands::Config(cmd) => config::execute(cmd, &cfg, &cli.config, cli.format)?,
        Commands::Version => {
            println!("Keepframe CLI v{}", keepframe_common::VERSION);
            println!("Test artifact lifecycle manager for browser E2E suites");
        }
    }

    Ok(())
}
