//! Foreman CLI - Command-line interface for the Foreman job dispatch server.
//!
//! Provides commands for job submission, schedule control, stats inspection,
//! health checks, and CLI configuration.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, job, stats};
use output::OutputFormat;

/// Foreman - Job Dispatch & Admission Engine CLI
#[derive(Parser)]
#[command(
    name = "foreman",
    version = "0.1.0",
    about = "Foreman - Job Dispatch & Admission Engine",
    long_about = "CLI tool for submitting Foreman jobs, managing schedules, and inspecting dispatcher state.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "FOREMAN_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job submission and schedule control
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Dispatcher and subsystem statistics
    #[command(subcommand)]
    Stats(stats::StatsCommands),

    /// Check server health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(config::load_api_url)
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let client = client::ApiClient::new(&api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Job(cmd) => job::execute(cmd, &client, format).await,
        Commands::Stats(cmd) => stats::execute(cmd, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
