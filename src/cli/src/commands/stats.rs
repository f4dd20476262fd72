//! Statistics inspection commands.
//!
//! Queries the dispatcher's stats endpoints and renders the snapshots.

use anyhow::Result;
use clap::Subcommand;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum StatsCommands {
    /// Dispatch counters (submissions, completions, failures)
    Dispatch,

    /// Worker pool stats and queue utilization
    Pools,

    /// Grouping buffer stats
    Grouping,

    /// Admission (rate limiting) stats
    Admission,

    /// Retry engine stats
    Retry,

    /// Store stats and registered pool descriptors
    Store,
}

pub async fn execute(cmd: StatsCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        StatsCommands::Dispatch => {
            let stats: serde_json::Value = client.get("/api/jobs/stats").await?;
            print_snapshot("Dispatch Stats", &stats, format);
        }

        StatsCommands::Pools => {
            let pools: serde_json::Value = client.get("/api/jobs/thread-pool-stats").await?;
            let queues: serde_json::Value = client.get("/api/jobs/queue-utilization").await?;

            match format {
                OutputFormat::Table => {
                    print_snapshot("Worker Pools", &pools, format);
                    print_snapshot("Queue Utilization", &queues, format);
                }
                _ => output::print_item(
                    &serde_json::json!({ "pools": pools, "queues": queues }),
                    format,
                ),
            }
        }

        StatsCommands::Grouping => {
            let stats: serde_json::Value = client.get("/api/jobs/grouping-stats").await?;
            print_snapshot("Grouping Stats", &stats, format);
        }

        StatsCommands::Admission => {
            let stats: serde_json::Value = client.get("/api/jobs/rate-limiting-stats").await?;
            print_snapshot("Admission Stats", &stats, format);
        }

        StatsCommands::Retry => {
            let stats: serde_json::Value = client.get("/api/jobs/retry-stats").await?;
            print_snapshot("Retry Stats", &stats, format);
        }

        StatsCommands::Store => {
            let stats: serde_json::Value = client.get("/api/jobs/database-stats").await?;
            print_snapshot("Store Stats", &stats, format);
        }
    }

    Ok(())
}

/// Render a stats snapshot: key-value lines for tables, raw JSON otherwise.
fn print_snapshot(title: &str, value: &serde_json::Value, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            output::print_header(title);
            print_value("", value);
        }
        _ => output::print_item(value, format),
    }
}

fn print_value(prefix: &str, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let label = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                print_value(&label, nested);
            }
        }
        serde_json::Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                print_value(&format!("{}[{}]", prefix, idx), item);
            }
        }
        other => output::print_detail(prefix, &scalar_to_string(other)),
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
