//! Health check command.
//!
//! Queries the `/health` endpoint and displays dispatcher status.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include pool and store details
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;
    let data = health.get("data").unwrap_or(&health);

    match format {
        OutputFormat::Table => {
            let status = data
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("Server Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());

            if let Some(uptime) = data.get("uptime_secs").and_then(|v| v.as_u64()) {
                output::print_detail("Uptime", &format!("{}s", uptime));
            }

            if let Some(schedules) = data.get("active_schedules").and_then(|v| v.as_u64()) {
                output::print_detail("Active schedules", &schedules.to_string());
            }

            if args.detailed {
                if let Some(store) = data.get("store").and_then(|v| v.as_str()) {
                    output::print_detail("Store backend", store);
                }
                if let Some(reachable) = data.get("store_reachable").and_then(|v| v.as_bool()) {
                    output::print_detail("Store reachable", &reachable.to_string());
                }
                if let Some(down) = data
                    .get("one_time_pool_shutdown")
                    .and_then(|v| v.as_bool())
                {
                    output::print_detail("One-time pool shutdown", &down.to_string());
                }
                if let Some(down) = data
                    .get("scheduler_pool_shutdown")
                    .and_then(|v| v.as_bool())
                {
                    output::print_detail("Scheduler pool shutdown", &down.to_string());
                }
                if let Some(listeners) = data.get("event_listeners").and_then(|v| v.as_u64()) {
                    output::print_detail("Event listeners", &listeners.to_string());
                }
            }

            if status == "healthy" {
                output::print_success("Dispatcher operational");
            } else {
                output::print_error(&format!("Dispatcher status: {}", status));
            }
        }
        _ => output::print_item(data, format),
    }

    Ok(())
}
