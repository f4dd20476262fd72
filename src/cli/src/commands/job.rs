//! Job submission and schedule control commands.
//!
//! Provides submit, cancel, status, show, and list operations.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a one-time job
    SubmitOnetime {
        /// Caller-assigned job id, unique per submission
        #[arg(short = 'i', long)]
        id: String,

        /// Human-readable job name
        #[arg(short, long)]
        name: String,

        /// Registered job type
        #[arg(short = 't', long = "type")]
        job_type: String,

        /// Grouping key; submissions sharing a key within the buffer window
        /// run once per list
        #[arg(short, long)]
        group: Option<String>,

        /// Grouping buffer window in milliseconds
        #[arg(long)]
        group_buffer_ms: Option<u64>,

        /// Priority (low, normal, high, critical)
        #[arg(short, long)]
        priority: Option<String>,
    },

    /// Submit a repetitive job schedule
    SubmitRepetitive {
        /// Caller-assigned job id, unique per submission
        #[arg(short = 'i', long)]
        id: String,

        /// Human-readable job name
        #[arg(short, long)]
        name: String,

        /// Registered job type
        #[arg(short = 't', long = "type")]
        job_type: String,

        /// Cron expression (required when the job type runs in CRON mode)
        #[arg(short, long)]
        cron: Option<String>,

        /// Grouping key
        #[arg(short, long)]
        group: Option<String>,

        /// Grouping buffer window in milliseconds
        #[arg(long)]
        group_buffer_ms: Option<u64>,

        /// Priority (low, normal, high, critical)
        #[arg(short, long)]
        priority: Option<String>,
    },

    /// Cancel a repetitive job schedule
    Cancel {
        /// External job id
        job_id: String,
    },

    /// Check whether a schedule is live
    Status {
        /// External job id
        job_id: String,
    },

    /// Show the full record for a job
    Show {
        /// External job id
        job_id: String,
    },

    /// List job records
    List {
        /// Filter by status (pending, running, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by job type
        #[arg(short = 't', long = "type")]
        job_type: Option<String>,
    },

    /// Schedule an immediate retry for a failed job
    Retry {
        /// External job id
        job_id: String,
    },

    /// Cancel pending retries for a job
    CancelRetries {
        /// External job id
        job_id: String,
    },

    /// Reset the retry counter for a job
    ResetRetries {
        /// External job id
        job_id: String,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OneTimeSubmission {
    external_id: String,
    job_name: String,
    job_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_buffer_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<String>,
}

#[derive(Serialize)]
struct RepetitiveSubmission {
    external_id: String,
    job_name: String,
    job_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cron_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_buffer_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobStatusResponse {
    job_id: String,
    status: String,
}

/// Subset of the server's job record used for display.
#[derive(Debug, Deserialize, Serialize)]
struct JobRecordInfo {
    external_id: String,
    job_name: String,
    job_type: String,
    kind: String,
    status: String,
    #[serde(default)]
    retry_count: u32,
    #[serde(default)]
    execution_time_ms: Option<u64>,
    #[serde(default)]
    error_message: Option<String>,
    submitted_at: String,
}

#[derive(Debug, Deserialize, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Retries")]
    retries: u32,
    #[tabled(rename = "Submitted")]
    submitted_at: String,
}

impl From<JobRecordInfo> for JobRow {
    fn from(record: JobRecordInfo) -> Self {
        Self {
            id: record.external_id,
            name: record.job_name,
            job_type: record.job_type,
            kind: record.kind,
            status: record.status,
            retries: record.retry_count,
            submitted_at: record.submitted_at,
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::SubmitOnetime {
            id,
            name,
            job_type,
            group,
            group_buffer_ms,
            priority,
        } => {
            let body = OneTimeSubmission {
                external_id: id,
                job_name: name,
                job_type,
                group_key: group,
                group_buffer_ms,
                priority,
            };

            let resp: JobStatusResponse = client.post("/api/jobs/onetime", &body).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success("Job submitted");
                    output::print_detail("ID", &resp.job_id);
                    output::print_detail("Status", &resp.status);
                }
                _ => output::print_item(&resp, format),
            }
        }

        JobCommands::SubmitRepetitive {
            id,
            name,
            job_type,
            cron,
            group,
            group_buffer_ms,
            priority,
        } => {
            let body = RepetitiveSubmission {
                external_id: id,
                job_name: name,
                job_type,
                cron_expression: cron,
                group_key: group,
                group_buffer_ms,
                priority,
            };

            let resp: JobStatusResponse = client.post("/api/jobs/repetitive", &body).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success("Schedule submitted");
                    output::print_detail("ID", &resp.job_id);
                    output::print_detail("Status", &resp.status);
                }
                _ => output::print_item(&resp, format),
            }
        }

        JobCommands::Cancel { job_id } => {
            let resp: JobStatusResponse =
                client.delete(&format!("/api/jobs/repetitive/{}", job_id)).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Schedule {} cancelled", resp.job_id));
                }
                _ => output::print_item(&resp, format),
            }
        }

        JobCommands::Status { job_id } => {
            let resp: JobStatusResponse = client
                .get(&format!("/api/jobs/repetitive/{}/status", job_id))
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Schedule: {}", resp.job_id));
                    output::print_detail("Status", &resp.status);
                }
                _ => output::print_item(&resp, format),
            }
        }

        JobCommands::Show { job_id } => {
            let record: serde_json::Value =
                client.get(&format!("/api/jobs/{}", job_id)).await?;
            output::print_item(&record, format);
        }

        JobCommands::List { status, job_type } => {
            let path = match (&status, &job_type) {
                (Some(s), _) => format!("/api/jobs/status/{}", s),
                (None, Some(t)) => format!("/api/jobs/type/{}", t),
                (None, None) => {
                    output::print_error("Pass --status or --type to list job records");
                    return Ok(());
                }
            };
            if status.is_some() && job_type.is_some() {
                output::print_info("Both --status and --type given; filtering by status");
            }

            let records: Vec<JobRecordInfo> = client.get(&path).await?;
            let rows: Vec<JobRow> = records.into_iter().map(JobRow::from).collect();
            output::print_list(&rows, format);
        }

        JobCommands::Retry { job_id } => {
            let record: JobRecordInfo = client
                .post(&format!("/api/jobs/{}/retry", job_id), &serde_json::json!({}))
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Retry scheduled for {}", record.external_id));
                    output::print_detail("Status", &record.status);
                    output::print_detail("Retry count", &record.retry_count.to_string());
                }
                _ => output::print_item(&record, format),
            }
        }

        JobCommands::CancelRetries { job_id } => {
            let record: JobRecordInfo = client
                .post(
                    &format!("/api/jobs/{}/cancel-retries", job_id),
                    &serde_json::json!({}),
                )
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "Pending retries cancelled for {}",
                        record.external_id
                    ));
                }
                _ => output::print_item(&record, format),
            }
        }

        JobCommands::ResetRetries { job_id } => {
            let record: JobRecordInfo = client
                .post(
                    &format!("/api/jobs/{}/reset-retries", job_id),
                    &serde_json::json!({}),
                )
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "Retry counter reset for {}",
                        record.external_id
                    ));
                }
                _ => output::print_item(&record, format),
            }
        }
    }

    Ok(())
}
