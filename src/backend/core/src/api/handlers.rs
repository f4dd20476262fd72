//! REST handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::{ApiResponse, AppState};
use crate::admission::SubmissionContext;
use crate::dispatch::{OneTimeSubmission, RepetitiveSubmission};
use crate::error::{ForemanError, Result};
use crate::jobs::{JobRecord, JobStatus};
use crate::store::{PoolDescriptor, StoreStats};

/// Submission and schedule-control payload.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStatsResponse {
    pub backend: &'static str,
    #[serde(flatten)]
    pub stats: StoreStats,
    pub pools: Vec<PoolDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub store: &'static str,
    pub store_reachable: bool,
    pub one_time_pool_shutdown: bool,
    pub scheduler_pool_shutdown: bool,
    pub active_schedules: usize,
    pub event_listeners: usize,
}

/// Build the admission lookup keys from request headers.
///
/// `X-Forwarded-For` (first hop) or `X-Real-IP` for the client address,
/// `X-User-Id` + `X-User-Tier` for the user dimension, and the
/// `X-App-Server-Id` + `X-Api-Key-Id` pair for the app identity path.
/// These are lookup keys only; nothing here validates credentials.
fn submission_context(headers: &HeaderMap) -> SubmissionContext {
    let mut ctx = SubmissionContext::default();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded.or(real_ip) {
        ctx = ctx.with_ip(ip);
    }

    if let Some(user_id) = header_value(headers, "x-user-id") {
        let tier = header_value(headers, "x-user-tier").unwrap_or_else(|| "free".to_string());
        ctx = ctx.with_user(user_id, tier);
    }

    if let (Some(app_server), Some(api_key)) = (
        header_value(headers, "x-app-server-id"),
        header_value(headers, "x-api-key-id"),
    ) {
        ctx = ctx.with_app_identity(app_server, api_key);
    }

    ctx
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission
// ─────────────────────────────────────────────────────────────────────────────

pub async fn submit_onetime(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<OneTimeSubmission>,
) -> Result<impl IntoResponse> {
    let ctx = submission_context(&headers);
    let record = state
        .context
        .dispatcher
        .submit_one_time(submission, &ctx)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(JobStatusResponse {
            job_id: record.external_id,
            status: "SUBMITTED",
        })),
    ))
}

pub async fn submit_repetitive(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<RepetitiveSubmission>,
) -> Result<impl IntoResponse> {
    let ctx = submission_context(&headers);
    let record = state
        .context
        .dispatcher
        .submit_repetitive(submission, &ctx)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(JobStatusResponse {
            job_id: record.external_id,
            status: "SCHEDULED",
        })),
    ))
}

pub async fn cancel_repetitive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let record = state.context.dispatcher.cancel_repetitive(&id).await?;
    Ok(Json(ApiResponse::success(JobStatusResponse {
        job_id: record.external_id,
        status: "CANCELLED",
    })))
}

pub async fn schedule_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let status = if state.context.dispatcher.is_scheduled(&id) {
        "SCHEDULED"
    } else {
        "NOT_SCHEDULED"
    };
    Json(ApiResponse::success(JobStatusResponse {
        job_id: id,
        status,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

pub async fn dispatch_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.context.dispatcher.stats()))
}

pub async fn thread_pool_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.context.monitor.thread_pool_stats(),
    ))
}

pub async fn queue_utilization(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.context.monitor.queue_utilization(),
    ))
}

pub async fn grouping_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.context.grouping.stats()))
}

pub async fn rate_limiting_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.context.admission.stats()))
}

pub async fn retry_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.context.retry.stats().await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn database_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.context.store.stats().await?;
    let pools = state.context.store.list_pool_descriptors().await?;
    Ok(Json(ApiResponse::success(DatabaseStatsResponse {
        backend: state.context.store.name(),
        stats,
        pools,
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Queries
// ─────────────────────────────────────────────────────────────────────────────

pub async fn jobs_by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> Result<Json<ApiResponse<Vec<JobRecord>>>> {
    let status = JobStatus::from_name(&status)
        .ok_or_else(|| ForemanError::validation(format!("Unknown job status: {}", status)))?;
    let records = state.context.store.find_by_status(status).await?;
    Ok(Json(ApiResponse::success(records)))
}

pub async fn jobs_by_type(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> Result<Json<ApiResponse<Vec<JobRecord>>>> {
    let records = state.context.store.find_by_job_type(&job_type).await?;
    Ok(Json(ApiResponse::success(records)))
}

pub async fn job_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobRecord>>> {
    let record = state
        .context
        .store
        .find_by_external_id(&id)
        .await?
        .ok_or_else(|| ForemanError::job_not_found(&id))?;
    Ok(Json(ApiResponse::success(record)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Manual Retry Control
// ─────────────────────────────────────────────────────────────────────────────

pub async fn trigger_retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobRecord>>> {
    let record = state.context.retry.trigger_retry(&id).await?;
    Ok(Json(ApiResponse::success(record)))
}

pub async fn cancel_retries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobRecord>>> {
    let record = state.context.retry.cancel_retries(&id).await?;
    Ok(Json(ApiResponse::success(record)))
}

pub async fn reset_retries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobRecord>>> {
    let record = state.context.retry.reset_retry_count(&id).await?;
    Ok(Json(ApiResponse::success(record)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Health and Metrics
// ─────────────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let context = &state.context;
    let store_reachable = context.store.count_all().await.is_ok();
    let pools_up =
        !context.one_time_pool.is_shutdown() && !context.scheduler_pool.is_shutdown();

    let healthy = store_reachable && pools_up && context.monitor.is_healthy();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ApiResponse::success(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" },
            uptime_secs: context.uptime().as_secs(),
            store: context.store.name(),
            store_reachable,
            one_time_pool_shutdown: context.one_time_pool.is_shutdown(),
            scheduler_pool_shutdown: context.scheduler_pool.is_shutdown(),
            active_schedules: context.dispatcher.active_schedules(),
            event_listeners: context.events.listeners(),
        })),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(registry) => registry.render(),
        None => String::new(),
    }
}
