//! HTTP API layer.
//!
//! REST routes under `/api/jobs` for submission, schedule control and stats
//! snapshots, plus the unversioned `/health`, `/metrics` and
//! `/ws/job-status` endpoints. Every payload rides in the [`ApiResponse`]
//! envelope; errors map through `ForemanError`'s `IntoResponse`.

mod handlers;
mod websocket;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::telemetry::MetricsRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<AppContext>,
    /// Absent in tests that do not install a recorder
    pub metrics: Option<MetricsRegistry>,
}

impl AppState {
    pub fn new(context: Arc<AppContext>, metrics: Option<MetricsRegistry>) -> Self {
        Self { context, metrics }
    }
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Unversioned endpoints
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/ws/job-status", get(websocket::ws_handler))
        // Submission and schedule control
        .route("/api/jobs/onetime", post(handlers::submit_onetime))
        .route("/api/jobs/repetitive", post(handlers::submit_repetitive))
        .route("/api/jobs/repetitive/:id", delete(handlers::cancel_repetitive))
        .route(
            "/api/jobs/repetitive/:id/status",
            get(handlers::schedule_status),
        )
        // Stats snapshots
        .route("/api/jobs/stats", get(handlers::dispatch_stats))
        .route("/api/jobs/thread-pool-stats", get(handlers::thread_pool_stats))
        .route("/api/jobs/queue-utilization", get(handlers::queue_utilization))
        .route("/api/jobs/grouping-stats", get(handlers::grouping_stats))
        .route(
            "/api/jobs/rate-limiting-stats",
            get(handlers::rate_limiting_stats),
        )
        .route("/api/jobs/retry-stats", get(handlers::retry_stats))
        .route("/api/jobs/database-stats", get(handlers::database_stats))
        // Record queries
        .route("/api/jobs/status/:status", get(handlers::jobs_by_status))
        .route("/api/jobs/type/:job_type", get(handlers::jobs_by_type))
        .route("/api/jobs/:id", get(handlers::job_by_id))
        // Manual retry control
        .route("/api/jobs/:id/retry", post(handlers::trigger_retry))
        .route("/api/jobs/:id/cancel-retries", post(handlers::cancel_retries))
        .route("/api/jobs/:id/reset-retries", post(handlers::reset_retries))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code.into()),
        }
    }

    pub fn from_foreman_error(err: &crate::error::ForemanError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message().to_string()),
            error_code: Some(err.error_code().to_string()),
        }
    }
}
