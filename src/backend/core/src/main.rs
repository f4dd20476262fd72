//! Foreman Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use foreman_core::api::{self, AppState};
use foreman_core::config::Config;
use foreman_core::context::AppContext;
use foreman_core::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    // Initialize logging and the metrics recorder
    let telemetry = telemetry::init_telemetry(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Foreman Server");

    // Wire the application context and start background tasks
    let host = config.server.host.clone();
    let port = config.server.port;
    let context = Arc::new(AppContext::new(config));
    context.start().await?;

    // Build router
    let app_state = AppState::new(context.clone(), telemetry.metrics.clone());
    let app = api::build_router(app_state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain schedules and pools
    context.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
