//! Shard Host - process entry point
//!
//! Starts the built-in shards, then serves:
//! - `/ws` for connected processes (calls, state sync, events)
//! - health/ready endpoints for supervisors
//! - Prometheus metrics for observability

use anyhow::Result;
use shard_host::config::HostConfig;
use shard_host::health::{self, AppState};
use shard_host::metrics::HostMetrics;
use shard_host::shard::ShardRegistry;
use shard_host::shards;
use shard_host::ShardContainer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let host_config = HostConfig::from_env()?;

    // Initialize tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("shard_host={}", host_config.log_level).parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = host_config.http_port,
        max_concurrent_inits = host_config.lifecycle.max_concurrent_inits,
        "Starting shard host"
    );

    // Initialize metrics
    let metrics = Arc::new(HostMetrics::install()?);
    info!("Prometheus metrics initialized");

    let mut registry = ShardRegistry::new();
    shards::register_builtin(&mut registry, env!("CARGO_PKG_VERSION"))?;

    let container = Arc::new(ShardContainer::with_metrics(
        registry,
        host_config.lifecycle.clone(),
        Arc::clone(&metrics),
    ));

    let report = container.start().await?;
    if let Err(e) = report.ensure_success() {
        error!(error = %e, "Shard initialization failed");
        let disposal = container.dispose().await;
        for failure in &disposal.failures {
            warn!(error = %failure, "Dispose failure during aborted startup");
        }
        return Err(e.into());
    }
    info!(order = ?report.order, "Shards started");

    // Start HTTP server
    let app_state = AppState {
        container: Arc::clone(&container),
        metrics: Arc::clone(&metrics),
    };

    let app_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], host_config.http_port).into();

    info!(port = host_config.http_port, "Starting HTTP server");

    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, app_router);

    // A quit negotiated through close-policy ends the process like a signal
    let shutdown_watch = container.connect_local();

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        _ = shards::app_common::shutdown_requested(&shutdown_watch) => {
            info!("Shutdown requested by app-common");
        }
    }

    // Graceful shutdown
    info!("Shutting down shard host...");

    let disposal = container.dispose().await;
    for failure in &disposal.failures {
        warn!(error = %failure, "Dispose failure");
    }

    info!(disposed = disposal.order.len(), "Shard host shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
