//! Gateway shard supervisor binary
//!
//! Runs one pool of gateway shards:
//! - one Twilight-backed connection worker per shard, restarted on exit
//! - identify attempts spaced across the pool
//! - health/ready/shards endpoints and Prometheus metrics over HTTP

use anyhow::Result;
use gateway_shard::config::GatewayConfig;
use gateway_shard::health::{self, AppState};
use gateway_shard::metrics::GatewayMetrics;
use gateway_shard::shard::ShardPool;
use gateway_shard::worker::{self, TaskSpawner};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, trace, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let gateway_config = GatewayConfig::from_env()?;

    // Initialize tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("gateway_shard={}", gateway_config.log_level).parse()?)
                .add_directive("twilight_gateway=info".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pool_id = gateway_config.pool_id,
        total_shards = gateway_config.total_shards,
        gateway_url = %gateway_config.gateway_url,
        "Starting gateway shard supervisor"
    );

    let metrics = GatewayMetrics::install()?;
    info!("Prometheus metrics initialized");

    info!(intents = ?gateway_config.intents, "Using Discord intents");

    let spawner = Arc::new(TaskSpawner::new(worker::twilight::run));
    let pool = ShardPool::new(&gateway_config, spawner)?;
    info!(
        pool_id = pool.pool_id(),
        shard_count = pool.shard_count(),
        "Shard pool created"
    );

    tokio::spawn(log_events(pool.subscribe()));

    let app_state = AppState {
        pool: Arc::clone(&pool),
        metrics,
    };

    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], gateway_config.http_port).into();

    info!(port = gateway_config.http_port, "Starting HTTP server");

    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, health_router);

    let starter = Arc::clone(&pool);
    tokio::spawn(async move { starter.start().await });

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down gateway...");
    pool.shutdown();

    info!("Gateway shutdown complete");
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<gateway_shard::protocol::DispatchPayload>) {
    loop {
        match events.recv().await {
            Ok(payload) => trace!(shard_id = ?payload.shard_id, event = %payload.t, "Dispatch"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
