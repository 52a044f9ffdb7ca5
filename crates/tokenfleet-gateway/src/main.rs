//! Tokenfleet Gateway - cluster flow-control coordinator
//!
//! This is the main entry point for the gateway service. It hosts the
//! cluster coordinator in-process, runs the periodic health sweep, and
//! serves the JSON API.
//!
//! # Environment
//!
//! - `LISTEN_ADDR` - listen address (default `0.0.0.0:8719`)
//! - `HEARTBEAT_TIMEOUT_SECONDS` - silence before an instance is unhealthy
//! - `SWEEP_INTERVAL_SECONDS` - period of the health sweep
//! - `INSTANCE_TTL_SECONDS` - evict instances silent for this long (unset: never)
//! - `RUST_LOG` - log filter

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenfleet_cluster::{spawn_health_sweeper, ClusterCoordinator, CoordinatorConfig};
use tokenfleet_gateway::{create_router, GatewayConfig, GatewayState};

/// Read an optional numeric environment variable.
fn env_u64(name: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(
            value
                .parse()
                .map_err(|e| format!("{name} must be a non-negative integer: {e}"))?,
        )),
        Err(_) => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tokenfleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tokenfleet Gateway");

    // Load configuration from environment
    let mut gateway_config = GatewayConfig::default();
    if let Ok(listen_addr) = std::env::var("LISTEN_ADDR") {
        gateway_config.listen_addr = listen_addr;
    }

    let mut cluster_config = CoordinatorConfig::default();
    if let Some(secs) = env_u64("HEARTBEAT_TIMEOUT_SECONDS")? {
        cluster_config.heartbeat_timeout_seconds = secs;
    }
    if let Some(secs) = env_u64("SWEEP_INTERVAL_SECONDS")? {
        cluster_config.sweep_interval_seconds = secs.max(1);
    }
    cluster_config.instance_ttl_seconds = env_u64("INSTANCE_TTL_SECONDS")?;

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        heartbeat_timeout_seconds = cluster_config.heartbeat_timeout_seconds,
        sweep_interval_seconds = cluster_config.sweep_interval_seconds,
        instance_ttl_seconds = ?cluster_config.instance_ttl_seconds,
        "Gateway configuration loaded"
    );

    let sweep_interval = cluster_config.sweep_interval();
    let cluster = Arc::new(ClusterCoordinator::new(cluster_config));

    // Log every committed cluster change
    let mut events = cluster.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    app = %event.app(),
                    instance_id = %event.instance_id(),
                    event = ?event,
                    "Cluster event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Cluster event log lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let _sweeper = spawn_health_sweeper(Arc::clone(&cluster), sweep_interval);

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(cluster, gateway_config);
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
