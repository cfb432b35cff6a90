//! Microgrid dashboard HTTP server
//!
//! Runs the ingestion supervisor in the background and serves the dashboard
//! API over the query facade.
//!
//! # Endpoints
//!
//! ## Auth
//! - `POST /api/login` - Exchange credentials for the API token
//!
//! ## Dashboard (bearer token required)
//! - `GET /api/dashboard/realtime` - Latest complete sample
//! - `GET /api/dashboard/historical?metric=..&period=..` - Series for one metric
//! - `GET /api/dashboard/alerts` - Recent alerts, newest first
//!
//! ## Admin
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `PIPELINE_CONFIG` environment variable (path to TOML file)
//! 2. `./pipeline.toml` in current directory
//! 3. Default configuration
//!
//! # Example
//!
//! ```bash
//! PIPELINE_CONFIG=/etc/microgrid.toml ./server
//!
//! curl -X POST http://localhost:8000/api/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "user", "password": "password"}'
//!
//! curl -H "Authorization: Bearer prototype_token" \
//!   "http://localhost:8000/api/dashboard/historical?metric=battery_soc&period=24h"
//! ```

#[path = "server/handlers.rs"]
mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use handlers::AppState;
use microgrid_telemetry::{
    engine::InfluxConnector,
    observability::{PipelineMetrics, PrometheusConfig, PrometheusExporter},
    services::{Dispatcher, HealthChecker, HealthConfig, IngestionSupervisor},
    transport::MqttConnector,
    AlertLedger, Config, Error, EventRouter, QueryFacade, Result, TimeSeriesGateway,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::{error, info};

// =============================================================================
// Server Initialization
// =============================================================================

/// Build the router with all endpoints
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // API
        .route("/api/login", post(handlers::login))
        .route("/api/dashboard/realtime", get(handlers::realtime))
        .route("/api/dashboard/historical", get(handlers::historical))
        .route("/api/dashboard/alerts", get(handlers::alerts))
        .with_state(state)
}

fn config_error(e: impl std::fmt::Display) -> Error {
    Error::Configuration(e.to_string())
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("microgrid_telemetry=info".parse().map_err(config_error)?)
                .add_directive("server=info".parse().map_err(config_error)?),
        )
        .init();

    info!("Microgrid telemetry server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load();
    info!("Listen address: {}", config.server.listen_addr);
    info!(
        influx = %config.influx.url,
        mqtt_host = %config.mqtt.host,
        mqtt_port = config.mqtt.port,
        "External collaborators"
    );

    // Shared resources: engine handle is connected lazily on first use
    let metrics = Arc::new(PipelineMetrics::new()?);
    let gateway = Arc::new(
        TimeSeriesGateway::new(Arc::new(InfluxConnector::new(config.influx.clone())))
            .with_measurement(config.influx.measurement.clone()),
    );
    let ledger = Arc::new(AlertLedger::new(config.alerts.capacity));

    let dispatcher = Arc::new(Dispatcher::new(
        EventRouter::from_config(&config.ingest),
        gateway.clone(),
        ledger.clone(),
        metrics.clone(),
    ));
    let supervisor = Arc::new(IngestionSupervisor::new(
        Arc::new(MqttConnector::new(config.mqtt.clone())),
        dispatcher,
        &config.ingest,
    ));

    if let Err(e) = supervisor.start().await {
        error!(error = %e, "Ingestion supervisor failed to start, serving queries only");
    }

    let state = Arc::new(AppState {
        facade: QueryFacade::new(gateway.clone(), ledger),
        health: HealthChecker::new(HealthConfig::default(), supervisor.clone(), gateway),
        exporter: PrometheusExporter::new(PrometheusConfig::default(), metrics),
        server: config.server.clone(),
    });

    let app = build_router(state);

    let addr: SocketAddr = config.server.listen_addr.parse().map_err(config_error)?;
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.stop().await;
    info!("Server shutdown complete");
    Ok(())
}
