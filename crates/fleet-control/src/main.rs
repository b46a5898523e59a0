//! Fleet control plane service.
//!
//! Serves the internal API and runs the background loops that expire
//! overdue jobs and probe health monitors.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_control::{
    create_router, ApiState, FleetControl, FleetControlService, LogNotifier, ServiceConfig,
};
use fleet_store::RocksStore;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Control = FleetControlService<RocksStore, LogNotifier>;

/// Periodically fail jobs past their deadline.
async fn run_sweeper(control: Arc<Control>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if let Err(e) = control.sweep_expired_jobs(Utc::now()).await {
            tracing::error!(error = %e, "Job sweep failed");
        }
    }
}

/// Periodically probe due health monitors.
async fn run_health_checks(control: Arc<Control>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match control.run_health_checks(Utc::now()).await {
            Ok(0) => {}
            Ok(probed) => tracing::debug!(probed, "Health checks complete"),
            Err(e) => tracing::error!(error = %e, "Health check round failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fleet Control Plane");

    // Load configuration from environment
    let config = ServiceConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        sweep_interval_seconds = config.sweep_interval_seconds,
        health_check_interval_seconds = config.health_check_interval_seconds,
        "Loaded service configuration"
    );

    // Initialize store
    let store = Arc::new(RocksStore::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir, "Initialized RocksDB store");

    // Initialize control plane service
    let control = Arc::new(FleetControlService::new(
        store,
        Arc::new(LogNotifier),
        config.control_config(),
    ));

    // Start background loops
    tokio::spawn(run_sweeper(Arc::clone(&control), config.sweep_interval()));
    tokio::spawn(run_health_checks(
        Arc::clone(&control),
        config.health_check_interval(),
    ));
    tracing::info!("Started job sweeper and health check loops");

    // Create router
    let app = create_router(ApiState::new(control));

    // Start server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
