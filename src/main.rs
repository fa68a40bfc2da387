//! clinic-guard: access security service for medical-data systems.
//!
//! # Architecture Overview
//!
//! ```text
//!     Business service                ┌──────────────────────────────────────────┐
//!     ───────────────────────────────▶│ http: /v1/decisions, /v1/authentications │
//!                                     └────────────────────┬─────────────────────┘
//!                                                          ▼
//!                                     ┌──────────────────────────────────────────┐
//!                                     │ SecurityCoordinator                      │
//!                                     │   rate limit → permission → anomaly      │
//!                                     └───────┬──────────────────────┬───────────┘
//!                                             ▼                      ▼
//!                                     SecurityStore             AuditLog
//!                                     (windows, blocks)         (hash chain, JSONL)
//!
//!     Operator (guard-cli) ──────────▶ /admin/* (status, blocks, audit verify)
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use clinic_guard::config::{load_config, GuardConfig};
use clinic_guard::http::HttpServer;
use clinic_guard::lifecycle::maintenance::Sweeper;
use clinic_guard::lifecycle::signals::wait_for_shutdown_signal;
use clinic_guard::lifecycle::startup::build_state;
use clinic_guard::lifecycle::Shutdown;
use clinic_guard::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "clinic-guard", version, about = "Access security service for medical-data systems")]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long, env = "CLINIC_GUARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "clinic-guard starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        config_file = ?args.config,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let sweep_interval = Duration::from_secs(config.state.sweep_interval_secs);
    let blocks_path = config.state.blocks_path.clone().map(PathBuf::from);

    let state = build_state(config)?;
    let shutdown = Shutdown::new();

    let sweeper = Sweeper::new(
        state.coordinator.clone(),
        state.clock.clone(),
        sweep_interval,
        blocks_path,
    )
    .spawn(shutdown.subscribe());

    let server_shutdown = shutdown.subscribe();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.trigger();
    });

    HttpServer::new(state).run(listener, server_shutdown).await?;

    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweeper task ended abnormally");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
