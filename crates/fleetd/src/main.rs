//! fleetd — the fleet operator daemon.
//!
//! Single process running every operator subsystem:
//! - Instance store (redb)
//! - Per-kind watchers and reconciliation controllers
//! - Metering engine
//! - Idle and expiry evaluators
//! - REST API + `/metrics`
//!
//! # Usage
//!
//! ```text
//! fleetd run --port 9946 --data-dir /var/lib/fleet --config fleet.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use fleet_controller::InMemoryBuilder;
use fleet_core::FleetConfig;
use fleet_lifecycle::HttpHeartbeatProbe;
use fleet_metrics::MetricsRegistry;
use fleet_state::{PrefixTenancy, StateStore};
use fleetd::{FleetServices, build_router, spawn_fleet};

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet workload operator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the operator with the in-process resource builder.
    Run {
        /// Port for the REST API and metrics.
        #[arg(long, default_value = "9946")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fleet")]
        data_dir: PathBuf,

        /// TOML config file; built-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleet=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            port,
            data_dir,
            config,
        } => run(port, data_dir, config).await,
    }
}

async fn run(port: u16, data_dir: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = FleetConfig::load(config_path.as_deref())?;
    info!(config = ?config_path, "fleet operator starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("fleet.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let metrics = Arc::new(MetricsRegistry::new());
    let services = FleetServices {
        store: store.clone(),
        builder: Arc::new(InMemoryBuilder::default()),
        tenancy: Arc::new(PrefixTenancy::default()),
        metrics: metrics.clone(),
        probe: Arc::new(HttpHeartbeatProbe::new(config.idle.probe_timeout())),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_fleet(&services, &config, shutdown_rx);

    let router = build_router(store, metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // In-flight reconciles and ticks finish before exit.
    for handle in handles {
        let _ = handle.await;
    }

    info!("fleet operator stopped");
    Ok(())
}
