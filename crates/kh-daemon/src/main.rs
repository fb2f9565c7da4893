//! krakenhashes daemon — runs the job scheduler and serves the agent
//! control channel / bootstrap HTTP API.

use anyhow::{Context, Result};
use kh_core::Config;
use tracing::info;

mod daemon;

use daemon::Daemon;

#[tokio::main]
async fn main() -> Result<()> {
    kh_telemetry::logging::init_logging("kh-daemon", "info");

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "krakenhashes daemon starting");

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let daemon = Daemon::new(config).await.context("failed to initialize daemon")?;

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received");
        shutdown.trigger();
    });

    daemon.run().await
}
