use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use kh_agent::heartbeat::BenchmarkCache;
use kh_bridge::{BridgeDispatch, BridgeState, SessionRegistry};
use kh_core::{Config, OsRandom, Store};
use kh_harness::shutdown::ShutdownSignal;
use kh_scheduler::SchedulerLoop;
use tracing::{error, info};

/// Configuration for daemon loop intervals.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    /// How often the scheduler tick runs (default from `[scheduler] tick_interval_secs`).
    pub tick_secs: u64,
    /// How often the retention purge sweeps expired hashlists (daily).
    pub retention_secs: u64,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self {
            tick_secs: 3,
            retention_secs: 86_400,
        }
    }
}

/// The krakenhashes scheduler daemon.
///
/// Runs the job scheduler tick and retention purge on configurable
/// intervals, and serves the agent control channel / bootstrap HTTP API.
/// Shuts down gracefully when the `ShutdownSignal` is triggered (e.g. via
/// ctrl-c).
pub struct Daemon {
    config: Config,
    store: Arc<Store>,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
    bridge_state: Arc<BridgeState>,
    scheduler: Arc<SchedulerLoop>,
}

impl Daemon {
    /// Create a new daemon backed by the given store.
    pub fn with_store(config: Config, store: Arc<Store>) -> Self {
        let shutdown = ShutdownSignal::new();
        let intervals = DaemonIntervals {
            tick_secs: config.scheduler.tick_interval_secs,
            ..DaemonIntervals::default()
        };

        let sessions = Arc::new(SessionRegistry::new());
        let benchmarks = Arc::new(BenchmarkCache::new());
        let dispatch = Arc::new(BridgeDispatch {
            sessions: sessions.clone(),
        });
        let scheduler = Arc::new(SchedulerLoop::new(store.clone(), dispatch, benchmarks.clone()));

        let bridge_state = Arc::new(BridgeState::with_shared(
            store.clone(),
            config.clone(),
            Box::new(OsRandom),
            sessions,
            benchmarks,
        ));

        Self {
            config,
            store,
            intervals,
            shutdown,
            bridge_state,
            scheduler,
        }
    }

    /// Open (or create) the store from config and build the daemon.
    pub async fn new(config: Config) -> Result<Self> {
        let store = Store::new(store_path(&config))
            .await
            .context("failed to open store")?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run the daemon as a standalone server (blocking) using a pre-bound
    /// listener. The caller binds the listener so port 0 (OS-assigned) works
    /// for tests.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let bind_addr = listener.local_addr()?;
        let router = kh_bridge::http_api::router(self.bridge_state.clone());

        let mut shutdown_rx = self.shutdown.subscribe();
        let server_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).into_future();
            tokio::select! {
                result = serve => {
                    if let Err(e) = result {
                        error!(error = %e, "bridge server error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("bridge server stopping");
                }
            }
        });
        info!(%bind_addr, "agent bridge listening");

        self.run_loops().await;

        server_handle.abort();
        info!("daemon stopped");
        Ok(())
    }

    /// Bind the configured host:port and run until shutdown.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.daemon.host, self.config.daemon.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind bridge listener on {bind_addr}"))?;
        self.run_with_listener(listener).await
    }

    /// The scheduler-tick / retention-purge loop, shared by standalone mode.
    async fn run_loops(&self) {
        let mut tick_interval = tokio::time::interval(Duration::from_secs(self.intervals.tick_secs));
        let mut retention_interval =
            tokio::time::interval(Duration::from_secs(self.intervals.retention_secs));

        // Consume the first immediate tick so both loops don't fire at t=0.
        tick_interval.tick().await;
        retention_interval.tick().await;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    match self.scheduler.tick(Utc::now()).await {
                        Ok(report) => {
                            if report.tasks_created > 0
                                || report.interruptions > 0
                                || report.jobs_completed > 0
                                || report.jobs_failed > 0
                            {
                                info!(
                                    tasks_created = report.tasks_created,
                                    interruptions = report.interruptions,
                                    jobs_completed = report.jobs_completed,
                                    jobs_failed = report.jobs_failed,
                                    reaped_to_reconnect_pending = report.reaped_to_reconnect_pending,
                                    reaped_to_failed = report.reaped_to_failed,
                                    "scheduler tick"
                                );
                            }
                        }
                        Err(e) => error!(error = %e, "scheduler tick failed"),
                    }
                }
                _ = retention_interval.tick() => {
                    match kh_scheduler::run_purge(&self.store, Utc::now()).await {
                        Ok(report) => {
                            info!(
                                hashlists_deleted = report.hashlists_deleted,
                                orphan_hashes_deleted = report.orphan_hashes_deleted,
                                "retention purge completed"
                            );
                        }
                        Err(e) => error!(error = %e, "retention purge failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping background loops");
                    break;
                }
            }
        }
    }
}

fn store_path(config: &Config) -> String {
    let path = &config.store.path;
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.clone()
}
