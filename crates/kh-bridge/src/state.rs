use std::sync::Arc;

use kh_agent::heartbeat::BenchmarkCache;
use kh_core::{Clock, Config, Store, SystemClock};

use crate::session::SessionRegistry;

/// Shared `axum` application state for both the agent control channel and
/// the agent-bootstrap HTTP endpoints.
pub struct BridgeState {
    pub store: Arc<Store>,
    pub config: Config,
    pub sessions: Arc<SessionRegistry>,
    pub benchmarks: Arc<BenchmarkCache>,
    pub random: Box<dyn kh_core::RandomSource>,
    pub clock: Box<dyn Clock>,
    pub server_version: String,
}

impl BridgeState {
    pub fn new(store: Arc<Store>, config: Config, random: Box<dyn kh_core::RandomSource>) -> Self {
        Self {
            store,
            config,
            sessions: Arc::new(SessionRegistry::new()),
            benchmarks: Arc::new(BenchmarkCache::new()),
            random,
            clock: Box::new(SystemClock),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Reuses an already-built session registry and benchmark cache — lets
    /// kh-daemon share both with the `SchedulerLoop` it drives on its own
    /// interval, so a `benchmark_result` frame received on the control
    /// channel is immediately visible to the next scheduler tick.
    pub fn with_shared(
        store: Arc<Store>,
        config: Config,
        random: Box<dyn kh_core::RandomSource>,
        sessions: Arc<SessionRegistry>,
        benchmarks: Arc<BenchmarkCache>,
    ) -> Self {
        Self {
            store,
            config,
            sessions,
            benchmarks,
            random,
            clock: Box::new(SystemClock),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
