use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use kh_core::store::Store;
use kh_core::types::AgentStatus;

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("agent not found")]
    AgentNotFound,

    #[error("store error: {0}")]
    Store(#[from] kh_core::error::KhError),
}

pub type Result<T> = std::result::Result<T, HeartbeatError>;

/// Applies a `heartbeat` frame: stamps `last_heartbeat` and, if the agent
/// was `pending`/`inactive`/`error`, promotes it to `active`. Per-device
/// telemetry (temperature, utilization, fan speed, hashrate) is logged for
/// operators but not persisted — spec scope excludes a metrics/analytics
/// store.
pub async fn apply_heartbeat(store: &Store, agent_id: i64, now: DateTime<Utc>) -> Result<()> {
    let mut agent = store
        .get_agent_by_id(agent_id)
        .await?
        .ok_or(HeartbeatError::AgentNotFound)?;
    agent.last_heartbeat = Some(now);
    if agent.status != AgentStatus::Active {
        agent.status = AgentStatus::Active;
        agent.last_error = None;
    }
    store.update_agent(&agent).await?;
    Ok(())
}

/// Holds the most recent `benchmark_result` speed sample per
/// `(agent_id, hash_mode)`. Chunk sizing (spec.md §4.2) reads the
/// requesting agent's own last sample; it is intentionally not persisted to
/// the durable store since it is advisory telemetry, not job/task state.
#[derive(Debug, Default)]
pub struct BenchmarkCache {
    samples: Mutex<HashMap<(i64, i32), f64>>,
}

impl BenchmarkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, agent_id: i64, hash_mode: i32, speed_hps: f64) {
        self.samples.lock().unwrap().insert((agent_id, hash_mode), speed_hps);
    }

    pub fn get(&self, agent_id: i64, hash_mode: i32) -> Option<f64> {
        self.samples.lock().unwrap().get(&(agent_id, hash_mode)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_promotes_pending_agent_to_active() {
        let store = Store::new_in_memory().await.unwrap();
        let agent = kh_core::types::Agent::new("rig", "k".repeat(64));
        let id = store.insert_agent(&agent).await.unwrap();

        apply_heartbeat(&store, id, Utc::now()).await.unwrap();
        let fetched = store.get_agent_by_id(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, AgentStatus::Active);
        assert!(fetched.last_heartbeat.is_some());
    }

    #[test]
    fn benchmark_cache_returns_most_recent_sample() {
        let cache = BenchmarkCache::new();
        cache.record(1, 0, 10_000.0);
        cache.record(1, 0, 12_000.0);
        assert_eq!(cache.get(1, 0), Some(12_000.0));
        assert_eq!(cache.get(2, 0), None);
    }
}
