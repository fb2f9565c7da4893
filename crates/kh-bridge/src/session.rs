use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerFrame;

/// Tracks the live outbound queue for every connected agent session, keyed by
/// `agent_id`. Mirrors the teacher's `EventBus`/per-terminal-sender shape but
/// keyed per-agent rather than broadcast, since server->agent frames (task
/// assignments, cancellations) are addressed to exactly one session.
#[derive(Default)]
pub struct SessionRegistry {
    senders: DashMap<i64, mpsc::UnboundedSender<ServerFrame>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-upgraded session, returning the sending half
    /// (so the caller can later prove via `is_current` that it still owns
    /// the registry entry) and the receiving half the writer task should
    /// drain. Replacing an existing entry for the same `agent_id` implicitly
    /// evicts the prior session's queue (its writer task observes its
    /// receiver dropped and closes the connection), matching spec.md §6's
    /// "4000 duplicate session" close code.
    pub fn register(
        &self,
        agent_id: i64,
    ) -> (mpsc::UnboundedSender<ServerFrame>, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(agent_id, tx.clone());
        (tx, rx)
    }

    pub fn unregister(&self, agent_id: i64) {
        self.senders.remove(&agent_id);
    }

    pub fn is_current(&self, agent_id: i64, tx: &mpsc::UnboundedSender<ServerFrame>) -> bool {
        self.senders
            .get(&agent_id)
            .map(|entry| entry.same_channel(tx))
            .unwrap_or(false)
    }

    pub fn send(&self, agent_id: i64, frame: ServerFrame) -> bool {
        match self.senders.get(&agent_id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self, agent_id: i64) -> bool {
        self.senders.contains_key(&agent_id)
    }
}

/// Implements `kh_scheduler::AgentDispatch` over the live session registry,
/// letting kh-scheduler hand off frames without knowing anything about
/// WebSockets. Frames addressed to a disconnected agent are silently
/// dropped — the scheduler's next tick will reclaim the task once its
/// reconnect grace expires.
pub struct BridgeDispatch {
    pub sessions: std::sync::Arc<SessionRegistry>,
}

#[async_trait::async_trait]
impl kh_scheduler::AgentDispatch for BridgeDispatch {
    async fn send_task_assignment(&self, agent_id: i64, assignment: kh_scheduler::TaskAssignment) {
        if !self.sessions.send(agent_id, ServerFrame::from(assignment)) {
            tracing::debug!(agent_id, "dropping task_assignment: agent not connected");
        }
    }

    async fn send_cancel_task(&self, agent_id: i64, task_id: uuid::Uuid, reason: &str) {
        let frame = ServerFrame::CancelTask {
            task_id,
            reason: reason.to_string(),
        };
        if !self.sessions.send(agent_id, frame) {
            tracing::debug!(agent_id, %task_id, "dropping cancel_task: agent not connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_evicts_prior_session() {
        let registry = SessionRegistry::new();
        let (first_tx, first_rx) = registry.register(1);
        let (_second_tx, _second_rx) = registry.register(1);
        // The first session no longer owns the registry entry.
        assert!(!registry.is_current(1, &first_tx));
        drop(first_rx);
        assert!(registry.is_connected(1));
    }

    #[test]
    fn send_to_unknown_agent_returns_false() {
        let registry = SessionRegistry::new();
        assert!(!registry.send(42, ServerFrame::CancelTask { task_id: uuid::Uuid::nil(), reason: "x".into() }));
    }
}
