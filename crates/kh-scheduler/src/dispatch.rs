use kh_core::types::{AttackMode, Task};

/// The `task_assignment` server→agent frame (spec.md §4.5). kh-scheduler
/// produces these; kh-bridge serializes and writes them to the agent's
/// control-channel WebSocket.
#[derive(Debug, Clone)]
pub struct TaskAssignment {
    pub task_id: uuid::Uuid,
    pub job_id: uuid::Uuid,
    pub keyspace_start: u64,
    pub keyspace_end: u64,
    pub attack_mode: AttackMode,
    pub wordlist_ids: Vec<i64>,
    pub rule_ids: Vec<i64>,
    pub mask: Option<String>,
    pub additional_args: Option<String>,
    pub binary_version_id: i64,
    pub hashlist_id: i64,
    pub chunk_duration: i64,
}

impl TaskAssignment {
    pub fn from_task(task: &Task, attack_mode: AttackMode, wordlist_ids: Vec<i64>, rule_ids: Vec<i64>, mask: Option<String>, additional_args: Option<String>, binary_version_id: i64, hashlist_id: i64) -> Self {
        Self {
            task_id: task.id,
            job_id: task.job_id,
            keyspace_start: task.keyspace_start,
            keyspace_end: task.keyspace_end,
            attack_mode,
            wordlist_ids,
            rule_ids,
            mask,
            additional_args,
            binary_version_id,
            hashlist_id,
            chunk_duration: task.chunk_duration,
        }
    }
}

/// Abstracts "deliver this frame to a live agent session" so kh-scheduler
/// doesn't depend on kh-bridge's WebSocket machinery directly — mirrors the
/// event-bus seam the teacher uses between its daemon and bridge crates.
#[async_trait::async_trait]
pub trait AgentDispatch: Send + Sync {
    async fn send_task_assignment(&self, agent_id: i64, assignment: TaskAssignment);
    async fn send_cancel_task(&self, agent_id: i64, task_id: uuid::Uuid, reason: &str);
}

/// No-op dispatcher for tests and for ticks run with no bridge attached.
pub struct NullDispatch;

#[async_trait::async_trait]
impl AgentDispatch for NullDispatch {
    async fn send_task_assignment(&self, _agent_id: i64, _assignment: TaskAssignment) {}
    async fn send_cancel_task(&self, _agent_id: i64, _task_id: uuid::Uuid, _reason: &str) {}
}
