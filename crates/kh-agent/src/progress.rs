use chrono::{DateTime, Utc};
use kh_core::store::Store;
use kh_core::types::{JobStatus, TaskStatus};

use crate::state_machine::{TaskEvent, TaskStateMachine};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("task not found")]
    TaskNotFound,

    #[error("job not found")]
    JobNotFound,

    #[error("store error: {0}")]
    Store(#[from] kh_core::error::KhError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Smoothing factor for the task's `average_speed` EWMA (spec.md §4.6).
const SPEED_EWMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Copy)]
pub struct TaskProgressFrame {
    pub keyspace_processed: u64,
    pub speed_hps: f64,
}

/// Applies one `task_progress` frame. Idempotent: re-applying the same
/// (non-increasing) `keyspace_processed` is a no-op, so a retransmitted
/// frame never double-counts into `job.processed_keyspace`.
pub async fn apply_task_progress(
    store: &Store,
    task_id: uuid::Uuid,
    frame: TaskProgressFrame,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut task = store
        .get_task(task_id)
        .await?
        .ok_or(IngestError::TaskNotFound)?;

    if task.status.is_terminal() {
        return Ok(false);
    }

    let new_processed = frame.keyspace_processed.max(task.keyspace_processed);
    if new_processed == task.keyspace_processed {
        return Ok(false);
    }
    let delta = new_processed - task.keyspace_processed;

    let mut job = store.get_job(task.job_id).await?.ok_or(IngestError::JobNotFound)?;

    task.keyspace_processed = new_processed;
    task.last_checkpoint = Some(now);
    task.average_speed = Some(match task.average_speed {
        Some(prev) => SPEED_EWMA_ALPHA * frame.speed_hps + (1.0 - SPEED_EWMA_ALPHA) * prev,
        None => frame.speed_hps,
    });
    if task.status == TaskStatus::Assigned {
        task.status = TaskStatus::Running;
        task.started_at.get_or_insert(now);
    }

    job.processed_keyspace += delta;
    job.updated_at = now;

    store.update_task_and_job(&task, &job).await?;
    Ok(true)
}

/// Applies a terminal `task_status` frame (`completed`, `failed`,
/// `cancelled`). An agent-reported `completed` is only honored when the
/// agent's own `final_keyspace_processed` reaches `keyspace_end` (minus a
/// rounding epsilon) or the owning hashlist is already fully cracked;
/// otherwise the frame is coerced to `failed` with `partial_completion`.
pub async fn apply_task_status(
    store: &Store,
    task_id: uuid::Uuid,
    reported: ReportedStatus,
    final_keyspace_processed: Option<u64>,
    error_message: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut task = store
        .get_task(task_id)
        .await?
        .ok_or(IngestError::TaskNotFound)?;
    if task.status.is_terminal() {
        return Ok(());
    }
    let mut job = store.get_job(task.job_id).await?.ok_or(IngestError::JobNotFound)?;

    const EPSILON: u64 = 0;
    let hashlist_fully_cracked = store
        .get_hashlist(job.hashlist_id)
        .await?
        .map(|h| h.is_fully_cracked())
        .unwrap_or(false);

    let mut sm = TaskStateMachine::new(task.status);

    let effective = match reported {
        ReportedStatus::Completed => {
            let reached_end = final_keyspace_processed
                .unwrap_or(task.keyspace_processed)
                >= task.keyspace_end.saturating_sub(EPSILON);
            if reached_end || hashlist_fully_cracked {
                ReportedStatus::Completed
            } else {
                ReportedStatus::Failed
            }
        }
        other => other,
    };

    match effective {
        ReportedStatus::Completed => {
            sm.transition(TaskEvent::Complete)
                .map_err(|_| IngestError::TaskNotFound)?;
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            job.processed_keyspace = job
                .processed_keyspace
                .saturating_add(task.keyspace_end.saturating_sub(task.keyspace_processed));
            task.keyspace_processed = task.keyspace_end;
            job.consecutive_failures = 0;
            if job.processed_keyspace >= job.effective_keyspace || hashlist_fully_cracked {
                job.status = JobStatus::Completed;
            }
        }
        ReportedStatus::Failed => {
            sm.transition(TaskEvent::Fail)
                .map_err(|_| IngestError::TaskNotFound)?;
            task.status = TaskStatus::Failed;
            task.completed_at = Some(now);
            task.error_message = error_message.or_else(|| Some("partial_completion".to_string()));
            let undispatched_remainder = task.keyspace_end.saturating_sub(task.keyspace_processed);
            job.dispatched_keyspace = job.dispatched_keyspace.saturating_sub(undispatched_remainder);
            job.consecutive_failures += 1;
        }
        ReportedStatus::Cancelled => {
            sm.transition(TaskEvent::Cancel)
                .map_err(|_| IngestError::TaskNotFound)?;
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
        }
        ReportedStatus::Running => {}
    }

    job.updated_at = now;
    store.update_task_and_job(&task, &job).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kh_core::types::{AttackMode, Job, Task};
    use uuid::Uuid;

    async fn seed_hashlist_and_binary(store: &Store) {
        store
            .execute_batch_for_test(
                "INSERT INTO hashlists (id, client_id, hash_mode, total, cracked_count, file_path, created_at)
                 VALUES (1, NULL, 0, 1, 0, '/tmp/x.hash', '2026-01-01T00:00:00Z');
                 INSERT INTO hashes (id, hash_value, is_cracked) VALUES (1, 'x', 0);
                 INSERT INTO hashlist_hashes (hashlist_id, hash_id) VALUES (1, 1);
                 INSERT INTO binary_versions (id, binary_type, compression_type, source_url,
                     file_name, md5_hash, file_size, is_active, verification_status, is_default)
                 VALUES (1, 'hashcat', 'none', 'http://x', 'hashcat', 'abc', 100, 1, 'verified', 1);",
            )
            .await
            .unwrap();
    }

    async fn seed_job_and_task(store: &Store) -> (Job, Task) {
        let now = Utc::now();
        seed_hashlist_and_binary(store).await;
        let hashlist_id = 1;

        let job = Job {
            id: Uuid::new_v4(),
            preset_job_id: Uuid::new_v4(),
            hashlist_id,
            name: "job".into(),
            status: kh_core::types::JobStatus::Running,
            priority: 0,
            max_agents: 1,
            allow_high_priority_override: false,
            attack_mode: AttackMode::Straight,
            wordlist_ids: vec![1],
            rule_ids: vec![],
            mask: None,
            binary_version_id: 1,
            chunk_duration_seconds: 6,
            additional_args: None,
            base_keyspace: 3,
            effective_keyspace: 3,
            multiplication_factor: 1,
            uses_rule_splitting: false,
            dispatched_keyspace: 3,
            processed_keyspace: 0,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert_job(&job).await.unwrap();

        let task = Task {
            id: Uuid::new_v4(),
            job_id: job.id,
            agent_id: Some(1),
            status: TaskStatus::Running,
            keyspace_start: 0,
            keyspace_end: 3,
            keyspace_processed: 0,
            effective_keyspace_start: None,
            effective_keyspace_end: None,
            effective_keyspace_processed: None,
            benchmark_speed: Some(10_000.0),
            average_speed: None,
            chunk_duration: 6,
            retry_count: 0,
            error_message: None,
            crack_count: 0,
            assigned_at: Some(now),
            started_at: Some(now),
            last_checkpoint: None,
            completed_at: None,
            detailed_status: None,
        };
        store.insert_task(&task).await.unwrap();
        (job, task)
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_idempotent() {
        let store = Store::new_in_memory().await.unwrap();
        let (job, task) = seed_job_and_task(&store).await;
        let now = Utc::now();

        let applied = apply_task_progress(
            &store,
            task.id,
            TaskProgressFrame { keyspace_processed: 2, speed_hps: 10_000.0 },
            now,
        )
        .await
        .unwrap();
        assert!(applied);

        let reapplied = apply_task_progress(
            &store,
            task.id,
            TaskProgressFrame { keyspace_processed: 2, speed_hps: 10_000.0 },
            now,
        )
        .await
        .unwrap();
        assert!(!reapplied);

        let updated_job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated_job.processed_keyspace, 2);
    }

    #[tokio::test]
    async fn completion_closes_rounding_gap_and_completes_job() {
        let store = Store::new_in_memory().await.unwrap();
        let (job, task) = seed_job_and_task(&store).await;
        let now = Utc::now();

        apply_task_progress(
            &store,
            task.id,
            TaskProgressFrame { keyspace_processed: 3, speed_hps: 10_000.0 },
            now,
        )
        .await
        .unwrap();

        apply_task_status(&store, task.id, ReportedStatus::Completed, Some(3), None, now)
            .await
            .unwrap();

        let final_task = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(final_task.status, TaskStatus::Completed);
        let final_job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(final_job.processed_keyspace, 3);
        assert_eq!(final_job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn premature_completion_is_coerced_to_failed() {
        let store = Store::new_in_memory().await.unwrap();
        let (job, task) = seed_job_and_task(&store).await;
        let now = Utc::now();

        apply_task_status(&store, task.id, ReportedStatus::Completed, Some(1), None, now)
            .await
            .unwrap();

        let final_task = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(final_task.status, TaskStatus::Failed);
        assert_eq!(final_task.error_message.as_deref(), Some("partial_completion"));
        let final_job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(final_job.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn failed_task_rolls_back_dispatched_remainder() {
        let store = Store::new_in_memory().await.unwrap();
        let (job, task) = seed_job_and_task(&store).await;
        let now = Utc::now();

        apply_task_progress(
            &store,
            task.id,
            TaskProgressFrame { keyspace_processed: 1, speed_hps: 10_000.0 },
            now,
        )
        .await
        .unwrap();

        apply_task_status(
            &store,
            task.id,
            ReportedStatus::Failed,
            None,
            Some("hashcat crashed".into()),
            now,
        )
        .await
        .unwrap();

        let final_job = store.get_job(job.id).await.unwrap().unwrap();
        // dispatched was 3, undispatched remainder was end(3) - processed(1) = 2
        assert_eq!(final_job.dispatched_keyspace, 1);
    }
}
