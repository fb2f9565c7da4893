use chrono::{DateTime, Utc};
use kh_core::store::Store;
use kh_core::types::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum CrackIngestError {
    #[error("task not found")]
    TaskNotFound,

    #[error("job not found")]
    JobNotFound,

    #[error("store error: {0}")]
    Store(#[from] kh_core::error::KhError),
}

pub type Result<T> = std::result::Result<T, CrackIngestError>;

/// A single batched `crack_report` entry.
#[derive(Debug, Clone)]
pub struct CrackReport {
    pub hash_value: String,
    pub password: String,
}

/// Applies a (possibly batched) `crack_report` frame reported against
/// `task_id`. Each entry is applied exactly once (spec.md §8: "applying
/// `crack_report` twice for the same hash yields one increment"); unknown
/// hashes are dropped rather than erroring, since the agent may be racing a
/// hashlist edit it doesn't know about yet. When the owning hashlist
/// reaches full coverage, the job completes immediately even if dispatched
/// keyspace hasn't all been processed.
pub async fn apply_crack_reports(
    store: &Store,
    task_id: uuid::Uuid,
    hashlist_id: i64,
    reports: &[CrackReport],
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut task = store
        .get_task(task_id)
        .await?
        .ok_or(CrackIngestError::TaskNotFound)?;

    let mut applied = 0usize;
    for report in reports {
        let did_apply = store
            .apply_crack_report(&report.hash_value, &report.password, hashlist_id, now)
            .await?;
        if did_apply {
            applied += 1;
        }
    }

    if applied > 0 {
        task.crack_count += applied as i32;

        let mut job = store.get_job(task.job_id).await?.ok_or(CrackIngestError::JobNotFound)?;
        let hashlist = store.get_hashlist(hashlist_id).await?;
        if hashlist.map(|h| h.is_fully_cracked()).unwrap_or(false) && !job.status.is_terminal() {
            job.status = JobStatus::Completed;
        }
        job.updated_at = now;
        store.update_task_and_job(&task, &job).await?;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kh_core::types::{AttackMode, Job, Task, TaskStatus};
    use uuid::Uuid;

    async fn seed(store: &Store) -> (Job, Task) {
        let now = Utc::now();
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

        let job = Job {
            id: Uuid::new_v4(),
            preset_job_id: Uuid::new_v4(),
            hashlist_id: 1,
            name: "job".into(),
            status: JobStatus::Running,
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
            keyspace_processed: 1,
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
    async fn crack_completes_job_even_with_processed_less_than_effective() {
        let store = Store::new_in_memory().await.unwrap();
        let (job, task) = seed(&store).await;
        let now = Utc::now();

        let applied = apply_crack_reports(
            &store,
            task.id,
            1,
            &[CrackReport { hash_value: "x".into(), password: "p".into() }],
            now,
        )
        .await
        .unwrap();
        assert_eq!(applied, 1);

        let final_job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(final_job.status, JobStatus::Completed);
        let final_task = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(final_task.crack_count, 1);
    }

    #[tokio::test]
    async fn duplicate_crack_report_applies_only_once() {
        let store = Store::new_in_memory().await.unwrap();
        let (_job, task) = seed(&store).await;
        let now = Utc::now();

        let reports = vec![
            CrackReport { hash_value: "x".into(), password: "p".into() },
            CrackReport { hash_value: "x".into(), password: "p".into() },
        ];
        let applied = apply_crack_reports(&store, task.id, 1, &reports, now).await.unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn unknown_hash_is_dropped_without_error() {
        let store = Store::new_in_memory().await.unwrap();
        let (_job, task) = seed(&store).await;
        let now = Utc::now();

        let applied = apply_crack_reports(
            &store,
            task.id,
            1,
            &[CrackReport { hash_value: "not-there".into(), password: "p".into() }],
            now,
        )
        .await
        .unwrap();
        assert_eq!(applied, 0);
    }
}
