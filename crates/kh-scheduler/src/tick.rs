use std::sync::Arc;

use chrono::{DateTime, Utc};
use kh_agent::BenchmarkCache;
use kh_core::chunk_sizer::{size_chunk, DEFAULT_MIN_CHUNK_SIZE};
use kh_core::store::Store;
use kh_core::types::{
    Agent, AgentSchedule, FAILURE_THRESHOLD, HIGH_PRIORITY_THRESHOLD, Job, JobStatus, Task,
    TaskStatus,
};
use kh_core::{availability, KhError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::{AgentDispatch, TaskAssignment};

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("store error: {0}")]
    Store(#[from] KhError),
}

pub type Result<T> = std::result::Result<T, TickError>;

/// Counts of what a single scheduler tick did — returned so the daemon can
/// log a one-line summary the way the teacher's patrol loop does.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    pub reaped_to_reconnect_pending: usize,
    pub reaped_to_failed: usize,
    pub tasks_created: usize,
    pub interruptions: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
}

/// One full pass of spec.md §4.4's scheduler loop. Not safe to run
/// concurrently against the same store — callers serialize ticks with a
/// single-flight lock (see `SchedulerLoop`).
pub async fn run_tick(
    store: &Store,
    dispatch: &dyn AgentDispatch,
    benchmarks: &BenchmarkCache,
    now: DateTime<Utc>,
) -> Result<TickReport> {
    let mut report = TickReport::default();
    let settings = store.get_settings().await?;

    reap_stale_tasks(store, now, settings.reconnect_grace_seconds, &mut report).await?;

    let eligible_jobs = store.list_eligible_jobs().await?;
    let mut available_agents = gather_available_agents(store, settings.agent_scheduling_enabled, now).await?;

    for job in &eligible_jobs {
        match_job(store, dispatch, benchmarks, job, &mut available_agents, now, &mut report).await?;
    }

    if settings.job_interruption_enabled {
        priority_interrupt(store, dispatch, &eligible_jobs, &mut available_agents, now, &mut report).await?;
    }

    advance_job_states(store, now, &mut report).await?;

    Ok(report)
}

async fn reap_stale_tasks(
    store: &Store,
    now: DateTime<Utc>,
    grace_seconds: i64,
    report: &mut TickReport,
) -> Result<()> {
    for task in store.list_stale_tasks(now, grace_seconds).await? {
        let mut task = task;
        task.status = TaskStatus::ReconnectPending;
        store.update_task(&task).await?;
        report.reaped_to_reconnect_pending += 1;
    }

    for task in store.list_reconnect_pending_older_than(now, grace_seconds).await? {
        let mut task = task;
        let mut job = match store.get_job(task.job_id).await? {
            Some(j) => j,
            None => continue,
        };
        job.dispatched_keyspace = task.keyspace_start + task.keyspace_processed;
        job.consecutive_failures += 1;
        job.updated_at = now;
        task.status = TaskStatus::Failed;
        task.completed_at = Some(now);
        store.update_task(&task).await?;
        store.update_job(&job).await?;
        report.reaped_to_failed += 1;
    }
    Ok(())
}

async fn gather_available_agents(
    store: &Store,
    global_scheduling_enabled: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Agent>> {
    let candidates = store.list_candidate_agents().await?;
    let all_schedules = store.list_all_schedules().await?;
    let mut out = Vec::new();
    for agent in candidates {
        let schedules: Vec<AgentSchedule> =
            all_schedules.iter().filter(|s| s.agent_id == agent.id).cloned().collect();
        if availability::is_available(&agent, global_scheduling_enabled, &schedules, now) {
            out.push(agent);
        }
    }
    Ok(out)
}

async fn match_job(
    store: &Store,
    dispatch: &dyn AgentDispatch,
    benchmarks: &BenchmarkCache,
    job: &Job,
    available_agents: &mut Vec<Agent>,
    now: DateTime<Utc>,
    report: &mut TickReport,
) -> Result<()> {
    // Owned, advancing copy of the job — each iteration's dispatched_keyspace
    // must be visible to the next iteration so a second (or third) agent on
    // the same job starts its chunk where the previous one left off.
    let mut job = job.clone();
    loop {
        if job.dispatched_keyspace >= job.effective_keyspace {
            break;
        }
        let running_tasks = store.list_tasks_for_job(job.id).await?;
        let active_agent_count = running_tasks
            .iter()
            .filter(|t| t.status.is_live())
            .count() as i32;
        if active_agent_count >= job.max_agents {
            break;
        }
        let Some(pos) = available_agents.iter().position(|_| true) else {
            break;
        };
        let agent = available_agents.remove(pos);

        let remaining = job.effective_keyspace - job.dispatched_keyspace;
        let speed = benchmarks.get(agent.id, job.attack_mode.as_numeric()).unwrap_or(0.0) as u64;
        if speed == 0 {
            // No speed sample yet — agent still needs a benchmark_request;
            // give the agent back to the pool for the next job/tick.
            available_agents.push(agent);
            break;
        }
        let chunk = size_chunk(
            speed,
            job.chunk_duration_seconds as u64,
            job.dispatched_keyspace,
            remaining,
            DEFAULT_MIN_CHUNK_SIZE,
        );

        job.dispatched_keyspace = chunk.end;
        job.updated_at = now;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Running;
        }

        let task = Task {
            id: Uuid::new_v4(),
            job_id: job.id,
            agent_id: Some(agent.id),
            status: TaskStatus::Assigned,
            keyspace_start: chunk.start,
            keyspace_end: chunk.end,
            keyspace_processed: 0,
            effective_keyspace_start: None,
            effective_keyspace_end: None,
            effective_keyspace_processed: None,
            benchmark_speed: Some(speed as f64),
            average_speed: None,
            chunk_duration: job.chunk_duration_seconds,
            retry_count: 0,
            error_message: None,
            crack_count: 0,
            assigned_at: Some(now),
            started_at: None,
            last_checkpoint: None,
            completed_at: None,
            detailed_status: None,
        };

        store.update_job(&job).await?;
        store.insert_task(&task).await?;
        report.tasks_created += 1;

        let assignment = TaskAssignment::from_task(
            &task,
            job.attack_mode,
            job.wordlist_ids.clone(),
            job.rule_ids.clone(),
            job.mask.clone(),
            job.additional_args.clone(),
            job.binary_version_id,
            job.hashlist_id,
        );
        dispatch.send_task_assignment(agent.id, assignment).await;
        info!(job_id = %job.id, task_id = %task.id, agent_id = agent.id, chunk_size = chunk.size(), "task dispatched");
    }
    Ok(())
}

/// Spec.md §4.4 step 5: a starving high-priority job preempts the
/// lowest-priority currently-running job's agent.
async fn priority_interrupt(
    store: &Store,
    dispatch: &dyn AgentDispatch,
    eligible_jobs: &[Job],
    available_agents: &mut Vec<Agent>,
    now: DateTime<Utc>,
    report: &mut TickReport,
) -> Result<()> {
    for job in eligible_jobs {
        if job.priority < HIGH_PRIORITY_THRESHOLD || !job.allow_high_priority_override {
            continue;
        }
        if job.dispatched_keyspace >= job.effective_keyspace {
            continue;
        }
        let tasks = store.list_tasks_for_job(job.id).await?;
        if tasks.iter().any(|t| t.status.is_live()) || !available_agents.is_empty() {
            continue;
        }

        let running_jobs = store.list_running_jobs_by_priority_asc().await?;
        let Some(victim) = running_jobs.into_iter().find(|l| l.priority < job.priority) else {
            continue;
        };
        let victim_tasks = store.list_tasks_for_job(victim.id).await?;
        let Some(mut victim_task) = victim_tasks.into_iter().find(|t| t.status.is_live()) else {
            continue;
        };
        let Some(agent_id) = victim_task.agent_id else {
            continue;
        };

        dispatch.send_cancel_task(agent_id, victim_task.id, "priority_interruption").await;

        let mut victim_job = victim;
        let undispatched_remainder = victim_task.keyspace_end.saturating_sub(victim_task.keyspace_processed);
        victim_job.dispatched_keyspace = victim_job.dispatched_keyspace.saturating_sub(undispatched_remainder);
        victim_task.status = TaskStatus::Cancelled;
        victim_task.completed_at = Some(now);
        store.update_task(&victim_task).await?;

        let remaining_live = store
            .list_tasks_for_job(victim_job.id)
            .await?
            .iter()
            .filter(|t| t.status.is_live())
            .count();
        if remaining_live == 0 {
            victim_job.status = JobStatus::Pending;
        }
        victim_job.updated_at = now;
        store.update_job(&victim_job).await?;

        warn!(winner_job = %job.id, loser_job = %victim_job.id, agent_id, "priority interruption");
        report.interruptions += 1;
    }
    Ok(())
}

async fn advance_job_states(store: &Store, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
    for job in store.list_eligible_jobs().await? {
        let mut job = job;
        let hashlist = store.get_hashlist(job.hashlist_id).await?;
        let fully_cracked = hashlist.map(|h| h.is_fully_cracked()).unwrap_or(false);

        if job.status != JobStatus::Completed
            && (job.processed_keyspace >= job.effective_keyspace || fully_cracked)
        {
            job.status = JobStatus::Completed;
            job.updated_at = now;
            store.update_job(&job).await?;
            report.jobs_completed += 1;
            continue;
        }

        if job.status != JobStatus::Failed && job.consecutive_failures >= FAILURE_THRESHOLD {
            job.status = JobStatus::Failed;
            job.updated_at = now;
            store.update_job(&job).await?;
            report.jobs_failed += 1;
        }
    }
    Ok(())
}

/// Serializes ticks with a single-flight async lock so concurrent timers
/// (or a slow tick overrunning the interval) never interleave two passes
/// over the same database snapshot.
pub struct SchedulerLoop {
    store: Arc<Store>,
    dispatch: Arc<dyn AgentDispatch>,
    benchmarks: Arc<BenchmarkCache>,
    lock: tokio::sync::Mutex<()>,
}

impl SchedulerLoop {
    pub fn new(store: Arc<Store>, dispatch: Arc<dyn AgentDispatch>, benchmarks: Arc<BenchmarkCache>) -> Self {
        Self {
            store,
            dispatch,
            benchmarks,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let _guard = self.lock.lock().await;
        run_tick(&self.store, self.dispatch.as_ref(), &self.benchmarks, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NullDispatch;
    use kh_core::types::{AttackMode, ClaimVoucher};

    async fn seed_binary_and_hashlist(store: &Store) {
        store
            .execute_batch_for_test(
                "INSERT INTO hashlists (id, client_id, hash_mode, total, cracked_count, file_path, created_at)
                 VALUES (1, NULL, 0, 1, 0, '/tmp/x.hash', '2020-01-01T00:00:00Z');
                 INSERT INTO hashes (id, hash_value, is_cracked) VALUES (1, 'x', 0);
                 INSERT INTO hashlist_hashes (hashlist_id, hash_id) VALUES (1, 1);
                 INSERT INTO binary_versions (id, binary_type, compression_type, source_url,
                     file_name, md5_hash, file_size, is_active, verification_status, is_default)
                 VALUES (1, 'hashcat', 'none', 'http://x', 'hashcat', 'abc', 100, 1, 'verified', 1);",
            )
            .await
            .unwrap();
    }

    async fn seed_active_agent(store: &Store, name: &str) -> i64 {
        let voucher = ClaimVoucher::new(format!("code-{name}"), name, false);
        store.insert_claim_voucher(&voucher).await.unwrap();
        let mut agent = Agent::new(name, format!("{:0<64}", name));
        agent.status = kh_core::types::AgentStatus::Active;
        let id = store.insert_agent(&agent).await.unwrap();
        agent.id = id;
        store.update_agent(&agent).await.unwrap();
        store
            .upsert_device(&kh_core::types::AgentDevice {
                agent_id: id,
                device_id: 0,
                device_type: kh_core::types::DeviceType::Gpu,
                device_name: "gpu0".into(),
                enabled: true,
            })
            .await
            .unwrap();
        id
    }

    fn sample_job() -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            preset_job_id: Uuid::new_v4(),
            hashlist_id: 1,
            name: "job".into(),
            status: JobStatus::Pending,
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
            dispatched_keyspace: 0,
            processed_keyspace: 0,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn tick_assigns_single_chunk_to_available_agent() {
        let store = Store::new_in_memory().await.unwrap();
        seed_binary_and_hashlist(&store).await;
        let agent_id = seed_active_agent(&store, "rig1").await;
        let job = sample_job();
        store.insert_job(&job).await.unwrap();

        let benchmarks = BenchmarkCache::new();
        benchmarks.record(agent_id, AttackMode::Straight.as_numeric(), 10_000.0);

        let report = run_tick(&store, &NullDispatch, &benchmarks, Utc::now()).await.unwrap();
        assert_eq!(report.tasks_created, 1);

        let tasks = store.list_tasks_for_job(job.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].keyspace_end, 3);
    }

    #[tokio::test]
    async fn agent_without_benchmark_sample_is_skipped() {
        let store = Store::new_in_memory().await.unwrap();
        seed_binary_and_hashlist(&store).await;
        seed_active_agent(&store, "rig2").await;
        let job = sample_job();
        store.insert_job(&job).await.unwrap();

        let benchmarks = BenchmarkCache::new();
        let report = run_tick(&store, &NullDispatch, &benchmarks, Utc::now()).await.unwrap();
        assert_eq!(report.tasks_created, 0);
    }
}
