use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AttackMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    Straight = 0,
    Combination = 1,
    BruteForce = 3,
    HybridWm = 6,
    HybridMw = 7,
    Association = 9,
}

impl AttackMode {
    pub fn from_numeric(n: i32) -> Option<Self> {
        match n {
            0 => Some(Self::Straight),
            1 => Some(Self::Combination),
            3 => Some(Self::BruteForce),
            6 => Some(Self::HybridWm),
            7 => Some(Self::HybridMw),
            9 => Some(Self::Association),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> i32 {
        *self as i32
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub api_key: String,
    pub status: AgentStatus,
    pub enabled: bool,
    pub owner_user_id: Option<i64>,
    pub extra_params: Option<String>,
    pub version: Option<String>,
    pub os_info: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduling_enabled: bool,
    pub schedule_timezone: String,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            api_key: api_key.into(),
            status: AgentStatus::Pending,
            enabled: true,
            owner_user_id: None,
            extra_params: None,
            version: None,
            os_info: None,
            last_heartbeat: None,
            last_error: None,
            scheduling_enabled: false,
            schedule_timezone: "UTC".to_string(),
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// ClaimVoucher
// ---------------------------------------------------------------------------

/// Single-use or continuous secret token an agent presents once, via
/// `POST /api/agent/register`, to obtain its `api_key`. Issuance is an admin
/// concern and out of scope here; this crate only redeems vouchers that
/// already exist in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVoucher {
    pub id: i64,
    pub code: String,
    pub continuous: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub agent_name: String,
    pub created_at: DateTime<Utc>,
}

impl ClaimVoucher {
    pub fn new(code: impl Into<String>, agent_name: impl Into<String>, continuous: bool) -> Self {
        Self {
            id: 0,
            code: code.into(),
            continuous,
            consumed_at: None,
            agent_name: agent_name.into(),
            created_at: Utc::now(),
        }
    }

    /// A single-use voucher is spent the moment it is redeemed; a continuous
    /// voucher stays valid for repeated agent re-registration (e.g. after a
    /// full reinstall) and is never marked consumed.
    pub fn is_redeemable(&self) -> bool {
        self.continuous || self.consumed_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// AgentDevice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Gpu,
    Cpu,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDevice {
    pub agent_id: i64,
    pub device_id: i32,
    pub device_type: DeviceType,
    pub device_name: String,
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// AgentSchedule
// ---------------------------------------------------------------------------

/// Day of week, 0 = Sunday .. 6 = Saturday (matches `chrono::Weekday::num_days_from_sunday`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSchedule {
    pub agent_id: i64,
    pub day_of_week: u8,
    /// "HH:MM" in UTC.
    pub start_time_utc: String,
    /// "HH:MM" in UTC.
    pub end_time_utc: String,
    pub is_active: bool,
    /// IANA zone the schedule was originally authored in, kept for audit.
    pub source_timezone: String,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Job transitions are almost all driven by the scheduler/ingester, not
    /// by a generic state machine, but the handful of legal edges are
    /// checked here so a stray caller can't resurrect a terminal job.
    pub fn can_transition_to(&self, target: &JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Pending) // priority interruption / reconnect rollback
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub preset_job_id: Uuid,
    pub hashlist_id: i64,
    pub name: String,
    pub status: JobStatus,
    pub priority: i32,
    pub max_agents: i32,
    pub allow_high_priority_override: bool,
    pub attack_mode: AttackMode,
    pub wordlist_ids: Vec<i64>,
    pub rule_ids: Vec<i64>,
    pub mask: Option<String>,
    pub binary_version_id: i64,
    pub chunk_duration_seconds: i64,
    pub additional_args: Option<String>,

    pub base_keyspace: u64,
    pub effective_keyspace: u64,
    pub multiplication_factor: u64,
    pub uses_rule_splitting: bool,
    pub dispatched_keyspace: u64,
    pub processed_keyspace: u64,

    pub consecutive_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Overall progress, 0.0..=100.0. Never panics on a zero-keyspace job.
    pub fn overall_progress_percent(&self) -> f64 {
        if self.effective_keyspace == 0 {
            return 0.0;
        }
        (self.processed_keyspace as f64 / self.effective_keyspace as f64) * 100.0
    }

    pub fn remaining_keyspace(&self) -> u64 {
        self.effective_keyspace.saturating_sub(self.dispatched_keyspace)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    ReconnectPending,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    pub agent_id: Option<i64>,
    pub status: TaskStatus,
    pub keyspace_start: u64,
    pub keyspace_end: u64,
    pub keyspace_processed: u64,
    pub effective_keyspace_start: Option<u64>,
    pub effective_keyspace_end: Option<u64>,
    pub effective_keyspace_processed: Option<u64>,
    pub benchmark_speed: Option<f64>,
    pub average_speed: Option<f64>,
    pub chunk_duration: i64,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub crack_count: i32,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub detailed_status: Option<String>,
}

impl Task {
    pub fn new(job_id: Uuid, keyspace_start: u64, keyspace_end: u64, chunk_duration: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            agent_id: None,
            status: TaskStatus::Pending,
            keyspace_start,
            keyspace_end,
            keyspace_processed: 0,
            effective_keyspace_start: None,
            effective_keyspace_end: None,
            effective_keyspace_processed: None,
            benchmark_speed: None,
            average_speed: None,
            chunk_duration,
            retry_count: 0,
            error_message: None,
            crack_count: 0,
            assigned_at: None,
            started_at: None,
            last_checkpoint: None,
            completed_at: None,
            detailed_status: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.keyspace_end.saturating_sub(self.keyspace_start)
    }
}

// ---------------------------------------------------------------------------
// Hashlist / Hash
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashlist {
    pub id: i64,
    pub client_id: Option<i64>,
    pub hash_mode: i32,
    pub total: i64,
    pub cracked_count: i64,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

impl Hashlist {
    pub fn is_fully_cracked(&self) -> bool {
        self.total > 0 && self.cracked_count >= self.total
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hash {
    pub id: i64,
    pub hash_value: String,
    pub is_cracked: bool,
    pub plaintext: Option<String>,
    pub cracked_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// BinaryVersion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryVersion {
    pub id: i64,
    pub binary_type: String,
    pub compression_type: String,
    pub source_url: String,
    pub file_name: String,
    pub md5_hash: String,
    pub file_size: i64,
    pub is_active: bool,
    pub verification_status: VerificationStatus,
    pub is_default: bool,
}

impl BinaryVersion {
    pub fn assignable(&self) -> bool {
        self.is_active && self.verification_status == VerificationStatus::Verified
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub default_chunk_duration_seconds: i64,
    pub reconnect_grace_seconds: i64,
    pub rule_split_enabled: bool,
    pub rule_split_threshold_ratio: f64,
    pub rule_split_min_rules: u64,
    pub rule_split_max_chunks: u32,
    pub job_interruption_enabled: bool,
    pub agent_scheduling_enabled: bool,
    pub default_retention_months: i32,
    pub last_purge_run: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_chunk_duration_seconds: 600,
            reconnect_grace_seconds: 60,
            rule_split_enabled: true,
            rule_split_threshold_ratio: 2.0,
            rule_split_min_rules: 10_000,
            rule_split_max_chunks: 16,
            job_interruption_enabled: true,
            agent_scheduling_enabled: true,
            default_retention_months: 6,
            last_purge_run: None,
        }
    }
}

/// Priority at/above which a job is eligible to trigger preemption of a
/// running lower-priority job (spec.md §4.4 step 5).
pub const HIGH_PRIORITY_THRESHOLD: i32 = 80;

/// Consecutive task failures after which a job transitions to `failed`.
pub const FAILURE_THRESHOLD: i32 = 5;
