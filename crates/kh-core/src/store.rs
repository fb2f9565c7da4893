use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::{KhError, Result};
use crate::types::{
    Agent, AgentDevice, AgentSchedule, AgentStatus, AttackMode, BinaryVersion, ClaimVoucher,
    DeviceType, Hash, Hashlist, Job, JobStatus, Settings, Task, TaskStatus, VerificationStatus,
};

/// Async SQLite-backed durable store for agents, jobs, tasks, hashlists, and
/// settings. Every method's `conn.call` closure is synchronous `rusqlite`
/// code with no `.await` inside it, so a transaction never crosses a
/// suspension point.
pub struct Store {
    conn: Connection,
}

// ---------------------------------------------------------------------------
// enum <-> SQLite TEXT helpers
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

/// Keyspace integers can exceed `i64::MAX` for long brute-force masks, so
/// they're stored as decimal TEXT rather than SQLite's native INTEGER.
fn u64_to_sql(v: u64) -> String {
    v.to_string()
}

fn u64_from_sql(raw: &str) -> u64 {
    raw.parse().expect("valid u64 decimal")
}

fn opt_u64_to_sql(v: Option<u64>) -> Option<String> {
    v.map(u64_to_sql)
}

fn opt_u64_from_sql(raw: Option<String>) -> Option<u64> {
    raw.map(|s| u64_from_sql(&s))
}

impl Store {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Runs a raw SQL batch against the connection. Exists for seeding
    /// fixtures in other crates' tests; production code should go through
    /// the typed methods below.
    pub async fn execute_batch_for_test(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA foreign_keys=ON;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS agents (
                        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                        name                TEXT NOT NULL UNIQUE,
                        api_key             TEXT NOT NULL UNIQUE,
                        status              TEXT NOT NULL,
                        enabled             INTEGER NOT NULL DEFAULT 1,
                        owner_user_id       INTEGER,
                        extra_params        TEXT,
                        version             TEXT,
                        os_info             TEXT,
                        last_heartbeat      TEXT,
                        last_error          TEXT,
                        scheduling_enabled  INTEGER NOT NULL DEFAULT 0,
                        schedule_timezone   TEXT NOT NULL DEFAULT 'UTC',
                        created_at          TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);

                    CREATE TABLE IF NOT EXISTS agent_devices (
                        agent_id    INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                        device_id   INTEGER NOT NULL,
                        device_type TEXT NOT NULL,
                        device_name TEXT NOT NULL,
                        enabled     INTEGER NOT NULL DEFAULT 1,
                        PRIMARY KEY (agent_id, device_id)
                    );

                    CREATE TABLE IF NOT EXISTS agent_schedules (
                        agent_id        INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                        day_of_week     INTEGER NOT NULL,
                        start_time_utc  TEXT NOT NULL,
                        end_time_utc    TEXT NOT NULL,
                        is_active       INTEGER NOT NULL DEFAULT 1,
                        source_timezone TEXT NOT NULL,
                        PRIMARY KEY (agent_id, day_of_week)
                    );

                    CREATE TABLE IF NOT EXISTS binary_versions (
                        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                        binary_type         TEXT NOT NULL,
                        compression_type    TEXT NOT NULL,
                        source_url          TEXT NOT NULL,
                        file_name           TEXT NOT NULL,
                        md5_hash            TEXT NOT NULL,
                        file_size           INTEGER NOT NULL,
                        is_active           INTEGER NOT NULL DEFAULT 1,
                        verification_status TEXT NOT NULL,
                        is_default          INTEGER NOT NULL DEFAULT 0
                    );

                    CREATE TABLE IF NOT EXISTS hashlists (
                        id            INTEGER PRIMARY KEY AUTOINCREMENT,
                        client_id     INTEGER,
                        hash_mode     INTEGER NOT NULL,
                        total         INTEGER NOT NULL DEFAULT 0,
                        cracked_count INTEGER NOT NULL DEFAULT 0,
                        file_path     TEXT NOT NULL,
                        created_at    TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS hashes (
                        id          INTEGER PRIMARY KEY AUTOINCREMENT,
                        hash_value  TEXT NOT NULL UNIQUE,
                        is_cracked  INTEGER NOT NULL DEFAULT 0,
                        plaintext   TEXT,
                        cracked_at  TEXT
                    );
                    CREATE INDEX IF NOT EXISTS idx_hashes_value ON hashes(hash_value);

                    CREATE TABLE IF NOT EXISTS hashlist_hashes (
                        hashlist_id INTEGER NOT NULL REFERENCES hashlists(id) ON DELETE CASCADE,
                        hash_id     INTEGER NOT NULL REFERENCES hashes(id) ON DELETE CASCADE,
                        PRIMARY KEY (hashlist_id, hash_id)
                    );

                    CREATE TABLE IF NOT EXISTS jobs (
                        id                          TEXT PRIMARY KEY,
                        preset_job_id               TEXT NOT NULL,
                        hashlist_id                 INTEGER NOT NULL REFERENCES hashlists(id) ON DELETE CASCADE,
                        name                        TEXT NOT NULL,
                        status                      TEXT NOT NULL,
                        priority                    INTEGER NOT NULL DEFAULT 0,
                        max_agents                  INTEGER NOT NULL,
                        allow_high_priority_override INTEGER NOT NULL DEFAULT 0,
                        attack_mode                 INTEGER NOT NULL,
                        wordlist_ids                TEXT NOT NULL,
                        rule_ids                    TEXT NOT NULL,
                        mask                        TEXT,
                        binary_version_id           INTEGER NOT NULL,
                        chunk_duration_seconds      INTEGER NOT NULL,
                        additional_args             TEXT,
                        base_keyspace               TEXT NOT NULL,
                        effective_keyspace          TEXT NOT NULL,
                        multiplication_factor       TEXT NOT NULL,
                        uses_rule_splitting         INTEGER NOT NULL DEFAULT 0,
                        dispatched_keyspace         TEXT NOT NULL,
                        processed_keyspace          TEXT NOT NULL,
                        consecutive_failures        INTEGER NOT NULL DEFAULT 0,
                        created_at                  TEXT NOT NULL,
                        updated_at                  TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs(status, priority DESC, created_at ASC);

                    CREATE TABLE IF NOT EXISTS tasks (
                        id                              TEXT PRIMARY KEY,
                        job_id                          TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                        agent_id                        INTEGER REFERENCES agents(id),
                        status                          TEXT NOT NULL,
                        keyspace_start                  TEXT NOT NULL,
                        keyspace_end                    TEXT NOT NULL,
                        keyspace_processed              TEXT NOT NULL,
                        effective_keyspace_start         TEXT,
                        effective_keyspace_end           TEXT,
                        effective_keyspace_processed     TEXT,
                        benchmark_speed                 REAL,
                        average_speed                   REAL,
                        chunk_duration                  INTEGER NOT NULL,
                        retry_count                     INTEGER NOT NULL DEFAULT 0,
                        error_message                   TEXT,
                        crack_count                     INTEGER NOT NULL DEFAULT 0,
                        assigned_at                     TEXT,
                        started_at                      TEXT,
                        last_checkpoint                 TEXT,
                        completed_at                     TEXT,
                        detailed_status                 TEXT
                    );
                    CREATE INDEX IF NOT EXISTS idx_tasks_job ON tasks(job_id);
                    CREATE INDEX IF NOT EXISTS idx_tasks_agent_status ON tasks(agent_id, status);

                    CREATE TABLE IF NOT EXISTS claim_vouchers (
                        id           INTEGER PRIMARY KEY AUTOINCREMENT,
                        code         TEXT NOT NULL UNIQUE,
                        continuous   INTEGER NOT NULL DEFAULT 0,
                        consumed_at  TEXT,
                        agent_name   TEXT NOT NULL,
                        created_at   TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS settings (
                        id                              INTEGER PRIMARY KEY CHECK (id = 1),
                        default_chunk_duration_seconds  INTEGER NOT NULL,
                        reconnect_grace_seconds          INTEGER NOT NULL,
                        rule_split_enabled               INTEGER NOT NULL,
                        rule_split_threshold_ratio       REAL NOT NULL,
                        rule_split_min_rules             TEXT NOT NULL,
                        rule_split_max_chunks            INTEGER NOT NULL,
                        job_interruption_enabled         INTEGER NOT NULL,
                        agent_scheduling_enabled         INTEGER NOT NULL,
                        default_retention_months         INTEGER NOT NULL,
                        last_purge_run                   TEXT
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;

        self.ensure_settings_row().await
    }

    async fn ensure_settings_row(&self) -> Result<()> {
        let defaults = Settings::default();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO settings (
                        id, default_chunk_duration_seconds, reconnect_grace_seconds,
                        rule_split_enabled, rule_split_threshold_ratio, rule_split_min_rules,
                        rule_split_max_chunks, job_interruption_enabled, agent_scheduling_enabled,
                        default_retention_months, last_purge_run
                    ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
                    rusqlite::params![
                        defaults.default_chunk_duration_seconds,
                        defaults.reconnect_grace_seconds,
                        defaults.rule_split_enabled,
                        defaults.rule_split_threshold_ratio,
                        u64_to_sql(defaults.rule_split_min_rules),
                        defaults.rule_split_max_chunks,
                        defaults.job_interruption_enabled,
                        defaults.agent_scheduling_enabled,
                        defaults.default_retention_months,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub async fn get_settings(&self) -> Result<Settings> {
        self.conn
            .call(|conn| {
                conn.query_row(
                    "SELECT default_chunk_duration_seconds, reconnect_grace_seconds,
                            rule_split_enabled, rule_split_threshold_ratio, rule_split_min_rules,
                            rule_split_max_chunks, job_interruption_enabled, agent_scheduling_enabled,
                            default_retention_months, last_purge_run
                     FROM settings WHERE id = 1",
                    [],
                    |row| {
                        let min_rules: String = row.get(4)?;
                        let last_purge: Option<String> = row.get(9)?;
                        Ok(Settings {
                            default_chunk_duration_seconds: row.get(0)?,
                            reconnect_grace_seconds: row.get(1)?,
                            rule_split_enabled: row.get(2)?,
                            rule_split_threshold_ratio: row.get(3)?,
                            rule_split_min_rules: u64_from_sql(&min_rules),
                            rule_split_max_chunks: row.get(5)?,
                            job_interruption_enabled: row.get(6)?,
                            agent_scheduling_enabled: row.get(7)?,
                            default_retention_months: row.get(8)?,
                            last_purge_run: last_purge
                                .map(|s| parse_rfc3339(&s)),
                        })
                    },
                )
            })
            .await
            .map_err(Into::into)
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        let last_purge = settings.last_purge_run.map(|d| d.to_rfc3339());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE settings SET default_chunk_duration_seconds=?1, reconnect_grace_seconds=?2,
                        rule_split_enabled=?3, rule_split_threshold_ratio=?4, rule_split_min_rules=?5,
                        rule_split_max_chunks=?6, job_interruption_enabled=?7, agent_scheduling_enabled=?8,
                        default_retention_months=?9, last_purge_run=?10 WHERE id = 1",
                    rusqlite::params![
                        settings.default_chunk_duration_seconds,
                        settings.reconnect_grace_seconds,
                        settings.rule_split_enabled,
                        settings.rule_split_threshold_ratio,
                        u64_to_sql(settings.rule_split_min_rules),
                        settings.rule_split_max_chunks,
                        settings.job_interruption_enabled,
                        settings.agent_scheduling_enabled,
                        settings.default_retention_months,
                        last_purge,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Claim vouchers
    // -----------------------------------------------------------------------

    pub async fn insert_claim_voucher(&self, voucher: &ClaimVoucher) -> Result<i64> {
        let voucher = voucher.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO claim_vouchers (code, continuous, consumed_at, agent_name, created_at)
                     VALUES (?1,?2,?3,?4,?5)",
                    rusqlite::params![
                        voucher.code,
                        voucher.continuous,
                        voucher.consumed_at.map(|d| d.to_rfc3339()),
                        voucher.agent_name,
                        voucher.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn get_claim_voucher_by_code(&self, code: &str) -> Result<Option<ClaimVoucher>> {
        let code = code.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, code, continuous, consumed_at, agent_name, created_at
                     FROM claim_vouchers WHERE code = ?1",
                    rusqlite::params![code],
                    row_to_claim_voucher,
                )
                .optional()
            })
            .await
            .map_err(Into::into)
    }

    /// Marks a single-use voucher consumed. A no-op for continuous vouchers,
    /// which stay redeemable for repeat agent re-registration.
    pub async fn consume_claim_voucher(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE claim_vouchers SET consumed_at = ?1 WHERE id = ?2 AND continuous = 0",
                    rusqlite::params![at.to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub async fn insert_agent(&self, agent: &Agent) -> Result<i64> {
        let agent = agent.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO agents (name, api_key, status, enabled, owner_user_id,
                        extra_params, version, os_info, last_heartbeat, last_error,
                        scheduling_enabled, schedule_timezone, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                    rusqlite::params![
                        agent.name,
                        agent.api_key,
                        enum_to_sql(&agent.status),
                        agent.enabled,
                        agent.owner_user_id,
                        agent.extra_params,
                        agent.version,
                        agent.os_info,
                        agent.last_heartbeat.map(|d| d.to_rfc3339()),
                        agent.last_error,
                        agent.scheduling_enabled,
                        agent.schedule_timezone,
                        agent.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn update_agent(&self, agent: &Agent) -> Result<()> {
        let agent = agent.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE agents SET name=?2, status=?3, enabled=?4, owner_user_id=?5,
                        extra_params=?6, version=?7, os_info=?8, last_heartbeat=?9,
                        last_error=?10, scheduling_enabled=?11, schedule_timezone=?12
                     WHERE id=?1",
                    rusqlite::params![
                        agent.id,
                        agent.name,
                        enum_to_sql(&agent.status),
                        agent.enabled,
                        agent.owner_user_id,
                        agent.extra_params,
                        agent.version,
                        agent.os_info,
                        agent.last_heartbeat.map(|d| d.to_rfc3339()),
                        agent.last_error,
                        agent.scheduling_enabled,
                        agent.schedule_timezone,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn get_agent_by_id(&self, id: i64) -> Result<Option<Agent>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(AGENT_SELECT_BY_ID)?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_agent(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    pub async fn get_agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        let api_key = api_key.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, api_key, status, enabled, owner_user_id, extra_params,
                            version, os_info, last_heartbeat, last_error, scheduling_enabled,
                            schedule_timezone, created_at
                     FROM agents WHERE api_key = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![api_key])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_agent(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    /// Available per spec.md §4.4 step 3: enabled, active, at least one
    /// device enabled, at most one live task. Availability-window filtering
    /// happens in-memory via `kh_core::availability::is_available` because it
    /// needs the current instant, not something SQL should decide.
    pub async fn list_candidate_agents(&self) -> Result<Vec<Agent>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.id, a.name, a.api_key, a.status, a.enabled, a.owner_user_id,
                            a.extra_params, a.version, a.os_info, a.last_heartbeat, a.last_error,
                            a.scheduling_enabled, a.schedule_timezone, a.created_at
                     FROM agents a
                     WHERE a.enabled = 1 AND a.status = 'active'
                       AND EXISTS (SELECT 1 FROM agent_devices d WHERE d.agent_id = a.id AND d.enabled = 1)
                       AND (SELECT COUNT(*) FROM tasks t WHERE t.agent_id = a.id AND t.status IN ('assigned','running')) = 0",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_agent(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Agent devices
    // -----------------------------------------------------------------------

    pub async fn upsert_device(&self, device: &AgentDevice) -> Result<()> {
        let device = device.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO agent_devices (agent_id, device_id, device_type, device_name, enabled)
                     VALUES (?1,?2,?3,?4,?5)
                     ON CONFLICT(agent_id, device_id) DO UPDATE SET
                        device_type=excluded.device_type, device_name=excluded.device_name",
                    rusqlite::params![
                        device.agent_id,
                        device.device_id,
                        enum_to_sql(&device.device_type),
                        device.device_name,
                        device.enabled,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn set_device_enabled(&self, agent_id: i64, device_id: i32, enabled: bool) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE agent_devices SET enabled=?3 WHERE agent_id=?1 AND device_id=?2",
                    rusqlite::params![agent_id, device_id, enabled],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn list_devices_for_agent(&self, agent_id: i64) -> Result<Vec<AgentDevice>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT agent_id, device_id, device_type, device_name, enabled
                     FROM agent_devices WHERE agent_id = ?1 ORDER BY device_id",
                )?;
                let mut rows = stmt.query(rusqlite::params![agent_id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_device(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Agent schedules
    // -----------------------------------------------------------------------

    pub async fn upsert_schedule(&self, schedule: &AgentSchedule) -> Result<()> {
        let schedule = schedule.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO agent_schedules (agent_id, day_of_week, start_time_utc, end_time_utc, is_active, source_timezone)
                     VALUES (?1,?2,?3,?4,?5,?6)
                     ON CONFLICT(agent_id, day_of_week) DO UPDATE SET
                        start_time_utc=excluded.start_time_utc, end_time_utc=excluded.end_time_utc,
                        is_active=excluded.is_active, source_timezone=excluded.source_timezone",
                    rusqlite::params![
                        schedule.agent_id,
                        schedule.day_of_week,
                        schedule.start_time_utc,
                        schedule.end_time_utc,
                        schedule.is_active,
                        schedule.source_timezone,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn list_schedules_for_agent(&self, agent_id: i64) -> Result<Vec<AgentSchedule>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT agent_id, day_of_week, start_time_utc, end_time_utc, is_active, source_timezone
                     FROM agent_schedules WHERE agent_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![agent_id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_schedule(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn list_all_schedules(&self) -> Result<Vec<AgentSchedule>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT agent_id, day_of_week, start_time_utc, end_time_utc, is_active, source_timezone
                     FROM agent_schedules",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_schedule(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, preset_job_id, hashlist_id, name, status, priority,
                        max_agents, allow_high_priority_override, attack_mode, wordlist_ids,
                        rule_ids, mask, binary_version_id, chunk_duration_seconds, additional_args,
                        base_keyspace, effective_keyspace, multiplication_factor, uses_rule_splitting,
                        dispatched_keyspace, processed_keyspace, consecutive_failures, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24)",
                    rusqlite::params![
                        job.id.to_string(),
                        job.preset_job_id.to_string(),
                        job.hashlist_id,
                        job.name,
                        enum_to_sql(&job.status),
                        job.priority,
                        job.max_agents,
                        job.allow_high_priority_override,
                        job.attack_mode.as_numeric(),
                        serde_json::to_string(&job.wordlist_ids).expect("serialize ids"),
                        serde_json::to_string(&job.rule_ids).expect("serialize ids"),
                        job.mask,
                        job.binary_version_id,
                        job.chunk_duration_seconds,
                        job.additional_args,
                        u64_to_sql(job.base_keyspace),
                        u64_to_sql(job.effective_keyspace),
                        u64_to_sql(job.multiplication_factor),
                        job.uses_rule_splitting,
                        u64_to_sql(job.dispatched_keyspace),
                        u64_to_sql(job.processed_keyspace),
                        job.consecutive_failures,
                        job.created_at.to_rfc3339(),
                        job.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn update_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status=?2, priority=?3, dispatched_keyspace=?4,
                        processed_keyspace=?5, consecutive_failures=?6, updated_at=?7
                     WHERE id=?1",
                    rusqlite::params![
                        job.id.to_string(),
                        enum_to_sql(&job.status),
                        job.priority,
                        u64_to_sql(job.dispatched_keyspace),
                        u64_to_sql(job.processed_keyspace),
                        job.consecutive_failures,
                        job.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let id_str = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(JOB_SELECT)?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_job(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    /// pending/running jobs whose hashlist still has uncracked hashes and
    /// whose binary is verified, ordered `(priority DESC, created_at ASC)`
    /// (spec.md §4.4 step 2).
    pub async fn list_eligible_jobs(&self) -> Result<Vec<Job>> {
        self.conn
            .call(|conn| {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs j
                     JOIN hashlists h ON h.id = j.hashlist_id
                     JOIN binary_versions b ON b.id = j.binary_version_id
                     WHERE j.status IN ('pending', 'running')
                       AND h.cracked_count < h.total
                       AND b.is_active = 1 AND b.verification_status = 'verified'
                     ORDER BY j.priority DESC, j.created_at ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_job(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn list_running_jobs_by_priority_asc(&self) -> Result<Vec<Job>> {
        self.conn
            .call(|conn| {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs j WHERE j.status = 'running' ORDER BY j.priority ASC, j.created_at ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_job(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub async fn insert_task(&self, task: &Task) -> Result<()> {
        let task = task.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, job_id, agent_id, status, keyspace_start, keyspace_end,
                        keyspace_processed, effective_keyspace_start, effective_keyspace_end,
                        effective_keyspace_processed, benchmark_speed, average_speed, chunk_duration,
                        retry_count, error_message, crack_count, assigned_at, started_at,
                        last_checkpoint, completed_at, detailed_status)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
                    rusqlite::params![
                        task.id.to_string(),
                        task.job_id.to_string(),
                        task.agent_id,
                        enum_to_sql(&task.status),
                        u64_to_sql(task.keyspace_start),
                        u64_to_sql(task.keyspace_end),
                        u64_to_sql(task.keyspace_processed),
                        opt_u64_to_sql(task.effective_keyspace_start),
                        opt_u64_to_sql(task.effective_keyspace_end),
                        opt_u64_to_sql(task.effective_keyspace_processed),
                        task.benchmark_speed,
                        task.average_speed,
                        task.chunk_duration,
                        task.retry_count,
                        task.error_message,
                        task.crack_count,
                        task.assigned_at.map(|d| d.to_rfc3339()),
                        task.started_at.map(|d| d.to_rfc3339()),
                        task.last_checkpoint.map(|d| d.to_rfc3339()),
                        task.completed_at.map(|d| d.to_rfc3339()),
                        task.detailed_status,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn update_task(&self, task: &Task) -> Result<()> {
        let task = task.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE tasks SET agent_id=?2, status=?3, keyspace_processed=?4,
                        effective_keyspace_processed=?5, benchmark_speed=?6, average_speed=?7,
                        retry_count=?8, error_message=?9, crack_count=?10, assigned_at=?11,
                        started_at=?12, last_checkpoint=?13, completed_at=?14, detailed_status=?15
                     WHERE id=?1",
                    rusqlite::params![
                        task.id.to_string(),
                        task.agent_id,
                        enum_to_sql(&task.status),
                        u64_to_sql(task.keyspace_processed),
                        opt_u64_to_sql(task.effective_keyspace_processed),
                        task.benchmark_speed,
                        task.average_speed,
                        task.retry_count,
                        task.error_message,
                        task.crack_count,
                        task.assigned_at.map(|d| d.to_rfc3339()),
                        task.started_at.map(|d| d.to_rfc3339()),
                        task.last_checkpoint.map(|d| d.to_rfc3339()),
                        task.completed_at.map(|d| d.to_rfc3339()),
                        task.detailed_status,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    /// Writes a task and its owning job in one `rusqlite` transaction, so a
    /// crash between the two updates can never leave `job.processed_keyspace`
    /// (or any other job field derived from the task) out of sync with what
    /// was actually persisted for the task. Used everywhere progress/crack
    /// ingestion needs to advance both rows together.
    pub async fn update_task_and_job(&self, task: &Task, job: &Job) -> Result<()> {
        let task = task.clone();
        let job = job.clone();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE tasks SET agent_id=?2, status=?3, keyspace_processed=?4,
                        effective_keyspace_processed=?5, benchmark_speed=?6, average_speed=?7,
                        retry_count=?8, error_message=?9, crack_count=?10, assigned_at=?11,
                        started_at=?12, last_checkpoint=?13, completed_at=?14, detailed_status=?15
                     WHERE id=?1",
                    rusqlite::params![
                        task.id.to_string(),
                        task.agent_id,
                        enum_to_sql(&task.status),
                        u64_to_sql(task.keyspace_processed),
                        opt_u64_to_sql(task.effective_keyspace_processed),
                        task.benchmark_speed,
                        task.average_speed,
                        task.retry_count,
                        task.error_message,
                        task.crack_count,
                        task.assigned_at.map(|d| d.to_rfc3339()),
                        task.started_at.map(|d| d.to_rfc3339()),
                        task.last_checkpoint.map(|d| d.to_rfc3339()),
                        task.completed_at.map(|d| d.to_rfc3339()),
                        task.detailed_status,
                    ],
                )?;
                tx.execute(
                    "UPDATE jobs SET status=?2, priority=?3, dispatched_keyspace=?4,
                        processed_keyspace=?5, consecutive_failures=?6, updated_at=?7
                     WHERE id=?1",
                    rusqlite::params![
                        job.id.to_string(),
                        enum_to_sql(&job.status),
                        job.priority,
                        u64_to_sql(job.dispatched_keyspace),
                        u64_to_sql(job.processed_keyspace),
                        job.consecutive_failures,
                        job.updated_at.to_rfc3339(),
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let id_str = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(TASK_SELECT)?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_task(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    pub async fn list_tasks_for_job(&self, job_id: Uuid) -> Result<Vec<Task>> {
        let job_id = job_id.to_string();
        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = ?1");
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params![job_id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    /// Tasks in `assigned`/`running` owned by an agent that hasn't
    /// heartbeated for longer than `grace_seconds` (spec.md §4.4 step 1).
    pub async fn list_stale_tasks(&self, now: DateTime<Utc>, grace_seconds: i64) -> Result<Vec<Task>> {
        let cutoff = (now - chrono::Duration::seconds(grace_seconds)).to_rfc3339();
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM tasks t
                     JOIN agents a ON a.id = t.agent_id
                     WHERE t.status IN ('assigned','running')
                       AND (a.last_heartbeat IS NULL OR a.last_heartbeat < ?1)"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params![cutoff])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn list_reconnect_pending_older_than(
        &self,
        now: DateTime<Utc>,
        grace_seconds: i64,
    ) -> Result<Vec<Task>> {
        let cutoff = (now - chrono::Duration::seconds(grace_seconds)).to_rfc3339();
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM tasks t
                     WHERE t.status = 'reconnect_pending' AND (t.last_checkpoint IS NULL OR t.last_checkpoint < ?1)"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params![cutoff])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Hashlists / hashes
    // -----------------------------------------------------------------------

    pub async fn get_hashlist(&self, id: i64) -> Result<Option<Hashlist>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, client_id, hash_mode, total, cracked_count, file_path, created_at
                     FROM hashlists WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_hashlist(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    /// Hashlists created before `cutoff`, for the retention purger. `cutoff`
    /// is precomputed by the caller from the effective retention period (0
    /// months means "never expires" and the caller should skip calling this
    /// at all).
    pub async fn list_hashlists_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Hashlist>> {
        let cutoff = cutoff.to_rfc3339();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, client_id, hash_mode, total, cracked_count, file_path, created_at
                     FROM hashlists WHERE created_at < ?1",
                )?;
                let rows = stmt.query_map(rusqlite::params![cutoff], row_to_hashlist)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await
            .map_err(Into::into)
    }

    /// Deletes a hashlist row. Cascades to `hashlist_hashes`, `jobs`, and
    /// `tasks`; never touches clients, users, wordlists, rules, binaries,
    /// or the potfile (all out of scope here). Hash rows that become
    /// unreferenced are swept separately by `delete_orphan_hashes`.
    pub async fn delete_hashlist(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM hashlists WHERE id = ?1", rusqlite::params![id])?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    /// Deletes hash rows no longer referenced by any hashlist. Returns the
    /// number of rows removed.
    pub async fn delete_orphan_hashes(&self) -> Result<usize> {
        self.conn
            .call(|conn| {
                let n = conn.execute(
                    "DELETE FROM hashes WHERE id NOT IN (SELECT hash_id FROM hashlist_hashes)",
                    [],
                )?;
                Ok(n)
            })
            .await
            .map_err(Into::into)
    }

    /// Row-locked crack application (spec.md §4.6): SQLite serializes all
    /// writers, so reading then writing the hash row without yielding inside
    /// this closure is equivalent to `SELECT ... FOR UPDATE`.
    pub async fn apply_crack_report(
        &self,
        hash_value: &str,
        password: &str,
        hashlist_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let hash_value = hash_value.to_string();
        let password = password.to_string();
        let now = now.to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<(i64, bool)> = tx
                    .query_row(
                        "SELECT id, is_cracked FROM hashes WHERE hash_value = ?1",
                        rusqlite::params![hash_value],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let Some((hash_id, is_cracked)) = existing else {
                    return Ok(false);
                };
                if is_cracked {
                    return Ok(false);
                }

                tx.execute(
                    "UPDATE hashes SET is_cracked = 1, plaintext = ?2, cracked_at = ?3 WHERE id = ?1",
                    rusqlite::params![hash_id, password, now],
                )?;
                tx.execute(
                    "UPDATE hashlists SET cracked_count = cracked_count + 1
                     WHERE id = ?1 AND EXISTS (
                        SELECT 1 FROM hashlist_hashes WHERE hashlist_id = ?1 AND hash_id = ?2
                     )",
                    rusqlite::params![hashlist_id, hash_id],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Binary versions
    // -----------------------------------------------------------------------

    pub async fn get_binary_version(&self, id: i64) -> Result<Option<BinaryVersion>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, binary_type, compression_type, source_url, file_name, md5_hash,
                            file_size, is_active, verification_status, is_default
                     FROM binary_versions WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_binary_version(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    /// The assignable binary of `binary_type` to hand out via
    /// `GET /api/binary/latest`: the `is_default` one if active and
    /// verified, else the most recently added active+verified candidate.
    pub async fn get_latest_binary_version(&self, binary_type: &str) -> Result<Option<BinaryVersion>> {
        let binary_type = binary_type.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, binary_type, compression_type, source_url, file_name, md5_hash,
                            file_size, is_active, verification_status, is_default
                     FROM binary_versions
                     WHERE binary_type = ?1 AND is_active = 1 AND verification_status = 'verified'
                     ORDER BY is_default DESC, id DESC
                     LIMIT 1",
                )?;
                let mut rows = stmt.query(rusqlite::params![binary_type])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_binary_version(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).expect("valid date").with_timezone(&Utc)
}

const AGENT_SELECT_BY_ID: &str = "SELECT id, name, api_key, status, enabled, owner_user_id, extra_params,
    version, os_info, last_heartbeat, last_error, scheduling_enabled, schedule_timezone, created_at
    FROM agents WHERE id = ?1";

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let status_str: String = row.get(3)?;
    let last_heartbeat_str: Option<String> = row.get(9)?;
    let created_at_str: String = row.get(13)?;
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        api_key: row.get(2)?,
        status: enum_from_sql::<AgentStatus>(&status_str),
        enabled: row.get(4)?,
        owner_user_id: row.get(5)?,
        extra_params: row.get(6)?,
        version: row.get(7)?,
        os_info: row.get(8)?,
        last_heartbeat: last_heartbeat_str.map(|s| parse_rfc3339(&s)),
        last_error: row.get(10)?,
        scheduling_enabled: row.get(11)?,
        schedule_timezone: row.get(12)?,
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn row_to_claim_voucher(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClaimVoucher> {
    let consumed_at_str: Option<String> = row.get(3)?;
    let created_at_str: String = row.get(5)?;
    Ok(ClaimVoucher {
        id: row.get(0)?,
        code: row.get(1)?,
        continuous: row.get(2)?,
        consumed_at: consumed_at_str.map(|s| parse_rfc3339(&s)),
        agent_name: row.get(4)?,
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentDevice> {
    let device_type_str: String = row.get(2)?;
    Ok(AgentDevice {
        agent_id: row.get(0)?,
        device_id: row.get(1)?,
        device_type: enum_from_sql::<DeviceType>(&device_type_str),
        device_name: row.get(3)?,
        enabled: row.get(4)?,
    })
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentSchedule> {
    Ok(AgentSchedule {
        agent_id: row.get(0)?,
        day_of_week: row.get(1)?,
        start_time_utc: row.get(2)?,
        end_time_utc: row.get(3)?,
        is_active: row.get(4)?,
        source_timezone: row.get(5)?,
    })
}

const JOB_COLUMNS: &str = "j.id, j.preset_job_id, j.hashlist_id, j.name, j.status, j.priority,
    j.max_agents, j.allow_high_priority_override, j.attack_mode, j.wordlist_ids, j.rule_ids,
    j.mask, j.binary_version_id, j.chunk_duration_seconds, j.additional_args, j.base_keyspace,
    j.effective_keyspace, j.multiplication_factor, j.uses_rule_splitting, j.dispatched_keyspace,
    j.processed_keyspace, j.consecutive_failures, j.created_at, j.updated_at";

const JOB_SELECT: &str = "SELECT id, preset_job_id, hashlist_id, name, status, priority,
    max_agents, allow_high_priority_override, attack_mode, wordlist_ids, rule_ids,
    mask, binary_version_id, chunk_duration_seconds, additional_args, base_keyspace,
    effective_keyspace, multiplication_factor, uses_rule_splitting, dispatched_keyspace,
    processed_keyspace, consecutive_failures, created_at, updated_at
    FROM jobs WHERE id = ?1";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let id_str: String = row.get(0)?;
    let preset_id_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    let attack_mode_num: i32 = row.get(8)?;
    let wordlist_ids_str: String = row.get(9)?;
    let rule_ids_str: String = row.get(10)?;
    let base_ks_str: String = row.get(15)?;
    let eff_ks_str: String = row.get(16)?;
    let mult_str: String = row.get(17)?;
    let dispatched_str: String = row.get(19)?;
    let processed_str: String = row.get(20)?;
    let created_at_str: String = row.get(22)?;
    let updated_at_str: String = row.get(23)?;

    Ok(Job {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        preset_job_id: Uuid::parse_str(&preset_id_str).expect("valid uuid"),
        hashlist_id: row.get(2)?,
        name: row.get(3)?,
        status: enum_from_sql::<JobStatus>(&status_str),
        priority: row.get(5)?,
        max_agents: row.get(6)?,
        allow_high_priority_override: row.get(7)?,
        attack_mode: AttackMode::from_numeric(attack_mode_num).expect("valid attack mode"),
        wordlist_ids: serde_json::from_str(&wordlist_ids_str).expect("valid json"),
        rule_ids: serde_json::from_str(&rule_ids_str).expect("valid json"),
        mask: row.get(11)?,
        binary_version_id: row.get(12)?,
        chunk_duration_seconds: row.get(13)?,
        additional_args: row.get(14)?,
        base_keyspace: u64_from_sql(&base_ks_str),
        effective_keyspace: u64_from_sql(&eff_ks_str),
        multiplication_factor: u64_from_sql(&mult_str),
        uses_rule_splitting: row.get(18)?,
        dispatched_keyspace: u64_from_sql(&dispatched_str),
        processed_keyspace: u64_from_sql(&processed_str),
        consecutive_failures: row.get(21)?,
        created_at: parse_rfc3339(&created_at_str),
        updated_at: parse_rfc3339(&updated_at_str),
    })
}

const TASK_COLUMNS: &str = "id, job_id, agent_id, status, keyspace_start, keyspace_end,
    keyspace_processed, effective_keyspace_start, effective_keyspace_end,
    effective_keyspace_processed, benchmark_speed, average_speed, chunk_duration, retry_count,
    error_message, crack_count, assigned_at, started_at, last_checkpoint, completed_at, detailed_status";

const TASK_SELECT: &str = "SELECT id, job_id, agent_id, status, keyspace_start, keyspace_end,
    keyspace_processed, effective_keyspace_start, effective_keyspace_end,
    effective_keyspace_processed, benchmark_speed, average_speed, chunk_duration, retry_count,
    error_message, crack_count, assigned_at, started_at, last_checkpoint, completed_at, detailed_status
    FROM tasks WHERE id = ?1";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let id_str: String = row.get(0)?;
    let job_id_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    let ks_start_str: String = row.get(4)?;
    let ks_end_str: String = row.get(5)?;
    let ks_processed_str: String = row.get(6)?;
    let eff_start: Option<String> = row.get(7)?;
    let eff_end: Option<String> = row.get(8)?;
    let eff_processed: Option<String> = row.get(9)?;
    let assigned_at: Option<String> = row.get(16)?;
    let started_at: Option<String> = row.get(17)?;
    let last_checkpoint: Option<String> = row.get(18)?;
    let completed_at: Option<String> = row.get(19)?;

    Ok(Task {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        job_id: Uuid::parse_str(&job_id_str).expect("valid uuid"),
        agent_id: row.get(2)?,
        status: enum_from_sql::<TaskStatus>(&status_str),
        keyspace_start: u64_from_sql(&ks_start_str),
        keyspace_end: u64_from_sql(&ks_end_str),
        keyspace_processed: u64_from_sql(&ks_processed_str),
        effective_keyspace_start: opt_u64_from_sql(eff_start),
        effective_keyspace_end: opt_u64_from_sql(eff_end),
        effective_keyspace_processed: opt_u64_from_sql(eff_processed),
        benchmark_speed: row.get(10)?,
        average_speed: row.get(11)?,
        chunk_duration: row.get(12)?,
        retry_count: row.get(13)?,
        error_message: row.get(14)?,
        crack_count: row.get(15)?,
        assigned_at: assigned_at.map(|s| parse_rfc3339(&s)),
        started_at: started_at.map(|s| parse_rfc3339(&s)),
        last_checkpoint: last_checkpoint.map(|s| parse_rfc3339(&s)),
        completed_at: completed_at.map(|s| parse_rfc3339(&s)),
        detailed_status: row.get(20)?,
    })
}

fn row_to_hashlist(row: &rusqlite::Row<'_>) -> rusqlite::Result<Hashlist> {
    let created_at_str: String = row.get(6)?;
    Ok(Hashlist {
        id: row.get(0)?,
        client_id: row.get(1)?,
        hash_mode: row.get(2)?,
        total: row.get(3)?,
        cracked_count: row.get(4)?,
        file_path: row.get(5)?,
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn row_to_binary_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<BinaryVersion> {
    let verification_str: String = row.get(8)?;
    Ok(BinaryVersion {
        id: row.get(0)?,
        binary_type: row.get(1)?,
        compression_type: row.get(2)?,
        source_url: row.get(3)?,
        file_name: row.get(4)?,
        md5_hash: row.get(5)?,
        file_size: row.get(6)?,
        is_active: row.get(7)?,
        verification_status: enum_from_sql::<VerificationStatus>(&verification_str),
        is_default: row.get(9)?,
    })
}

use rusqlite::OptionalExtension;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Job;

    fn sample_job(priority: i32) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            preset_job_id: Uuid::new_v4(),
            hashlist_id: 1,
            name: "test".into(),
            status: JobStatus::Pending,
            priority,
            max_agents: 1,
            allow_high_priority_override: false,
            attack_mode: AttackMode::Straight,
            wordlist_ids: vec![1],
            rule_ids: vec![],
            mask: None,
            binary_version_id: 1,
            chunk_duration_seconds: 600,
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

    async fn seed_hashlist_and_binary(store: &Store) -> Result<()> {
        store
            .conn
            .call(|conn| {
                conn.execute(
                    "INSERT INTO hashlists (id, client_id, hash_mode, total, cracked_count, file_path, created_at)
                     VALUES (1, NULL, 0, 1, 0, '/tmp/x.hash', '2026-01-01T00:00:00Z')",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO hashes (id, hash_value, is_cracked) VALUES (1, 'x', 0)",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO hashlist_hashes (hashlist_id, hash_id) VALUES (1, 1)",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO binary_versions (id, binary_type, compression_type, source_url,
                        file_name, md5_hash, file_size, is_active, verification_status, is_default)
                     VALUES (1, 'hashcat', 'none', 'http://x', 'hashcat', 'abc', 100, 1, 'verified', 1)",
                    [],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    #[tokio::test]
    async fn job_round_trips_keyspace_fields_exactly() {
        let store = Store::new_in_memory().await.unwrap();
        seed_hashlist_and_binary(&store).await.unwrap();
        let job = sample_job(50);
        store.insert_job(&job).await.unwrap();
        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.effective_keyspace, job.effective_keyspace);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn eligible_jobs_ordered_by_priority_desc_then_created_at_asc() {
        let store = Store::new_in_memory().await.unwrap();
        seed_hashlist_and_binary(&store).await.unwrap();
        let low = sample_job(10);
        let high = sample_job(90);
        store.insert_job(&low).await.unwrap();
        store.insert_job(&high).await.unwrap();
        let jobs = store.list_eligible_jobs().await.unwrap();
        assert_eq!(jobs[0].id, high.id);
        assert_eq!(jobs[1].id, low.id);
    }

    #[tokio::test]
    async fn crack_report_flips_hash_exactly_once() {
        let store = Store::new_in_memory().await.unwrap();
        seed_hashlist_and_binary(&store).await.unwrap();
        let now = Utc::now();
        let first = store.apply_crack_report("x", "p", 1, now).await.unwrap();
        let second = store.apply_crack_report("x", "p", 1, now).await.unwrap();
        assert!(first);
        assert!(!second);
        let hl = store.get_hashlist(1).await.unwrap().unwrap();
        assert_eq!(hl.cracked_count, 1);
    }

    #[tokio::test]
    async fn crack_report_for_unknown_hash_is_ignored() {
        let store = Store::new_in_memory().await.unwrap();
        seed_hashlist_and_binary(&store).await.unwrap();
        let applied = store
            .apply_crack_report("does-not-exist", "p", 1, Utc::now())
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn settings_row_seeded_with_defaults() {
        let store = Store::new_in_memory().await.unwrap();
        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings.default_chunk_duration_seconds, Settings::default().default_chunk_duration_seconds);
    }

    #[tokio::test]
    async fn single_use_voucher_is_not_redeemable_after_consume() {
        let store = Store::new_in_memory().await.unwrap();
        let voucher = crate::types::ClaimVoucher::new("abc123", "rig-1", false);
        let id = store.insert_claim_voucher(&voucher).await.unwrap();
        store.consume_claim_voucher(id, Utc::now()).await.unwrap();
        let fetched = store.get_claim_voucher_by_code("abc123").await.unwrap().unwrap();
        assert!(!fetched.is_redeemable());
    }

    #[tokio::test]
    async fn continuous_voucher_stays_redeemable_after_consume() {
        let store = Store::new_in_memory().await.unwrap();
        let voucher = crate::types::ClaimVoucher::new("cont-1", "rig-2", true);
        let id = store.insert_claim_voucher(&voucher).await.unwrap();
        store.consume_claim_voucher(id, Utc::now()).await.unwrap();
        let fetched = store.get_claim_voucher_by_code("cont-1").await.unwrap().unwrap();
        assert!(fetched.is_redeemable());
        assert!(fetched.consumed_at.is_none());
    }
}
