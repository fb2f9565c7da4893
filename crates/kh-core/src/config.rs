use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.krakenhashes/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            agent: AgentConfig::default(),
            security: SecurityConfig::default(),
            daemon: DaemonConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.krakenhashes/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".krakenhashes")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            data_dir: None,
        }
    }
}

fn default_project_name() -> String {
    "krakenhashes".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_store_path() -> String {
    "~/.krakenhashes/krakenhashes.db".into()
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_chunk_duration_secs")]
    pub default_chunk_duration_secs: i64,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,
    #[serde(default = "default_high_priority_threshold")]
    pub high_priority_threshold: i32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: i32,
    #[serde(default = "default_true")]
    pub job_interruption_enabled: bool,
    #[serde(default = "default_true")]
    pub agent_scheduling_enabled: bool,
    #[serde(default = "default_retention_months")]
    pub default_retention_months: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            default_chunk_duration_secs: default_chunk_duration_secs(),
            min_chunk_size: default_min_chunk_size(),
            high_priority_threshold: default_high_priority_threshold(),
            failure_threshold: default_failure_threshold(),
            job_interruption_enabled: true,
            agent_scheduling_enabled: true,
            default_retention_months: default_retention_months(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    3
}
fn default_chunk_duration_secs() -> i64 {
    600
}
fn default_min_chunk_size() -> u64 {
    1_000_000
}
fn default_high_priority_threshold() -> i32 {
    80
}
fn default_failure_threshold() -> i32 {
    5
}
fn default_retention_months() -> i32 {
    6
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_reconnect_grace_secs")]
    pub reconnect_grace_secs: i64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reconnect_grace_secs: default_reconnect_grace_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

fn default_reconnect_grace_secs() -> i64 {
    60
}
fn default_heartbeat_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_api_key_bytes")]
    pub api_key_bytes: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key_bytes: default_api_key_bytes(),
        }
    }
}

fn default_api_key_bytes() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    #[serde(default = "default_daemon_host")]
    pub host: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_daemon_port(),
            host: default_daemon_host(),
        }
    }
}

fn default_daemon_port() -> u16 {
    31337
}
fn default_daemon_host() -> String {
    "0.0.0.0".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_read_limit_bytes")]
    pub read_limit_bytes: usize,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    #[serde(default = "default_ping_period_secs")]
    pub ping_period_secs: u64,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_limit_bytes: default_read_limit_bytes(),
            pong_wait_secs: default_pong_wait_secs(),
            ping_period_secs: default_ping_period_secs(),
            write_wait_secs: default_write_wait_secs(),
        }
    }
}

fn default_read_limit_bytes() -> usize {
    8 * 1024
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_ping_period_secs() -> u64 {
    54 // ~90% of pong_wait
}
fn default_write_wait_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let cfg = Config::default();
        let text = cfg.to_toml().expect("serialize");
        let parsed: Config = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.scheduler.tick_interval_secs, cfg.scheduler.tick_interval_secs);
        assert_eq!(parsed.bridge.ping_period_secs, cfg.bridge.ping_period_secs);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: Config = toml::from_str("[scheduler]\ntick_interval_secs = 10\n").unwrap();
        assert_eq!(cfg.scheduler.tick_interval_secs, 10);
        assert_eq!(cfg.scheduler.min_chunk_size, default_min_chunk_size());
        assert_eq!(cfg.agent.heartbeat_interval_secs, default_heartbeat_interval_secs());
    }
}
