use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server -> agent frames, sent over the agent control channel
/// (`GET /ws/agent/updates`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum ServerFrame {
    BenchmarkRequest {
        hash_mode: i32,
        binary_version_id: i64,
    },
    TaskAssignment {
        task_id: Uuid,
        job_id: Uuid,
        keyspace_start: u64,
        keyspace_end: u64,
        attack_mode: kh_core::types::AttackMode,
        wordlist_ids: Vec<i64>,
        rule_ids: Vec<i64>,
        mask: Option<String>,
        additional_args: Option<String>,
        binary_version_id: i64,
        hashlist_id: i64,
        chunk_duration: i64,
    },
    CancelTask {
        task_id: Uuid,
        reason: String,
    },
    DeviceUpdate {
        device_id: i32,
        enabled: bool,
    },
    ConfigUpdate {
        write_wait: u64,
        pong_wait: u64,
        ping_period: u64,
        heartbeat_interval: u64,
    },
}

impl From<kh_scheduler::TaskAssignment> for ServerFrame {
    fn from(a: kh_scheduler::TaskAssignment) -> Self {
        ServerFrame::TaskAssignment {
            task_id: a.task_id,
            job_id: a.job_id,
            keyspace_start: a.keyspace_start,
            keyspace_end: a.keyspace_end,
            attack_mode: a.attack_mode,
            wordlist_ids: a.wordlist_ids,
            rule_ids: a.rule_ids,
            mask: a.mask,
            additional_args: a.additional_args,
            binary_version_id: a.binary_version_id,
            hashlist_id: a.hashlist_id,
            chunk_duration: a.chunk_duration,
        }
    }
}

/// A single device's telemetry sample carried in a `heartbeat` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub device_id: i32,
    pub temperature_c: Option<f64>,
    pub utilization_pct: Option<f64>,
    pub fanspeed_pct: Option<f64>,
    pub hashrate_hps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInventoryEntry {
    pub device_id: i32,
    pub device_name: String,
    pub device_type: kh_core::types::DeviceType,
}

/// Agent -> server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum AgentFrame {
    Heartbeat {
        ts: chrono::DateTime<chrono::Utc>,
        device_metrics: Vec<DeviceMetrics>,
    },
    BenchmarkResult {
        hash_mode: i32,
        binary_version_id: i64,
        device_id: i32,
        speed_hps: f64,
    },
    TaskProgress {
        task_id: Uuid,
        keyspace_processed: u64,
        speed_hps: f64,
        detailed_status: Option<String>,
    },
    CrackReport {
        hashlist_id: i64,
        hash_value: String,
        password: String,
    },
    TaskStatus {
        task_id: Uuid,
        status: ReportedTaskStatus,
        error_message: Option<String>,
        final_keyspace_processed: u64,
    },
    DeviceInventory {
        devices: Vec<DeviceInventoryEntry>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedTaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl From<ReportedTaskStatus> for kh_agent::progress::ReportedStatus {
    fn from(s: ReportedTaskStatus) -> Self {
        match s {
            ReportedTaskStatus::Running => kh_agent::progress::ReportedStatus::Running,
            ReportedTaskStatus::Completed => kh_agent::progress::ReportedStatus::Completed,
            ReportedTaskStatus::Failed => kh_agent::progress::ReportedStatus::Failed,
            ReportedTaskStatus::Cancelled => kh_agent::progress::ReportedStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips_through_json() {
        let frame = AgentFrame::Heartbeat {
            ts: chrono::Utc::now(),
            device_metrics: vec![DeviceMetrics {
                device_id: 0,
                temperature_c: Some(62.0),
                utilization_pct: Some(98.0),
                fanspeed_pct: Some(70.0),
                hashrate_hps: Some(12_000.0),
            }],
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"heartbeat\""));
        let back: AgentFrame = serde_json::from_str(&text).unwrap();
        match back {
            AgentFrame::Heartbeat { device_metrics, .. } => assert_eq!(device_metrics.len(), 1),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn task_assignment_tag_matches_wire_contract() {
        let frame = ServerFrame::TaskAssignment {
            task_id: Uuid::nil(),
            job_id: Uuid::nil(),
            keyspace_start: 0,
            keyspace_end: 100,
            attack_mode: kh_core::types::AttackMode::Straight,
            wordlist_ids: vec![1],
            rule_ids: vec![],
            mask: None,
            additional_args: None,
            binary_version_id: 1,
            hashlist_id: 1,
            chunk_duration: 600,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "task_assignment");
        assert_eq!(value["payload"]["keyspace_end"], 100);
    }
}
