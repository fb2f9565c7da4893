pub mod crack;
pub mod heartbeat;
pub mod progress;
pub mod registry;
pub mod state_machine;

pub use crack::{apply_crack_reports, CrackReport};
pub use heartbeat::{apply_heartbeat, BenchmarkCache};
pub use progress::{apply_task_progress, apply_task_status, ReportedStatus, TaskProgressFrame};
pub use registry::{redeem_claim_voucher, set_agent_enabled, set_device_enabled, RegisteredAgent};
pub use state_machine::{TaskEvent, TaskStateMachine};
