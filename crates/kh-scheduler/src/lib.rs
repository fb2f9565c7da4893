pub mod dispatch;
pub mod retention;
pub mod tick;

pub use dispatch::{AgentDispatch, NullDispatch, TaskAssignment};
pub use retention::{run_purge, RetentionReport};
pub use tick::{run_tick, SchedulerLoop, TickReport};
