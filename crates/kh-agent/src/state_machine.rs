use std::fmt;

use kh_core::types::TaskStatus;

/// Events that drive a task through its lifecycle. Distinct from `TaskStatus`
/// so that a transition table can reject events that don't make sense in the
/// current state instead of silently clobbering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Assign,
    Start,
    ReportProgress,
    Complete,
    Fail,
    Cancel,
    AgentDisconnect,
    AgentReconnect,
    GraceExpire,
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskEvent::Assign => "assign",
            TaskEvent::Start => "start",
            TaskEvent::ReportProgress => "report_progress",
            TaskEvent::Complete => "complete",
            TaskEvent::Fail => "fail",
            TaskEvent::Cancel => "cancel",
            TaskEvent::AgentDisconnect => "agent_disconnect",
            TaskEvent::AgentReconnect => "agent_reconnect",
            TaskEvent::GraceExpire => "grace_expire",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot apply event {event} to task in state {state:?}")]
pub struct InvalidTransition {
    pub state: TaskStatus,
    pub event: TaskEvent,
}

/// Drives a single task's `TaskStatus` through spec.md §4.6's lifecycle,
/// recording every transition taken so a crack/progress ingester can explain
/// why a frame was accepted or rejected.
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    state: TaskStatus,
    history: Vec<(TaskStatus, TaskEvent, TaskStatus)>,
}

impl TaskStateMachine {
    pub fn new(initial: TaskStatus) -> Self {
        Self {
            state: initial,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskStatus {
        self.state
    }

    pub fn history(&self) -> &[(TaskStatus, TaskEvent, TaskStatus)] {
        &self.history
    }

    pub fn can_transition(&self, event: TaskEvent) -> bool {
        self.next_state(event).is_some()
    }

    pub fn transition(&mut self, event: TaskEvent) -> Result<TaskStatus, InvalidTransition> {
        match self.next_state(event) {
            Some(next) => {
                self.history.push((self.state, event, next));
                self.state = next;
                Ok(next)
            }
            None => Err(InvalidTransition {
                state: self.state,
                event,
            }),
        }
    }

    fn next_state(&self, event: TaskEvent) -> Option<TaskStatus> {
        use TaskEvent::*;
        use TaskStatus::*;
        match (self.state, event) {
            (Pending, Assign) => Some(Assigned),
            (Assigned, Start) => Some(Running),
            (Assigned, Cancel) => Some(Cancelled),
            (Assigned, AgentDisconnect) => Some(ReconnectPending),
            (Running, ReportProgress) => Some(Running),
            (Running, Complete) => Some(Completed),
            (Running, Fail) => Some(Failed),
            (Running, Cancel) => Some(Cancelled),
            (Running, AgentDisconnect) => Some(ReconnectPending),
            (ReconnectPending, AgentReconnect) => Some(Running),
            (ReconnectPending, GraceExpire) => Some(Pending),
            (ReconnectPending, Cancel) => Some(Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_happy_path_completes() {
        let mut sm = TaskStateMachine::new(TaskStatus::Pending);
        sm.transition(TaskEvent::Assign).unwrap();
        sm.transition(TaskEvent::Start).unwrap();
        sm.transition(TaskEvent::ReportProgress).unwrap();
        let end = sm.transition(TaskEvent::Complete).unwrap();
        assert_eq!(end, TaskStatus::Completed);
        assert_eq!(sm.history().len(), 4);
    }

    #[test]
    fn disconnect_then_grace_expire_rolls_back_to_pending() {
        let mut sm = TaskStateMachine::new(TaskStatus::Pending);
        sm.transition(TaskEvent::Assign).unwrap();
        sm.transition(TaskEvent::Start).unwrap();
        sm.transition(TaskEvent::AgentDisconnect).unwrap();
        assert_eq!(sm.state(), TaskStatus::ReconnectPending);
        let end = sm.transition(TaskEvent::GraceExpire).unwrap();
        assert_eq!(end, TaskStatus::Pending);
    }

    #[test]
    fn disconnect_then_reconnect_within_grace_resumes_running() {
        let mut sm = TaskStateMachine::new(TaskStatus::Pending);
        sm.transition(TaskEvent::Assign).unwrap();
        sm.transition(TaskEvent::Start).unwrap();
        sm.transition(TaskEvent::AgentDisconnect).unwrap();
        let end = sm.transition(TaskEvent::AgentReconnect).unwrap();
        assert_eq!(end, TaskStatus::Running);
    }

    #[test]
    fn completed_task_rejects_further_events() {
        let mut sm = TaskStateMachine::new(TaskStatus::Pending);
        sm.transition(TaskEvent::Assign).unwrap();
        sm.transition(TaskEvent::Start).unwrap();
        sm.transition(TaskEvent::Complete).unwrap();
        assert!(!sm.can_transition(TaskEvent::ReportProgress));
        assert!(sm.transition(TaskEvent::Fail).is_err());
    }

    #[test]
    fn cancel_is_available_from_every_live_state() {
        let mut sm = TaskStateMachine::new(TaskStatus::Pending);
        sm.transition(TaskEvent::Assign).unwrap();
        assert!(sm.can_transition(TaskEvent::Cancel));
        sm.transition(TaskEvent::Start).unwrap();
        assert!(sm.can_transition(TaskEvent::Cancel));
    }
}
