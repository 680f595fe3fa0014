//! Step transitions: the edge a step takes to the next step (or to the end of
//! the flow), plus the log lines produced on the way.

use serde::{Deserialize, Serialize};

use super::result::TaskResultStatus;

/// Lifecycle state of a flow.
///
/// - Created -> Running -> Completed
/// - Created -> Running -> Paused -> Running -> ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Created,
    Running,
    Paused,
    Completed,
}

impl FlowState {
    pub fn is_complete(self) -> bool {
        self == FlowState::Completed
    }

    /// Running flows are driven; everything else waits for an operator.
    pub fn is_settled(self) -> bool {
        matches!(self, FlowState::Paused | FlowState::Completed)
    }
}

/// Final (or current best known) result of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowResult {
    Unknown,
    Success,
    Failed,
    Timeout,
    Canceled,
}

impl From<TaskResultStatus> for FlowResult {
    fn from(status: TaskResultStatus) -> Self {
        match status {
            TaskResultStatus::Success => FlowResult::Success,
            TaskResultStatus::Failed => FlowResult::Failed,
            TaskResultStatus::Timeout => FlowResult::Timeout,
            TaskResultStatus::Canceled => FlowResult::Canceled,
            TaskResultStatus::Unknown => FlowResult::Unknown,
        }
    }
}

/// One log line attached to a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            message: message.into(),
            detail,
        }
    }
}

/// Edge descriptor produced by step logic or by the aggregator.
///
/// `is_edge == false` means "stay where you are": the transition may still
/// carry log lines, but the driver does not move. [`StepTransition::NOOP`] is
/// the empty non-edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTransition {
    pub target_step: Option<String>,
    pub flow_state: Option<FlowState>,
    pub flow_result: Option<FlowResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<LogEntry>,

    pub is_edge: bool,
}

impl StepTransition {
    pub const NOOP: StepTransition = StepTransition {
        target_step: None,
        flow_state: None,
        flow_result: None,
        log: Vec::new(),
        is_edge: false,
    };

    /// Move the flow to `step`.
    pub fn run_to(step: impl Into<String>) -> Self {
        Self {
            target_step: Some(step.into()),
            flow_state: None,
            flow_result: None,
            log: Vec::new(),
            is_edge: true,
        }
    }

    /// Stop moving and put the flow into `state` / `result`.
    pub fn park_in_state(state: FlowState, result: FlowResult, message: Option<&str>) -> Self {
        let mut transition = Self {
            target_step: None,
            flow_state: Some(state),
            flow_result: Some(result),
            log: Vec::new(),
            is_edge: true,
        };
        if let Some(message) = message {
            transition.log.push(LogEntry::new(message, None));
        }
        transition
    }

    /// Non-edge that only records a log line.
    pub fn log_only(message: impl Into<String>, detail: Option<String>) -> Self {
        let mut transition = Self::NOOP;
        transition.log.push(LogEntry::new(message, detail));
        transition
    }

    pub fn with_result(mut self, result: FlowResult) -> Self {
        self.flow_result = Some(result);
        self
    }

    pub fn log(mut self, message: impl Into<String>, detail: Option<String>) -> Self {
        self.log.push(LogEntry::new(message, detail));
        self
    }

    pub fn is_edge(&self) -> bool {
        self.is_edge
    }

    /// Whether applying this transition ends the flow.
    pub fn completes_flow(&self) -> bool {
        self.flow_state == Some(FlowState::Completed)
    }
}

impl Default for StepTransition {
    fn default() -> Self {
        Self::NOOP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_is_not_an_edge() {
        assert!(!StepTransition::NOOP.is_edge());
        assert!(StepTransition::NOOP.log.is_empty());
        assert_eq!(StepTransition::default(), StepTransition::NOOP);
    }

    #[test]
    fn log_only_stays_a_non_edge() {
        let t = StepTransition::log_only("submitted", None);
        assert!(!t.is_edge());
        assert_eq!(t.log.len(), 1);
    }

    #[test]
    fn run_to_with_result() {
        let t = StepTransition::run_to("handleError").with_result(FlowResult::Failed);
        assert!(t.is_edge());
        assert_eq!(t.target_step.as_deref(), Some("handleError"));
        assert_eq!(t.flow_result, Some(FlowResult::Failed));
        assert!(!t.completes_flow());
    }

    #[test]
    fn park_in_completed_completes_flow() {
        let t = StepTransition::park_in_state(
            FlowState::Completed,
            FlowResult::Failed,
            Some("something wrong"),
        );
        assert!(t.completes_flow());
        assert_eq!(t.log[0].message, "something wrong");
    }

    #[test]
    fn status_converts_to_flow_result() {
        assert_eq!(FlowResult::from(TaskResultStatus::Timeout), FlowResult::Timeout);
        assert_eq!(FlowResult::from(TaskResultStatus::Unknown), FlowResult::Unknown);
    }
}
