//! Result model: the outcome of one task, and its severity ordering.
//!
//! A step that fans out to many tasks reduces their results to the single
//! "most severe" one. The ordering below is what makes that reduction
//! independent of arrival order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// Status of a task result, declared from least to most severe.
///
/// `Success < Unknown < Canceled < Timeout < Failed`
///
/// - `Unknown` means no definitive status yet (still pending). It never
///   outranks a real error.
/// - `Canceled` is the mildest error, `Failed` the most severe.
///
/// The derived `Ord` follows declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TaskResultStatus {
    Success,
    Unknown,
    Canceled,
    Timeout,
    Failed,
}

impl TaskResultStatus {
    pub const ALL: [TaskResultStatus; 5] = [
        TaskResultStatus::Success,
        TaskResultStatus::Unknown,
        TaskResultStatus::Canceled,
        TaskResultStatus::Timeout,
        TaskResultStatus::Failed,
    ];

    /// Everything but `Success` counts as an error.
    pub fn is_any_error(self) -> bool {
        self != TaskResultStatus::Success
    }

    /// A definitive (non-pending) status.
    pub fn is_complete(self) -> bool {
        self != TaskResultStatus::Unknown
    }

    pub fn is_more_severe_than(self, other: TaskResultStatus) -> bool {
        self > other
    }
}

impl fmt::Display for TaskResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskResultStatus::Success => "Success",
            TaskResultStatus::Unknown => "Unknown",
            TaskResultStatus::Canceled => "Canceled",
            TaskResultStatus::Timeout => "Timeout",
            TaskResultStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a task's execute or poll-check operation.
///
/// Closed shape on purpose: status, message, cause and an opaque JSON payload.
/// Consumers match on `status` and decode `payload` themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskResultStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error chain rendered as text (the closest thing to a stack trace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl TaskResult {
    pub fn new(task_id: TaskId, status: TaskResultStatus) -> Self {
        Self {
            task_id,
            status,
            message: None,
            cause: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn success(task_id: TaskId) -> Self {
        Self::new(task_id, TaskResultStatus::Success)
    }

    pub fn failed(task_id: TaskId, message: impl Into<String>) -> Self {
        Self::new(task_id, TaskResultStatus::Failed).with_message(message)
    }

    pub fn timeout(task_id: TaskId, message: impl Into<String>) -> Self {
        Self::new(task_id, TaskResultStatus::Timeout).with_message(message)
    }

    pub fn canceled(task_id: TaskId, message: impl Into<String>) -> Self {
        Self::new(task_id, TaskResultStatus::Canceled).with_message(message)
    }

    /// Not yet complete; used by poll monitors for "still in progress".
    pub fn unknown(task_id: TaskId) -> Self {
        Self::new(task_id, TaskResultStatus::Unknown)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn is_any_error(&self) -> bool {
        self.status.is_any_error()
    }

    pub fn is_more_severe_than(&self, other: &TaskResult) -> bool {
        self.status.is_more_severe_than(other.status)
    }

    pub fn message_or_empty(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn severity_cmp(&self, other: &TaskResult) -> Ordering {
        self.status.cmp(&other.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn severity_order_is_total_and_transitive() {
        for a in TaskResultStatus::ALL {
            for b in TaskResultStatus::ALL {
                let more = a.is_more_severe_than(b);
                let less = b.is_more_severe_than(a);
                if a == b {
                    assert!(!more && !less, "{a} vs itself");
                } else {
                    assert!(more ^ less, "{a} vs {b} must be strictly ordered");
                }
                for c in TaskResultStatus::ALL {
                    if a.is_more_severe_than(b) && b.is_more_severe_than(c) {
                        assert!(a.is_more_severe_than(c), "{a} > {b} > {c}");
                    }
                }
            }
        }
    }

    #[rstest]
    #[case::failed(TaskResultStatus::Failed)]
    #[case::timeout(TaskResultStatus::Timeout)]
    #[case::canceled(TaskResultStatus::Canceled)]
    fn errors_are_more_severe_than_success(#[case] status: TaskResultStatus) {
        assert!(status.is_more_severe_than(TaskResultStatus::Success));
        assert!(status.is_any_error());
        assert!(status.is_complete());
    }

    #[test]
    fn success_and_unknown_flags() {
        assert!(!TaskResultStatus::Success.is_any_error());
        assert!(TaskResultStatus::Success.is_complete());
        assert!(!TaskResultStatus::Unknown.is_complete());
    }

    #[test]
    fn result_builder_keeps_fields() {
        let id = TaskId::generate();
        let r = TaskResult::failed(id, "boom")
            .with_cause("io error: connection reset")
            .with_payload(serde_json::json!({"code": 503}));

        assert_eq!(r.task_id, id);
        assert_eq!(r.status, TaskResultStatus::Failed);
        assert_eq!(r.message_or_empty(), "boom");
        assert_eq!(r.payload["code"], 503);
        assert!(r.is_more_severe_than(&TaskResult::success(id)));
    }

    #[test]
    fn null_payload_is_not_serialized() {
        let r = TaskResult::success(TaskId::generate());
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("payload").is_none());
        assert_eq!(v["status"], "Success");
    }
}
