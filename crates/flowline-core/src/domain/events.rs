//! Events - task lifecycle notifications sent from workers to a step.

use super::ids::TaskId;
use super::result::TaskResult;

/// What a worker (or the batch supervisor) tells the step that launched it.
///
/// - `Created`: the task was handed to a worker and is about to be submitted
/// - `Submitted`: a poll-capable task was accepted remotely; polling starts
/// - `Result`: the task's terminal result
/// - `Completed`: every task of the batch delivered its terminal result
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Created { task_id: TaskId },
    Submitted { task_id: TaskId },
    Result { task_id: TaskId, result: TaskResult },
    Completed,
}

impl TaskEvent {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::Created { task_id }
            | TaskEvent::Submitted { task_id }
            | TaskEvent::Result { task_id, .. } => Some(*task_id),
            TaskEvent::Completed => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::Created { .. } => "created",
            TaskEvent::Submitted { .. } => "submitted",
            TaskEvent::Result { .. } => "result",
            TaskEvent::Completed => "completed",
        }
    }
}
