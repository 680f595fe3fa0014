//! AsyncPollMonitor - how a poll-capable task is checked for progress.

use std::sync::Arc;

use super::Task;
use crate::domain::{MonitorOption, TaskError, TaskResult};

/// Supplied by the host for each poll-capable kind of task.
///
/// The poll worker calls `create_poll_task` after a successful submit (and
/// after each "not yet done" answer), runs the returned task like any other,
/// then hands its result to `process_poll_result`.
pub trait AsyncPollMonitor: Send + Sync {
    /// Build the next poll request from the submitted task and the last
    /// result seen (the submit result for the first poll).
    fn create_poll_task(
        &self,
        task: &Arc<dyn Task>,
        last_result: &TaskResult,
    ) -> Result<Arc<dyn Task>, TaskError>;

    /// Interpret a successful poll response.
    ///
    /// `None`, or a result that is not complete, means "still in progress".
    fn process_poll_result(&self, task: &dyn Task, poll_result: &TaskResult) -> Option<TaskResult>;

    fn monitor_option(&self) -> &MonitorOption;
}
