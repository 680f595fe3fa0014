//! Tasks - units of asynchronous remote work launched by steps.
//!
//! - `Task`: one unit of work with its own retry / timeout budget
//! - `GroupTask`: a template fanned out into N concrete tasks
//! - `BatchTask`: the set of tasks a step runs as one logical unit
//! - `AsyncPollMonitor`: turns a submitted task into poll requests

pub mod batch;
pub mod group;
pub mod monitor;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExecuteOption, TaskError, TaskId, TaskResult};

pub use self::batch::{BatchTask, TaskLaunch, WorkerKind};
pub use self::group::{GroupTask, TaskTarget, TaskTemplate};
pub use self::monitor::AsyncPollMonitor;

/// One unit of remote work.
///
/// `execute` either produces a `TaskResult` (any status) or fails with a
/// `TaskError`; workers treat both error paths the same way.
#[async_trait]
pub trait Task: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn execute_option(&self) -> &ExecuteOption;

    async fn execute(&self) -> Result<TaskResult, TaskError>;

    /// Concrete tasks this task expands into, if it is a group.
    fn fan_out(&self) -> Option<Vec<Arc<dyn Task>>> {
        None
    }
}

/// Task backed by an async closure.
///
/// ```ignore
/// let task = FnTask::new(ExecuteOption::new(2, 100), |task_id| async move {
///     Ok(TaskResult::success(task_id))
/// });
/// ```
pub struct FnTask<F> {
    task_id: TaskId,
    option: ExecuteOption,
    f: F,
}

impl<F, Fut> FnTask<F>
where
    F: Fn(TaskId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
{
    pub fn new(option: ExecuteOption, f: F) -> Self {
        Self::with_id(TaskId::generate(), option, f)
    }

    pub fn with_id(task_id: TaskId, option: ExecuteOption, f: F) -> Self {
        Self { task_id, option, f }
    }

    pub fn into_arc(self) -> Arc<dyn Task> {
        Arc::new(self)
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn(TaskId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
{
    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn execute_option(&self) -> &ExecuteOption {
        &self.option
    }

    async fn execute(&self) -> Result<TaskResult, TaskError> {
        (self.f)(self.task_id).await
    }
}
