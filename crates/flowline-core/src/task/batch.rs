//! BatchTask - the set of tasks one step runs as a single logical unit.

use std::fmt;
use std::sync::Arc;

use super::{AsyncPollMonitor, Task};
use crate::domain::{BatchOption, TaskId};

/// Which worker drives a task.
#[derive(Clone)]
pub enum WorkerKind {
    /// Submit once, the submit result is terminal.
    Async,

    /// Submit, then poll through the monitor until a complete answer.
    AsyncPoll(Arc<dyn AsyncPollMonitor>),
}

impl fmt::Debug for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Async => f.write_str("Async"),
            WorkerKind::AsyncPoll(monitor) => f
                .debug_tuple("AsyncPoll")
                .field(monitor.monitor_option())
                .finish(),
        }
    }
}

/// A task paired with the worker that will run it.
#[derive(Clone)]
pub struct TaskLaunch {
    pub task: Arc<dyn Task>,
    pub worker: WorkerKind,
}

impl fmt::Debug for TaskLaunch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLaunch")
            .field("task_id", &self.task.task_id())
            .field("worker", &self.worker)
            .finish()
    }
}

/// Tasks launched together by one step. Group tasks are flattened on insert,
/// so every launch here is a concrete task.
#[derive(Debug, Clone, Default)]
pub struct BatchTask {
    launches: Vec<TaskLaunch>,
    option: BatchOption,
}

impl BatchTask {
    pub fn new(option: BatchOption) -> Self {
        Self {
            launches: Vec::new(),
            option,
        }
    }

    /// Add a task; a group task contributes each of its materialized tasks.
    pub fn push(&mut self, task: Arc<dyn Task>, worker: WorkerKind) {
        match task.fan_out() {
            Some(tasks) => {
                for task in tasks {
                    self.push(task, worker.clone());
                }
            }
            None => self.launches.push(TaskLaunch { task, worker }),
        }
    }

    pub fn async_tasks<I>(tasks: I, option: BatchOption) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Task>>,
    {
        let mut batch = Self::new(option);
        for task in tasks {
            batch.push(task, WorkerKind::Async);
        }
        batch
    }

    pub fn poll_tasks<I>(tasks: I, monitor: Arc<dyn AsyncPollMonitor>, option: BatchOption) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Task>>,
    {
        let mut batch = Self::new(option);
        for task in tasks {
            batch.push(task, WorkerKind::AsyncPoll(Arc::clone(&monitor)));
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.launches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launches.is_empty()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.launches.iter().map(|l| l.task.task_id()).collect()
    }

    pub fn launches(&self) -> &[TaskLaunch] {
        &self.launches
    }

    pub fn option(&self) -> &BatchOption {
        &self.option
    }

    pub(crate) fn into_parts(self) -> (Vec<TaskLaunch>, BatchOption) {
        (self.launches, self.option)
    }
}
