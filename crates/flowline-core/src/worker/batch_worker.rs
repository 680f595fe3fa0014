//! BatchWorker - fan-out / fan-in of one step's tasks.
//!
//! Every launch gets its own worker in a `JoinSet`, optionally throttled by a
//! semaphore. When all of them have delivered a terminal result the batch
//! reports `Completed` exactly once. Dropping the batch future aborts every
//! worker still running.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::supervise::crashed;
use super::{AsyncPollTaskWorker, AsyncTaskWorker, EventSender, notify};
use crate::domain::{TaskEvent, TaskId, TaskResult};
use crate::task::{BatchTask, TaskLaunch, WorkerKind};

pub struct BatchWorker {
    batch: BatchTask,
    events: EventSender,
}

impl BatchWorker {
    pub fn new(batch: BatchTask, events: EventSender) -> Self {
        Self { batch, events }
    }

    /// Run every task, report `Completed`, and return the terminal results in
    /// completion order.
    pub async fn run(self) -> Vec<TaskResult> {
        let (launches, option) = self.batch.into_parts();
        let total = launches.len();
        let semaphore = option.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        debug!(tasks = total, max_concurrency = ?option.max_concurrency, "starting batch");

        let mut workers = JoinSet::new();
        let mut owners: HashMap<tokio::task::Id, TaskId> = HashMap::with_capacity(total);
        for launch in launches {
            let task_id = launch.task.task_id();
            let events = self.events.clone();
            let semaphore = semaphore.clone();
            let handle = workers.spawn(async move {
                // held until the worker finishes
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                run_launch(launch, events).await
            });
            owners.insert(handle.id(), task_id);
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((_, result)) => results.push(result),
                Err(err) => {
                    let Some(task_id) = owners.get(&err.id()).copied() else {
                        error!(error = %err, "unknown batch worker failed");
                        continue;
                    };
                    let cause = crashed(err);
                    error!(task_id = %task_id, error = %cause, "task worker crashed");
                    let result = TaskResult::failed(task_id, cause.to_string());
                    notify(
                        &self.events,
                        TaskEvent::Result {
                            task_id,
                            result: result.clone(),
                        },
                    );
                    results.push(result);
                }
            }
        }

        debug!(tasks = total, "batch completed");
        notify(&self.events, TaskEvent::Completed);
        results
    }
}

async fn run_launch(launch: TaskLaunch, events: EventSender) -> TaskResult {
    match launch.worker {
        WorkerKind::Async => AsyncTaskWorker::new(launch.task, events).run().await,
        WorkerKind::AsyncPoll(monitor) => {
            AsyncPollTaskWorker::new(launch.task, monitor, events)
                .run()
                .await
        }
    }
}
