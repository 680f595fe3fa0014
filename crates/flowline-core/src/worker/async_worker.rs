//! AsyncTaskWorker - drives one task to exactly one terminal result.
//!
//! # Lifecycle
//! 1. `Created` is reported
//! 2. the task is submitted (supervised); a non-error result is terminal
//! 3. an error result, `TaskError` or crash is retried within the budget,
//!    then becomes a terminal Failed result
//! 4. a deadline armed at first submission cuts all of this short with a
//!    Timeout result
//! 5. the terminal result is reported as `Result`

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::decision::{Decision, RetryBudget};
use super::supervise::execute_supervised;
use super::{EventSender, notify};
use crate::domain::{TaskEvent, TaskResult};
use crate::task::Task;

pub struct AsyncTaskWorker {
    task: Arc<dyn Task>,
    events: EventSender,
}

impl AsyncTaskWorker {
    pub fn new(task: Arc<dyn Task>, events: EventSender) -> Self {
        Self { task, events }
    }

    /// Run to completion, report the terminal result and return it.
    pub async fn run(self) -> TaskResult {
        let task_id = self.task.task_id();
        notify(&self.events, TaskEvent::Created { task_id });

        let result = with_deadline(&self.task, submit(&self.task)).await;

        info!(task_id = %task_id, status = %result.status, "task finished");
        notify(
            &self.events,
            TaskEvent::Result {
                task_id,
                result: result.clone(),
            },
        );
        result
    }
}

/// Run `work` under the task's overall deadline, if it has one.
///
/// On expiry `work` is dropped, which aborts whatever call or retry sleep it
/// was waiting on.
pub(crate) async fn with_deadline<F>(task: &Arc<dyn Task>, work: F) -> TaskResult
where
    F: Future<Output = TaskResult>,
{
    let option = task.execute_option();
    let Some(limit) = option.timeout() else {
        return work.await;
    };

    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(task_id = %task.task_id(), timeout_ms = option.timeout_ms, "task timed out");
            TaskResult::timeout(
                task.task_id(),
                format!("task timed out after {} ms", option.timeout_ms),
            )
        }
    }
}

/// Submit phase: execute with retry until a non-error result or the budget
/// runs out.
pub(crate) async fn submit(task: &Arc<dyn Task>) -> TaskResult {
    let task_id = task.task_id();
    if let Err(err) = task.execute_option().validate() {
        warn!(task_id = %task_id, error = %err, "rejecting task before submission");
        return TaskResult::failed(task_id, err.to_string());
    }
    let budget = RetryBudget::for_request(task.execute_option());
    let mut failures = 0;

    loop {
        debug!(task_id = %task_id, attempt = failures + 1, "submitting task");

        let (error, cause) = match execute_supervised(task).await {
            Ok(mut result) if !result.is_any_error() => {
                result.task_id = task_id;
                return result;
            }
            Ok(result) => {
                let error = result
                    .message
                    .clone()
                    .unwrap_or_else(|| result.status.to_string());
                (error, result.cause)
            }
            Err(err) => (err.to_string(), None),
        };

        failures += 1;
        match budget.decide(failures, &error) {
            Decision::Retry { delay, reason } => {
                warn!(task_id = %task_id, attempt = failures, %reason, "task attempt failed");
                tokio::time::sleep(delay).await;
            }
            Decision::GiveUp { reason } => {
                warn!(task_id = %task_id, attempts = failures, %reason, "giving up on task");
                let result = TaskResult::failed(task_id, reason);
                return match cause {
                    Some(cause) => result.with_cause(cause),
                    None => result.with_cause(error),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecuteOption, TaskError, TaskResultStatus};
    use crate::task::FnTask;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn counting_task<F>(option: ExecuteOption, calls: Arc<AtomicU32>, f: F) -> Arc<dyn Task>
    where
        F: Fn(crate::domain::TaskId, u32) -> Result<TaskResult, TaskError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        FnTask::new(option, move |id| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let f = Arc::clone(&f);
            async move { (*f)(id, n) }
        })
        .into_arc()
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_task_is_attempted_max_retry_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = counting_task(ExecuteOption::new(3, 100), Arc::clone(&calls), |_, _| {
            Err(TaskError::execution("connection refused"))
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = AsyncTaskWorker::new(Arc::clone(&task), tx).run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.status, TaskResultStatus::Failed);
        assert!(result.message_or_empty().contains("retry limit reached"));
        assert!(result.message_or_empty().contains("connection refused"));

        assert_eq!(rx.recv().await, Some(TaskEvent::Created { task_id: task.task_id() }));
        assert!(matches!(rx.recv().await, Some(TaskEvent::Result { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn error_result_is_retried_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = counting_task(ExecuteOption::new(2, 50), Arc::clone(&calls), |id, n| {
            if n < 2 {
                Ok(TaskResult::failed(id, "503"))
            } else {
                Ok(TaskResult::success(id).with_message("accepted"))
            }
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = AsyncTaskWorker::new(task, tx).run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.status, TaskResultStatus::Success);
        assert_eq!(result.message_or_empty(), "accepted");
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_budget_means_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = counting_task(ExecuteOption::default(), Arc::clone(&calls), |id, _| {
            Ok(TaskResult::canceled(id, "rejected"))
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = AsyncTaskWorker::new(task, tx).run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.status, TaskResultStatus::Failed);
        assert_eq!(
            result.message_or_empty(),
            "request retry limit reached, last error: rejected"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_backoff_fails_the_task_without_submitting() {
        let calls = Arc::new(AtomicU32::new(0));
        let option = ExecuteOption::new(3, 100).with_backoff_multiplier(-2.0);
        let task = counting_task(option, Arc::clone(&calls), |_, _| {
            Err(TaskError::execution("connection refused"))
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = AsyncTaskWorker::new(task, tx).run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.status, TaskResultStatus::Failed);
        assert!(result.message_or_empty().contains("backoff_multiplier"));
        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, vec!["created", "result"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_before_further_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let task = counting_task(
            ExecuteOption::new(10, 1_000).with_timeout_ms(2_500),
            Arc::clone(&calls),
            |_, _| Err(TaskError::execution("down")),
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let started = tokio::time::Instant::now();
        let result = AsyncTaskWorker::new(task, tx).run().await;

        assert_eq!(result.status, TaskResultStatus::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(2_500));
        // attempts at t=0, 1000, 2000; the one due at 3000 never happens
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_aborts_a_hanging_call() {
        let task = FnTask::new(ExecuteOption::new(0, 0).with_timeout_ms(500), |id| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TaskResult::success(id))
        })
        .into_arc();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = AsyncTaskWorker::new(task, tx).run().await;

        assert_eq!(result.status, TaskResultStatus::Timeout);
        assert_eq!(result.message_or_empty(), "task timed out after 500 ms");
    }
}
