//! AsyncPollTaskWorker - submit, then poll until the remote work is done.
//!
//! The submit phase is the same as [`AsyncTaskWorker`](super::AsyncTaskWorker)
//! and spends the task's own retry budget. Polling spends a separate budget
//! taken from the monitor's [`MonitorOption`](crate::domain::MonitorOption).
//! One deadline, armed at first submission, covers both phases.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::async_worker::{submit, with_deadline};
use super::decision::{Decision, RetryBudget};
use super::supervise::execute_supervised;
use super::{EventSender, notify};
use crate::domain::{TaskEvent, TaskResult};
use crate::task::{AsyncPollMonitor, Task};

pub struct AsyncPollTaskWorker {
    task: Arc<dyn Task>,
    monitor: Arc<dyn AsyncPollMonitor>,
    events: EventSender,
}

impl AsyncPollTaskWorker {
    pub fn new(task: Arc<dyn Task>, monitor: Arc<dyn AsyncPollMonitor>, events: EventSender) -> Self {
        Self {
            task,
            monitor,
            events,
        }
    }

    /// Run to completion, report the terminal result and return it.
    pub async fn run(self) -> TaskResult {
        let task_id = self.task.task_id();
        notify(&self.events, TaskEvent::Created { task_id });

        let work = async {
            let submitted = submit(&self.task).await;
            if submitted.is_any_error() {
                return submitted;
            }
            debug!(task_id = %task_id, "task submitted, polling");
            notify(&self.events, TaskEvent::Submitted { task_id });
            self.poll(submitted).await
        };
        let result = with_deadline(&self.task, work).await;

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

    async fn poll(&self, submitted: TaskResult) -> TaskResult {
        let task_id = self.task.task_id();
        let option = self.monitor.monitor_option();
        if let Err(err) = option.validate() {
            warn!(task_id = %task_id, error = %err, "refusing to poll");
            return TaskResult::failed(task_id, err.to_string());
        }
        let budget = RetryBudget::for_poll(option);
        let mut last = submitted;
        let mut failures = 0;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let outcome = match self.monitor.create_poll_task(&self.task, &last) {
                Ok(poll_task) => execute_supervised(&poll_task).await,
                Err(err) => Err(err),
            };

            let error = match outcome {
                Ok(raw) if !raw.is_any_error() => {
                    match self.monitor.process_poll_result(self.task.as_ref(), &raw) {
                        Some(mut done) if done.is_complete() => {
                            debug!(task_id = %task_id, polls, "poll reported completion");
                            done.task_id = task_id;
                            return done;
                        }
                        _ => {
                            debug!(task_id = %task_id, polls, "still in progress");
                            last = raw;
                            None
                        }
                    }
                }
                Ok(raw) => Some(
                    raw.message
                        .clone()
                        .unwrap_or_else(|| raw.status.to_string()),
                ),
                Err(err) => Some(err.to_string()),
            };

            if let Some(error) = error {
                failures += 1;
                match budget.decide(failures, &error) {
                    Decision::Retry { reason, .. } => {
                        warn!(task_id = %task_id, poll_attempt = polls, %reason, "poll failed");
                    }
                    Decision::GiveUp { reason } => {
                        warn!(task_id = %task_id, polls, %reason, "giving up polling");
                        return TaskResult::failed(task_id, reason).with_cause(error);
                    }
                }
            }

            tokio::time::sleep(option.interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecuteOption, MonitorOption, TaskError, TaskId, TaskResultStatus};
    use crate::task::FnTask;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Poll task answers come from `answer(n)` for the n-th poll.
    struct ScriptedMonitor<F> {
        option: MonitorOption,
        polls: Arc<AtomicU32>,
        answer: Arc<F>,
    }

    impl<F> AsyncPollMonitor for ScriptedMonitor<F>
    where
        F: Fn(TaskId, u32) -> Result<TaskResult, TaskError> + Send + Sync + 'static,
    {
        fn create_poll_task(
            &self,
            task: &Arc<dyn Task>,
            _last: &TaskResult,
        ) -> Result<Arc<dyn Task>, TaskError> {
            let polls = Arc::clone(&self.polls);
            let answer = Arc::clone(&self.answer);
            let poll = FnTask::with_id(task.task_id(), ExecuteOption::default(), move |id| {
                let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                let answer = Arc::clone(&answer);
                async move { (*answer)(id, n) }
            });
            Ok(poll.into_arc())
        }

        fn process_poll_result(&self, _task: &dyn Task, poll: &TaskResult) -> Option<TaskResult> {
            match poll.payload.get("state").and_then(|s| s.as_str()) {
                Some("done") => Some(TaskResult::success(poll.task_id).with_message("done")),
                Some("failed") => Some(TaskResult::failed(poll.task_id, "remote job failed")),
                _ => None,
            }
        }

        fn monitor_option(&self) -> &MonitorOption {
            &self.option
        }
    }

    fn scripted<F>(interval_ms: u64, max_poll_retry: u32, answer: F) -> (Arc<dyn AsyncPollMonitor>, Arc<AtomicU32>)
    where
        F: Fn(TaskId, u32) -> Result<TaskResult, TaskError> + Send + Sync + 'static,
    {
        let polls = Arc::new(AtomicU32::new(0));
        let monitor = ScriptedMonitor {
            option: MonitorOption::new(interval_ms, max_poll_retry).unwrap(),
            polls: Arc::clone(&polls),
            answer: Arc::new(answer),
        };
        (Arc::new(monitor), polls)
    }

    fn state(id: TaskId, state: &str) -> TaskResult {
        TaskResult::success(id).with_payload(serde_json::json!({ "state": state }))
    }

    fn submit_ok(option: ExecuteOption, submits: Arc<AtomicU32>) -> Arc<dyn Task> {
        FnTask::new(option, move |id| {
            submits.fetch_add(1, Ordering::SeqCst);
            async move { Ok(TaskResult::success(id).with_message("accepted")) }
        })
        .into_arc()
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_complete() {
        let submits = Arc::new(AtomicU32::new(0));
        let task = submit_ok(ExecuteOption::default(), Arc::clone(&submits));
        let (monitor, polls) = scripted(100, 0, |id, n| {
            Ok(state(id, if n < 3 { "running" } else { "done" }))
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = AsyncPollTaskWorker::new(Arc::clone(&task), monitor, tx).run().await;

        assert_eq!(result.status, TaskResultStatus::Success);
        assert_eq!(result.task_id, task.task_id());
        assert_eq!(submits.load(Ordering::SeqCst), 1);
        assert_eq!(polls.load(Ordering::SeqCst), 3);

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, vec!["created", "submitted", "result"]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_retried_max_poll_retry_plus_one_times() {
        let submits = Arc::new(AtomicU32::new(0));
        let task = submit_ok(ExecuteOption::new(5, 10), Arc::clone(&submits));
        let (monitor, polls) = scripted(100, 2, |_, _| Err(TaskError::execution("404")));
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = AsyncPollTaskWorker::new(task, monitor, tx).run().await;

        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(submits.load(Ordering::SeqCst), 1);
        assert_eq!(result.status, TaskResultStatus::Failed);
        assert!(result.message_or_empty().starts_with("poll retry limit reached"));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_failures_do_not_spend_poll_budget() {
        let submits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&submits);
        let task = FnTask::new(ExecuteOption::new(2, 10), move |id| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(TaskError::execution("busy"))
                } else {
                    Ok(TaskResult::success(id))
                }
            }
        })
        .into_arc();
        let (monitor, polls) = scripted(100, 1, |id, n| {
            if n == 1 {
                Err(TaskError::execution("flaky"))
            } else {
                Ok(state(id, "done"))
            }
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = AsyncPollTaskWorker::new(task, monitor, tx).run().await;

        assert_eq!(result.status, TaskResultStatus::Success);
        assert_eq!(submits.load(Ordering::SeqCst), 3);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submit_skips_polling() {
        let task = FnTask::new(ExecuteOption::new(1, 10), |_id| async move {
            Err(TaskError::execution("refused"))
        })
        .into_arc();
        let (monitor, polls) = scripted(100, 0, |id, _| Ok(state(id, "done")));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = AsyncPollTaskWorker::new(task, monitor, tx).run().await;

        assert_eq!(result.status, TaskResultStatus::Failed);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, vec!["created", "result"]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_monitor_interval_fails_instead_of_spinning() {
        let submits = Arc::new(AtomicU32::new(0));
        let task = submit_ok(ExecuteOption::default(), Arc::clone(&submits));
        let polls = Arc::new(AtomicU32::new(0));
        let monitor: Arc<dyn AsyncPollMonitor> = Arc::new(ScriptedMonitor {
            option: serde_json::from_str(r#"{ "monitor_interval_ms": 0 }"#).unwrap(),
            polls: Arc::clone(&polls),
            answer: Arc::new(|id: TaskId, _n: u32| -> Result<TaskResult, TaskError> {
                Ok(state(id, "running"))
            }),
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = AsyncPollTaskWorker::new(task, monitor, tx).run().await;

        assert_eq!(submits.load(Ordering::SeqCst), 1);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert_eq!(result.status, TaskResultStatus::Failed);
        assert!(result.message_or_empty().contains("monitor_interval_ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_reported_by_monitor_is_terminal() {
        let task = submit_ok(ExecuteOption::default(), Arc::new(AtomicU32::new(0)));
        let (monitor, polls) = scripted(100, 5, |id, _| Ok(state(id, "failed")));
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = AsyncPollTaskWorker::new(task, monitor, tx).run().await;

        assert_eq!(result.status, TaskResultStatus::Failed);
        assert_eq!(result.message_or_empty(), "remote job failed");
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_deadline_covers_submit_and_poll() {
        let task = submit_ok(
            ExecuteOption::default().with_timeout_ms(1_000),
            Arc::new(AtomicU32::new(0)),
        );
        let (monitor, polls) = scripted(300, 0, |id, _| Ok(state(id, "running")));
        let (tx, _rx) = mpsc::unbounded_channel();

        let started = tokio::time::Instant::now();
        let result = AsyncPollTaskWorker::new(task, monitor, tx).run().await;

        assert_eq!(result.status, TaskResultStatus::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        let seen = polls.load(Ordering::SeqCst);
        // polls at t=0, 300, 600, 900
        assert_eq!(seen, 4);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(polls.load(Ordering::SeqCst), seen);
    }
}
