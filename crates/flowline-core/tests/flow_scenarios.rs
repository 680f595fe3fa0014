//! End-to-end flow scenarios through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use flowline_core::domain::MonitorOption;
use flowline_core::impls::{InMemoryFlowStore, InMemoryLockService};
use flowline_core::step::StepContext;
use flowline_core::task::{TaskTarget, WorkerKind};
use flowline_core::{
    AsyncPollMonitor, BatchOption, BatchTask, ExecuteOption, FlowDefinition, FlowDriver,
    FlowError, FlowResult, FlowState, FnTask, GroupTask, StepBuilder, StepCallbackHandler,
    StepTransition, Task, TaskError, TaskId, TaskResult, TaskResultStatus,
};
use serde_json::json;

/// Answers "running" for the first `pending` polls, then "done".
struct DeployMonitor {
    option: MonitorOption,
    polls: Arc<AtomicU32>,
    pending: u32,
}

impl AsyncPollMonitor for DeployMonitor {
    fn create_poll_task(
        &self,
        task: &Arc<dyn Task>,
        _last_result: &TaskResult,
    ) -> Result<Arc<dyn Task>, TaskError> {
        let polls = Arc::clone(&self.polls);
        let pending = self.pending;
        let poll = FnTask::with_id(task.task_id(), ExecuteOption::default(), move |id| {
            let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                let state = if n <= pending { "running" } else { "done" };
                Ok(TaskResult::success(id).with_payload(json!({ "state": state })))
            }
        });
        Ok(poll.into_arc())
    }

    fn process_poll_result(&self, _task: &dyn Task, poll_result: &TaskResult) -> Option<TaskResult> {
        match poll_result.payload.get("state").and_then(|s| s.as_str()) {
            Some("done") => Some(TaskResult::success(poll_result.task_id).with_message("deployed")),
            _ => None,
        }
    }

    fn monitor_option(&self) -> &MonitorOption {
        &self.option
    }
}

fn remote_call(task_id: TaskId, option: &ExecuteOption, target: &TaskTarget) -> Arc<dyn Task> {
    let fail = target.host == "host-b";
    FnTask::with_id(task_id, option.clone(), move |id| async move {
        if fail {
            Ok(TaskResult::failed(id, "disk full"))
        } else {
            Ok(TaskResult::success(id).with_message("applied"))
        }
    })
    .into_arc()
}

fn done(id: &str) -> StepBuilder {
    StepBuilder::new(id).park_in_state(FlowState::Completed, FlowResult::Success, Some("all done"))
}

fn handle_error() -> StepBuilder {
    StepBuilder::new("handleError").error_step().park_in_state(
        FlowState::Completed,
        FlowResult::Failed,
        Some("flow failed"),
    )
}

#[tokio::test(start_paused = true)]
async fn mixed_fan_out_takes_the_most_severe_result() {
    let polls = Arc::new(AtomicU32::new(0));
    let monitor: Arc<dyn AsyncPollMonitor> = Arc::new(DeployMonitor {
        option: MonitorOption::new(100, 5).unwrap(),
        polls: Arc::clone(&polls),
        pending: 2,
    });

    let definition = FlowDefinition::builder("deploy")
        .step(StepBuilder::new("start").weight(0).run_to("deploy"))
        .step(
            StepBuilder::new("deploy")
                .weight(5)
                .execute_batch(move |_ctx: &StepContext| -> Result<BatchTask, FlowError> {
                    let mut batch = BatchTask::new(BatchOption::unbounded());
                    let group = GroupTask::new(ExecuteOption::new(0, 0), remote_call)
                        .hosts(["host-a", "host-b"]);
                    batch.push(Arc::new(group), WorkerKind::Async);

                    let deploy = FnTask::new(ExecuteOption::default(), |id| async move {
                        Ok(TaskResult::success(id).with_message("accepted"))
                    });
                    batch.push(deploy.into_arc(), WorkerKind::AsyncPoll(Arc::clone(&monitor)));
                    Ok(batch)
                })
                .on_result("stop", "handleError"),
        )
        .step(done("stop"))
        .step(handle_error())
        .build()
        .unwrap();

    let driver = FlowDriver::builder(Arc::new(definition)).create().await.unwrap();
    driver.run_flow().await.unwrap();
    assert_eq!(driver.wait_until_settled().await.unwrap(), FlowState::Completed);

    let record = driver.record().await;
    assert_eq!(record.result, FlowResult::Failed);
    assert_eq!(record.current_step.as_deref(), Some("handleError"));

    let results = record.task_results("deploy");
    assert_eq!(results.len(), 3);
    assert_eq!(
        results
            .iter()
            .filter(|r| r.status == TaskResultStatus::Success)
            .count(),
        2
    );
    let failed = results
        .iter()
        .find(|r| r.status == TaskResultStatus::Failed)
        .unwrap();
    assert_eq!(
        failed.message.as_deref(),
        Some("request retry limit reached, last error: disk full")
    );

    let result_logs = record
        .logs_for("deploy")
        .filter(|l| l.task_id.is_some())
        .filter(|l| !l.entries[0].message.ends_with("submitted"))
        .count();
    assert_eq!(result_logs, 3);

    // two "running" answers, then "done"
    assert_eq!(polls.load(Ordering::SeqCst), 3);

    // deploy took an edge; the error step does not count
    assert_eq!(driver.progress().await, 5.0 / 6.0);
}

#[tokio::test]
async fn step_error_goes_to_error_step_without_rerunning() {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let definition = FlowDefinition::builder("provision")
        .step(StepBuilder::new("start").run_to("provision"))
        .step(
            StepBuilder::new("provision")
                .on_exception("handleError")
                .execute_fn(move |ctx: &mut StepContext| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FlowError::step_execution(ctx.step(), "quota exceeded"))
                }),
        )
        .step(done("stop"))
        .step(handle_error())
        .build()
        .unwrap();

    let driver = FlowDriver::builder(Arc::new(definition)).create().await.unwrap();
    driver.run_flow().await.unwrap();

    let record = driver.record().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(record.state, FlowState::Completed);
    assert_eq!(record.result, FlowResult::Failed);
    assert_eq!(record.current_step.as_deref(), Some("handleError"));
    assert_eq!(
        record.last_error.as_ref().map(|e| e.step.as_str()),
        Some("provision")
    );
    assert!(record.logs_for("handleError").any(|l| l.entries[0].message == "flow failed"));
}

#[tokio::test]
async fn unmapped_error_result_routes_through_on_exception() {
    let definition = FlowDefinition::builder("provision")
        .step(
            StepBuilder::new("provision")
                .on_exception("handleError")
                .execute_async_tasks(|_ctx| {
                    let task = FnTask::new(ExecuteOption::default(), |id| async move {
                        Ok(TaskResult::timeout(id, "no answer from agent"))
                    });
                    Ok(vec![task.into_arc()])
                })
                .on_success("stop"),
        )
        .step(done("stop"))
        .step(handle_error())
        .build()
        .unwrap();

    let driver = FlowDriver::builder(Arc::new(definition)).create().await.unwrap();
    driver.run_flow().await.unwrap();
    driver.wait_for_state(FlowState::Completed).await.unwrap();

    let record = driver.record().await;
    assert_eq!(record.result, FlowResult::Failed);
    assert_eq!(record.current_step.as_deref(), Some("handleError"));
    let error = record.last_error.as_ref().unwrap();
    assert_eq!(error.step, "provision");
    assert!(error.message.contains("no answer from agent"));
}

#[tokio::test]
async fn custom_processor_decides_on_all_results() {
    let definition = FlowDefinition::builder("quorum")
        .step(
            StepBuilder::new("vote")
                .execute_async_tasks(|_ctx| {
                    let tasks = (0..3)
                        .map(|i| {
                            FnTask::new(ExecuteOption::default(), move |id| async move {
                                if i == 0 {
                                    Ok(TaskResult::failed(id, "abstained"))
                                } else {
                                    Ok(TaskResult::success(id))
                                }
                            })
                            .into_arc()
                        })
                        .collect();
                    Ok(tasks)
                })
                .callback(StepCallbackHandler::new().with_processor(Arc::new(
                    |_handler: &StepCallbackHandler,
                     results: &[TaskResult]|
                     -> Result<StepTransition, FlowError> {
                        let ok = results.iter().filter(|r| !r.is_any_error()).count();
                        if ok * 2 > results.len() {
                            Ok(StepTransition::run_to("stop").log(format!("{ok} votes"), None))
                        } else {
                            Ok(StepTransition::run_to("handleError").with_result(FlowResult::Failed))
                        }
                    },
                ))),
        )
        .step(done("stop"))
        .step(handle_error())
        .build()
        .unwrap();

    let driver = FlowDriver::builder(Arc::new(definition)).create().await.unwrap();
    driver.run_flow().await.unwrap();
    driver.wait_until_settled().await.unwrap();

    let record = driver.record().await;
    assert_eq!(record.result, FlowResult::Success);
    assert_eq!(record.current_step.as_deref(), Some("stop"));
    assert!(record.logs_for("vote").any(|l| l.entries[0].message == "2 votes"));
}

#[tokio::test]
async fn paused_flow_resumes_on_another_driver() {
    let store = Arc::new(InMemoryFlowStore::new());
    let locks = Arc::new(InMemoryLockService::new());
    let slow = Arc::new(AtomicBool::new(true));
    let gate = Arc::clone(&slow);

    let definition = Arc::new(
        FlowDefinition::builder("upgrade")
            .step(StepBuilder::new("start").run_to("upgrade"))
            .step(
                StepBuilder::new("upgrade")
                    .execute_async_tasks(move |_ctx| {
                        let slow = gate.load(Ordering::SeqCst);
                        let task = FnTask::new(ExecuteOption::default(), move |id| async move {
                            if slow {
                                tokio::time::sleep(Duration::from_secs(3600)).await;
                            }
                            Ok(TaskResult::success(id))
                        });
                        Ok(vec![task.into_arc()])
                    })
                    .on_result("stop", "handleError"),
            )
            .step(done("stop"))
            .step(handle_error())
            .build()
            .unwrap(),
    );

    let first = FlowDriver::builder(Arc::clone(&definition))
        .store(store.clone())
        .locks(locks.clone())
        .create()
        .await
        .unwrap();
    first.run_flow().await.unwrap();
    first.pause().await.unwrap();
    assert_eq!(first.state(), FlowState::Paused);
    assert!(!locks.is_held(first.flow_id()).await);

    slow.store(false, Ordering::SeqCst);
    let second = FlowDriver::builder(definition)
        .store(store.clone())
        .locks(locks.clone())
        .load(first.flow_id())
        .await
        .unwrap();
    assert_eq!(second.state(), FlowState::Paused);

    second.resume().await.unwrap();
    assert_eq!(second.wait_until_settled().await.unwrap(), FlowState::Completed);

    let record = second.record().await;
    assert_eq!(record.result, FlowResult::Success);
    assert_eq!(record.completed_steps, vec!["start", "upgrade", "stop"]);
    assert_eq!(second.progress().await, 1.0);
    assert_eq!(store.len().await, 1);
    assert!(!second.step_logs().await.unwrap().is_empty());
}
