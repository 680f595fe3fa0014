//! flowline demo: roll a change out to a few hosts with simulated remote
//! calls, one of them polled until the remote side reports completion.
//!
//! ```text
//! flowline-cli [config.json]
//! RUST_LOG=debug flowline-cli
//! ```

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowline_core::domain::MonitorOption;
use flowline_core::step::StepContext;
use flowline_core::task::{TaskTarget, WorkerKind};
use flowline_core::{
    AsyncPollMonitor, BatchOption, BatchTask, ExecuteOption, FlowDefinition, FlowDriver, FlowError,
    FlowProperties, FlowResult, FlowState, FnTask, GroupTask, StepBuilder, StepExecution,
    StepTransition, Task, TaskError, TaskId, TaskResult,
};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DemoConfig {
    /// Hosts updated with a single remote call.
    hosts: Vec<String>,

    /// Host whose call always fails.
    failing_host: Option<String>,

    /// Host whose update is submitted, then polled.
    polled_host: String,

    /// "still running" answers before the polled host is done.
    pending_polls: u32,

    task: ExecuteOption,
    monitor: MonitorOption,
    batch: BatchOption,
    flow: FlowProperties,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["host-a".to_string(), "host-b".to_string()],
            failing_host: Some("host-b".to_string()),
            polled_host: "host-c".to_string(),
            pending_polls: 2,
            task: ExecuteOption::new(1, 200),
            monitor: MonitorOption {
                monitor_interval_ms: 300,
                max_poll_retry: 3,
            },
            batch: BatchOption::unbounded(),
            flow: FlowProperties::default(),
        }
    }
}

/// Remote side of the polled host.
struct SimulatedMonitor {
    option: MonitorOption,
    polls: Arc<AtomicU32>,
    pending: u32,
}

impl AsyncPollMonitor for SimulatedMonitor {
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
                sleep(Duration::from_millis(50)).await;
                let state = if n <= pending { "running" } else { "done" };
                Ok(TaskResult::success(id).with_payload(serde_json::json!({ "state": state, "poll": n })))
            }
        });
        Ok(poll.into_arc())
    }

    fn process_poll_result(&self, _task: &dyn Task, poll_result: &TaskResult) -> Option<TaskResult> {
        match poll_result.payload.get("state").and_then(|s| s.as_str()) {
            Some("done") => Some(
                TaskResult::success(poll_result.task_id)
                    .with_message("update applied")
                    .with_payload(poll_result.payload.clone()),
            ),
            _ => None,
        }
    }

    fn monitor_option(&self) -> &MonitorOption {
        &self.option
    }
}

/// One remote call per host.
fn remote_update(failing_host: Option<String>) -> impl Fn(TaskId, &ExecuteOption, &TaskTarget) -> Arc<dyn Task> + Send + Sync {
    move |task_id: TaskId, option: &ExecuteOption, target: &TaskTarget| {
        let host = target.host.clone();
        let fail = failing_host.as_deref() == Some(host.as_str());
        FnTask::with_id(task_id, option.clone(), move |id| {
            let host = host.clone();
            async move {
                sleep(Duration::from_millis(100)).await;
                if fail {
                    Ok(TaskResult::failed(id, format!("{host}: connection refused")))
                } else {
                    Ok(TaskResult::success(id).with_message(format!("{host}: updated")))
                }
            }
        })
        .into_arc()
    }
}

/// Summarizes the rollout before finishing.
struct Verify;

#[async_trait]
impl StepExecution for Verify {
    async fn execute(&self, ctx: &mut StepContext) -> Result<StepTransition, FlowError> {
        let updated = ctx.task_results("deploy").len();
        Ok(StepTransition::run_to("stop").log(format!("{updated} host(s) updated"), None))
    }
}

fn load_config() -> Result<DemoConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(DemoConfig::default()),
    }
}

fn definition(config: DemoConfig, polls: Arc<AtomicU32>) -> Result<FlowDefinition, Box<dyn Error>> {
    config.monitor.validate()?;
    let monitor: Arc<dyn AsyncPollMonitor> = Arc::new(SimulatedMonitor {
        option: config.monitor.clone(),
        polls,
        pending: config.pending_polls,
    });
    let DemoConfig {
        hosts,
        failing_host,
        polled_host,
        task,
        batch,
        flow,
        ..
    } = config;

    let definition = FlowDefinition::builder("rollout")
        .properties(flow)
        .step(StepBuilder::new("start").weight(0).run_to("deploy"))
        .step(
            StepBuilder::new("deploy")
                .desc("update every host")
                .weight(5)
                .execute_batch(move |_ctx: &StepContext| -> Result<BatchTask, FlowError> {
                    let mut tasks = BatchTask::new(batch.clone());
                    let group = GroupTask::new(task.clone(), remote_update(failing_host.clone()))
                        .hosts(hosts.clone());
                    tasks.push(Arc::new(group), WorkerKind::Async);

                    let host = polled_host.clone();
                    let submit = FnTask::new(task.clone(), move |id| {
                        let host = host.clone();
                        async move { Ok(TaskResult::success(id).with_message(format!("{host}: update submitted"))) }
                    });
                    tasks.push(submit.into_arc(), WorkerKind::AsyncPoll(Arc::clone(&monitor)));
                    Ok(tasks)
                })
                .on_result("verify", "handleError"),
        )
        .step(StepBuilder::new("verify").execute(Verify))
        .step(StepBuilder::new("stop").park_in_state(
            FlowState::Completed,
            FlowResult::Success,
            Some("rollout finished"),
        ))
        .step(StepBuilder::new("handleError").error_step().park_in_state(
            FlowState::Completed,
            FlowResult::Failed,
            Some("rollout failed"),
        ))
        .build()?;
    Ok(definition)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    info!(?config, "demo configuration");

    let polls = Arc::new(AtomicU32::new(0));
    let definition = Arc::new(definition(config, Arc::clone(&polls))?);

    let driver = FlowDriver::builder(definition).create().await?;
    driver.run_flow().await?;
    let state = driver.wait_until_settled().await?;

    let record = driver.record().await;
    println!(
        "flow {}: state={:?} result={:?} progress={:.0}% polls={}",
        record.flow_id,
        state,
        record.result,
        driver.progress().await * 100.0,
        polls.load(Ordering::SeqCst)
    );
    for log in &record.log {
        for entry in &log.entries {
            match &log.task_id {
                Some(task_id) => println!("  [{}] {task_id}: {}", log.step, entry.message),
                None => println!("  [{}] {}", log.step, entry.message),
            }
        }
    }
    if let Some(error) = &record.last_error {
        println!("last error in '{}': {}", error.step, error.message);
    }
    Ok(())
}
