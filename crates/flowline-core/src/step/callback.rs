//! StepCallbackHandler - reduces the events of one step's tasks to a single
//! transition.
//!
//! # Event handling
//! - `Created`: nothing to decide (the task id is recorded by the loop)
//! - `Submitted`: log-only transition
//! - `Result`: stored per task id, logged as `"<status>: <message>"`
//! - `Completed`: [`StepCallbackHandler::process_results`] over every stored
//!   result
//!
//! # Aggregation
//! The most severe result wins (first seen wins on ties). Its status is looked
//! up in the mapping table. An unmapped error falls back to an explicitly
//! configured default, otherwise it is an aggregation error. An unmapped
//! non-error falls back to the default, or NOOP.
//!
//! [`CallbackLoop`] is the single consumer of the step's event channel: it
//! feeds events to the handler one at a time and hands back the first real
//! edge. Events arriving after that are ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{
    FlowError, FlowResult, LogEntry, StepTransition, TaskEvent, TaskId, TaskResult,
    TaskResultStatus,
};

/// Replaces the default severity reduction.
pub type ResultProcessor =
    Arc<dyn Fn(&StepCallbackHandler, &[TaskResult]) -> Result<StepTransition, FlowError> + Send + Sync>;

/// Statuses that `map_result` routes to the "else" step.
const ELSE_STATUSES: [TaskResultStatus; 3] = [
    TaskResultStatus::Failed,
    TaskResultStatus::Timeout,
    TaskResultStatus::Canceled,
];

#[derive(Clone, Default)]
pub struct StepCallbackHandler {
    mapping: HashMap<TaskResultStatus, StepTransition>,
    default: Option<StepTransition>,
    processor: Option<ResultProcessor>,

    /// Results in arrival order, one per task id.
    results: Vec<TaskResult>,
}

impl fmt::Debug for StepCallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepCallbackHandler")
            .field("mapping", &self.mapping)
            .field("default", &self.default)
            .field("custom_processor", &self.processor.is_some())
            .field("results", &self.results.len())
            .finish()
    }
}

impl StepCallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler whose fallback transition is `transition`.
    pub fn with_default(transition: StepTransition) -> Self {
        Self {
            default: Some(transition),
            ..Self::default()
        }
    }

    /// Success runs to `on_success`; anything else runs to `on_else` with a
    /// Failed flow result.
    pub fn on_result(on_success: &str, on_else: &str) -> Self {
        let on_else = StepTransition::run_to(on_else).with_result(FlowResult::Failed);
        Self::with_default(on_else.clone())
            .map_result_to(on_else, &TaskResultStatus::ALL)
            .map_result_to(StepTransition::run_to(on_success), &[TaskResultStatus::Success])
    }

    /// Success runs to `on_success`; Failed, Timeout and Canceled run to
    /// `on_else`.
    pub fn map_result(self, on_success: &str, on_else: &str) -> Self {
        self.map_result_to_step(on_success, &[TaskResultStatus::Success])
            .map_result_to_step(on_else, &ELSE_STATUSES)
    }

    pub fn map_result_to(mut self, transition: StepTransition, statuses: &[TaskResultStatus]) -> Self {
        for status in statuses {
            self.mapping.insert(*status, transition.clone());
        }
        self
    }

    pub fn map_result_to_step(self, step: &str, statuses: &[TaskResultStatus]) -> Self {
        self.map_result_to(StepTransition::run_to(step), statuses)
    }

    /// Map `status` only if nothing is mapped for it yet.
    pub fn map_if_unmapped(&mut self, status: TaskResultStatus, transition: StepTransition) {
        self.mapping.entry(status).or_insert(transition);
    }

    pub fn set_default_if_none(&mut self, transition: StepTransition) {
        if self.default.is_none() {
            self.default = Some(transition);
        }
    }

    /// Take over `other`'s mappings (and its default, if it has one).
    pub fn merge(&mut self, other: &StepCallbackHandler) {
        self.mapping
            .extend(other.mapping.iter().map(|(s, t)| (*s, t.clone())));
        if let Some(default) = &other.default {
            self.default = Some(default.clone());
        }
        if let Some(processor) = &other.processor {
            self.processor = Some(Arc::clone(processor));
        }
    }

    pub fn with_processor(mut self, processor: ResultProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn mapping_for(&self, status: TaskResultStatus) -> Option<&StepTransition> {
        self.mapping.get(&status)
    }

    pub fn default_transition(&self) -> Option<&StepTransition> {
        self.default.as_ref()
    }

    /// Every step this handler can route to.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self
            .mapping
            .values()
            .chain(self.default.iter())
            .filter_map(|t| t.target_step.as_deref())
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }

    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    /// A fresh copy of the configuration with no accumulated results.
    pub fn fresh(&self) -> Self {
        Self {
            results: Vec::new(),
            ..self.clone()
        }
    }

    /// React to one event.
    pub fn handle(&mut self, event: TaskEvent) -> Result<StepTransition, FlowError> {
        match event {
            TaskEvent::Created { .. } => Ok(StepTransition::NOOP),
            TaskEvent::Submitted { task_id } => Ok(StepTransition::log_only(
                format!("task {task_id} submitted"),
                None,
            )),
            TaskEvent::Result { result, .. } => {
                let log = StepTransition::log_only(
                    format!("{}: {}", result.status, result.message_or_empty()),
                    result.cause.clone(),
                );
                self.store(result);
                Ok(log)
            }
            TaskEvent::Completed => match &self.processor {
                Some(processor) => processor(self, &self.results),
                None => self.process_results(&self.results),
            },
        }
    }

    fn store(&mut self, result: TaskResult) {
        match self.results.iter_mut().find(|r| r.task_id == result.task_id) {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
    }

    /// Severity reduction over `results`.
    pub fn process_results(&self, results: &[TaskResult]) -> Result<StepTransition, FlowError> {
        let mut worst: Option<&TaskResult> = None;
        for result in results {
            if worst.is_none_or(|w| result.is_more_severe_than(w)) {
                worst = Some(result);
            }
        }

        let Some(worst) = worst else {
            return Ok(self.default.clone().unwrap_or_default());
        };

        if let Some(mapped) = self.mapping.get(&worst.status) {
            return Ok(mapped
                .clone()
                .log(worst.message_or_empty(), worst.cause.clone()));
        }

        // the default only covers non-error outcomes
        if worst.is_any_error() {
            return Err(FlowError::Aggregation {
                status: worst.status,
                message: worst.message_or_empty().to_string(),
                cause: worst.cause.clone(),
            });
        }
        Ok(self.default.clone().unwrap_or_default())
    }
}

/// Record of what happened to a step's tasks, pushed to the flow driver.
#[derive(Debug, Clone, PartialEq)]
pub enum StepUpdate {
    TaskCreated { task_id: TaskId },
    TaskResult { result: TaskResult, log: Vec<LogEntry> },
    Log { task_id: Option<TaskId>, log: Vec<LogEntry> },
}

/// Receives the step's bookkeeping while its tasks run.
#[async_trait]
pub trait StepListener: Send + Sync {
    async fn apply(&self, step: &str, update: StepUpdate);
}

/// Single consumer of one step activation's event channel.
pub struct CallbackLoop {
    step: String,
    handler: StepCallbackHandler,
    listener: Arc<dyn StepListener>,
}

impl CallbackLoop {
    pub fn new(step: impl Into<String>, handler: StepCallbackHandler, listener: Arc<dyn StepListener>) -> Self {
        Self {
            step: step.into(),
            handler,
            listener,
        }
    }

    /// Consume events until the handler produces a real edge (or fails).
    ///
    /// Returns `None` if the channel closes first, e.g. because the step was
    /// paused and its workers aborted.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TaskEvent>,
    ) -> Option<Result<StepTransition, FlowError>> {
        while let Some(event) = events.recv().await {
            let task_id = event.task_id();
            debug!(step = %self.step, event = event.kind(), task_id = ?task_id, "step event");

            if let TaskEvent::Created { task_id } = &event {
                self.listener
                    .apply(&self.step, StepUpdate::TaskCreated { task_id: *task_id })
                    .await;
            }
            let stored = match &event {
                TaskEvent::Result { result, .. } => Some(result.clone()),
                _ => None,
            };

            let transition = match self.handler.handle(event) {
                Ok(transition) => transition,
                Err(err) => {
                    warn!(step = %self.step, error = %err, "step aggregation failed");
                    return self.finish(events, Err(err));
                }
            };

            if let Some(result) = stored {
                let log = transition.log.clone();
                self.listener
                    .apply(&self.step, StepUpdate::TaskResult { result, log })
                    .await;
            } else if !transition.is_edge() && !transition.log.is_empty() {
                let log = transition.log.clone();
                self.listener
                    .apply(&self.step, StepUpdate::Log { task_id, log })
                    .await;
            }

            if transition.is_edge() {
                return self.finish(events, Ok(transition));
            }
        }
        None
    }

    fn finish(
        &self,
        mut events: mpsc::UnboundedReceiver<TaskEvent>,
        outcome: Result<StepTransition, FlowError>,
    ) -> Option<Result<StepTransition, FlowError>> {
        // anything still queued arrived after the step was decided
        events.close();
        while let Ok(late) = events.try_recv() {
            debug!(step = %self.step, event = late.kind(), "ignoring event for decided step");
        }
        Some(outcome)
    }
}
