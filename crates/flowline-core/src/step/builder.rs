//! StepBuilder - assembles a [`Step`] from properties and an execution.
//!
//! ```ignore
//! let step = StepBuilder::new("deploy")
//!     .weight(5)
//!     .on_exception("handleError")
//!     .execute_async_tasks(|ctx| Ok(deploy_tasks(ctx)))
//!     .on_result("verify", "rollback")
//!     .build()?;
//! ```

use std::sync::Arc;

use super::callback::StepCallbackHandler;
use super::execution::{AsyncStep, BatchFactory, FnStep, StepContext, StepExecution, TransitionStep};
use super::{Step, StepProperties};
use crate::domain::{
    BatchOption, FlowError, FlowResult, FlowState, StepTransition, TaskResultStatus,
};
use crate::flow::BuildError;
use crate::task::{AsyncPollMonitor, BatchTask, Task};

enum StepKind {
    Fixed(StepTransition),
    Custom(Arc<dyn StepExecution>),
    Tasks(Arc<dyn Fn(&StepContext) -> Result<Vec<Arc<dyn Task>>, FlowError> + Send + Sync>),
    PollTasks(
        Arc<dyn AsyncPollMonitor>,
        Arc<dyn Fn(&StepContext) -> Result<Vec<Arc<dyn Task>>, FlowError> + Send + Sync>,
    ),
    Batch(BatchFactory),
}

pub struct StepBuilder {
    properties: StepProperties,
    kind: Option<StepKind>,
    handler: Option<StepCallbackHandler>,
    batch_option: BatchOption,
}

impl StepBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_properties(StepProperties::new(id))
    }

    pub fn with_properties(properties: StepProperties) -> Self {
        Self {
            properties,
            kind: None,
            handler: None,
            batch_option: BatchOption::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.properties.id
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.properties.desc = desc.into();
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.properties.weight = weight;
        self
    }

    pub fn logging(mut self, logging: bool) -> Self {
        self.properties.logging = logging;
        self
    }

    pub fn first_step(mut self) -> Self {
        self.properties.first_step = true;
        self
    }

    pub fn error_step(mut self) -> Self {
        self.properties.is_error_step = true;
        self
    }

    pub fn on_success(mut self, step: impl Into<String>) -> Self {
        self.properties.on_success = Some(step.into());
        self
    }

    pub fn on_else(mut self, step: impl Into<String>) -> Self {
        self.properties.on_else = Some(step.into());
        self
    }

    /// Route errors raised while this step runs to `step`, with a Failed
    /// flow result.
    pub fn on_exception(mut self, step: impl Into<String>) -> Self {
        self.properties.on_exception = Some(step.into());
        self
    }

    pub fn execute(mut self, execution: impl StepExecution + 'static) -> Self {
        self.kind = Some(StepKind::Custom(Arc::new(execution)));
        self
    }

    pub fn execute_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut StepContext) -> Result<StepTransition, FlowError> + Send + Sync + 'static,
    {
        self.execute(FnStep(f))
    }

    pub fn run_to(mut self, step: impl Into<String>) -> Self {
        self.kind = Some(StepKind::Fixed(StepTransition::run_to(step)));
        self
    }

    pub fn park_in_state(mut self, state: FlowState, result: FlowResult, message: Option<&str>) -> Self {
        self.kind = Some(StepKind::Fixed(StepTransition::park_in_state(state, result, message)));
        self
    }

    /// Run the tasks built by `factory` with plain async workers.
    pub fn execute_async_tasks<F>(mut self, factory: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Vec<Arc<dyn Task>>, FlowError> + Send + Sync + 'static,
    {
        self.kind = Some(StepKind::Tasks(Arc::new(factory)));
        self
    }

    /// Run the tasks built by `factory` with poll workers driven by `monitor`.
    pub fn execute_async_poll_tasks<F>(mut self, monitor: Arc<dyn AsyncPollMonitor>, factory: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Vec<Arc<dyn Task>>, FlowError> + Send + Sync + 'static,
    {
        self.kind = Some(StepKind::PollTasks(monitor, Arc::new(factory)));
        self
    }

    /// Run a batch mixing worker kinds.
    pub fn execute_batch<F>(mut self, factory: F) -> Self
    where
        F: Fn(&StepContext) -> Result<BatchTask, FlowError> + Send + Sync + 'static,
    {
        self.kind = Some(StepKind::Batch(Arc::new(factory)));
        self
    }

    pub fn batch_option(mut self, option: BatchOption) -> Self {
        self.batch_option = option;
        self
    }

    /// Success runs to `on_success`, anything else to `on_else` with a Failed
    /// flow result.
    pub fn on_result(self, on_success: &str, on_else: &str) -> Self {
        self.callback(StepCallbackHandler::on_result(on_success, on_else))
    }

    /// Set the callback handler, or merge into the one already set.
    pub fn callback(mut self, handler: StepCallbackHandler) -> Self {
        match &mut self.handler {
            Some(existing) => existing.merge(&handler),
            None => self.handler = Some(handler),
        }
        self
    }

    pub fn build(self) -> Result<Step, BuildError> {
        let id = self.properties.id.clone();
        if id.is_empty() {
            return Err(BuildError::EmptyStepId);
        }
        self.batch_option
            .validate()
            .map_err(|e| BuildError::InvalidOption(id.clone(), e.to_string()))?;

        let kind = self.kind.ok_or_else(|| BuildError::MissingExecution(id.clone()))?;
        let handler = || callback_handler(self.handler.clone(), &self.properties);

        let (execution, declared_targets): (Arc<dyn StepExecution>, Vec<String>) = match kind {
            StepKind::Fixed(transition) => {
                let targets = transition.target_step.iter().cloned().collect();
                let execution: Arc<dyn StepExecution> = Arc::new(TransitionStep(transition));
                (execution, targets)
            }
            StepKind::Custom(execution) => (execution, Vec::new()),
            StepKind::Tasks(factory) => {
                let option = self.batch_option.clone();
                let batch: BatchFactory =
                    Arc::new(move |ctx: &StepContext| -> Result<BatchTask, FlowError> {
                        Ok(BatchTask::async_tasks(factory(ctx)?, option.clone()))
                    });
                async_step(batch, handler())
            }
            StepKind::PollTasks(monitor, factory) => {
                let option = self.batch_option.clone();
                let batch: BatchFactory =
                    Arc::new(move |ctx: &StepContext| -> Result<BatchTask, FlowError> {
                        Ok(BatchTask::poll_tasks(
                            factory(ctx)?,
                            Arc::clone(&monitor),
                            option.clone(),
                        ))
                    });
                async_step(batch, handler())
            }
            StepKind::Batch(factory) => async_step(factory, handler()),
        };

        Ok(Step {
            properties: self.properties,
            execution,
            declared_targets,
        })
    }
}

fn async_step(factory: BatchFactory, handler: StepCallbackHandler) -> (Arc<dyn StepExecution>, Vec<String>) {
    let targets = handler.targets().into_iter().map(str::to_string).collect();
    let execution: Arc<dyn StepExecution> = Arc::new(AsyncStep::new(factory, handler));
    (execution, targets)
}

/// The configured handler, completed from `on_success` / `on_else` where it
/// has no mapping of its own.
fn callback_handler(handler: Option<StepCallbackHandler>, properties: &StepProperties) -> StepCallbackHandler {
    let mut handler = handler.unwrap_or_default();
    if let Some(step) = &properties.on_success {
        handler.map_if_unmapped(TaskResultStatus::Success, StepTransition::run_to(step));
    }
    if let Some(step) = &properties.on_else {
        let on_else = StepTransition::run_to(step).with_result(FlowResult::Failed);
        for status in TaskResultStatus::ALL {
            if status != TaskResultStatus::Success {
                handler.map_if_unmapped(status, on_else.clone());
            }
        }
    }
    handler
}
