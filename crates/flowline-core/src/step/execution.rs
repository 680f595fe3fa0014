//! StepExecution - what a step does when the driver runs it.
//!
//! A step either answers synchronously with a real edge, or launches a batch
//! of tasks through [`StepContext::launch`] and answers NOOP. In the second
//! case the driver starts the batch and waits for the step's callback handler
//! to decide.

use std::sync::Arc;

use async_trait::async_trait;

use super::callback::StepCallbackHandler;
use crate::domain::{FlowError, FlowId, FlowRecord, StepTransition, TaskResult};
use crate::task::BatchTask;

/// Tasks to start once the step returns, with the handler that will reduce
/// their results.
#[derive(Debug)]
pub struct StepLaunch {
    pub batch: BatchTask,
    pub handler: StepCallbackHandler,
}

/// What a step sees while it runs.
pub struct StepContext {
    step: String,
    record: FlowRecord,
    launch: Option<StepLaunch>,
}

impl StepContext {
    pub fn new(step: impl Into<String>, record: FlowRecord) -> Self {
        Self {
            step: step.into(),
            record,
            launch: None,
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.record.flow_id
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Snapshot of the flow record taken when the step started.
    pub fn record(&self) -> &FlowRecord {
        &self.record
    }

    /// Results stored for `step` by earlier activations.
    pub fn task_results(&self, step: &str) -> &[TaskResult] {
        self.record.task_results(step)
    }

    /// Hand `batch` to the workers; `handler` decides where the flow goes once
    /// every task reported. Returns NOOP for the step to return.
    pub fn launch(&mut self, batch: BatchTask, handler: StepCallbackHandler) -> StepTransition {
        self.launch = Some(StepLaunch { batch, handler });
        StepTransition::NOOP
    }

    pub fn has_launch(&self) -> bool {
        self.launch.is_some()
    }

    pub(crate) fn take_launch(&mut self) -> Option<StepLaunch> {
        self.launch.take()
    }
}

#[async_trait]
pub trait StepExecution: Send + Sync {
    async fn execute(&self, ctx: &mut StepContext) -> Result<StepTransition, FlowError>;
}

/// Step that always answers with the same transition.
pub struct TransitionStep(pub StepTransition);

#[async_trait]
impl StepExecution for TransitionStep {
    async fn execute(&self, _ctx: &mut StepContext) -> Result<StepTransition, FlowError> {
        Ok(self.0.clone())
    }
}

/// Step backed by a synchronous closure.
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F> StepExecution for FnStep<F>
where
    F: Fn(&mut StepContext) -> Result<StepTransition, FlowError> + Send + Sync,
{
    async fn execute(&self, ctx: &mut StepContext) -> Result<StepTransition, FlowError> {
        (self.0)(ctx)
    }
}

/// Builds the batch for one activation of an async step.
pub type BatchFactory = Arc<dyn Fn(&StepContext) -> Result<BatchTask, FlowError> + Send + Sync>;

/// Step that launches a fresh batch on every activation.
pub struct AsyncStep {
    factory: BatchFactory,
    handler: StepCallbackHandler,
}

impl AsyncStep {
    pub fn new(factory: BatchFactory, handler: StepCallbackHandler) -> Self {
        Self { factory, handler }
    }

    pub fn handler(&self) -> &StepCallbackHandler {
        &self.handler
    }
}

#[async_trait]
impl StepExecution for AsyncStep {
    async fn execute(&self, ctx: &mut StepContext) -> Result<StepTransition, FlowError> {
        let batch = (self.factory)(ctx)?;
        Ok(ctx.launch(batch, self.handler.fresh()))
    }
}
