//! FlowDefinition - the dispatch table of one flow type.
//!
//! Built once through [`FlowDefinitionBuilder`], which validates everything it
//! can up front:
//! - at least one step, and at most one step flagged `first_step`
//! - no duplicate step ids
//! - every step a transition, mapping or property names exists

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{FlowError, FlowRecord};
use crate::step::{Step, StepBuilder};

/// Flow-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowProperties {
    /// Complete the flow as Failed when a step error has no `on_exception`
    /// target. When false the flow is paused for an operator instead.
    pub kill_non_recoverable: bool,

    /// Overall deadline in seconds, armed when the flow starts or resumes.
    /// 0 = none.
    pub timeout_sec: u64,

    /// Informational; hosts may use it to order flows.
    pub priority: i32,
}

impl Default for FlowProperties {
    fn default() -> Self {
        Self {
            kill_non_recoverable: true,
            timeout_sec: 0,
            priority: 0,
        }
    }
}

/// Errors found while building a flow definition or one of its steps.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Flow '{0}' declares no steps.")]
    NoSteps(String),

    #[error("A step was declared with an empty id.")]
    EmptyStepId,

    #[error("Step '{0}' has no execution. Use run_to, park_in_state, execute or one of the execute_async_* methods.")]
    MissingExecution(String),

    #[error("Step '{0}' is declared more than once.")]
    DuplicateStep(String),

    #[error("More than one step is flagged as first step: {0:?}.")]
    MultipleFirstSteps(Vec<String>),

    #[error("Step '{step}' refers to unknown step '{target}'.")]
    UnknownTarget { step: String, target: String },

    #[error("Step '{0}' has an invalid option: {1}")]
    InvalidOption(String, String),
}

pub struct FlowDefinition {
    flow_type: String,
    properties: FlowProperties,
    steps: HashMap<String, Step>,

    /// Step ids in declaration order.
    order: Vec<String>,
    first_step: String,
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("flow_type", &self.flow_type)
            .field("properties", &self.properties)
            .field("steps", &self.order)
            .field("first_step", &self.first_step)
            .finish()
    }
}

impl FlowDefinition {
    pub fn builder(flow_type: impl Into<String>) -> FlowDefinitionBuilder {
        FlowDefinitionBuilder::new(flow_type)
    }

    pub fn flow_type(&self) -> &str {
        &self.flow_type
    }

    pub fn properties(&self) -> &FlowProperties {
        &self.properties
    }

    pub fn first_step(&self) -> &str {
        &self.first_step
    }

    pub fn step(&self, id: &str) -> Result<&Step, FlowError> {
        self.steps
            .get(id)
            .ok_or_else(|| FlowError::StepNotFound(id.to_string()))
    }

    pub fn has_step(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }

    /// Weight of every step that counts as progress.
    pub fn total_weight(&self) -> u64 {
        self.steps()
            .filter(|s| !s.properties.is_error_step)
            .map(|s| u64::from(s.properties.weight))
            .sum()
    }

    /// Share of the flow's weight already completed, in `[0.0, 1.0]`.
    pub fn progress(&self, record: &FlowRecord) -> f64 {
        let total = self.total_weight();
        if total == 0 {
            return 0.0;
        }
        let done: u64 = record
            .completed_steps
            .iter()
            .filter_map(|id| self.steps.get(id))
            .filter(|s| !s.properties.is_error_step)
            .map(|s| u64::from(s.properties.weight))
            .sum();
        (done as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// Builder for [`FlowDefinition`].
///
/// ```ignore
/// let definition = FlowDefinition::builder("deploy")
///     .step(StepBuilder::new("start").run_to("work"))
///     .step(StepBuilder::new("work").execute_async_tasks(make_tasks).on_result("stop", "handleError"))
///     .step(StepBuilder::new("stop").park_in_state(FlowState::Completed, FlowResult::Success, None))
///     .step(StepBuilder::new("handleError").error_step().park_in_state(FlowState::Completed, FlowResult::Failed, None))
///     .build()?;
/// ```
pub struct FlowDefinitionBuilder {
    flow_type: String,
    properties: FlowProperties,
    steps: Vec<StepBuilder>,
}

impl FlowDefinitionBuilder {
    pub fn new(flow_type: impl Into<String>) -> Self {
        Self {
            flow_type: flow_type.into(),
            properties: FlowProperties::default(),
            steps: Vec::new(),
        }
    }

    pub fn properties(mut self, properties: FlowProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn step(mut self, step: StepBuilder) -> Self {
        self.steps.push(step);
        self
    }

    /// Build every step and validate the table.
    pub fn build(self) -> Result<FlowDefinition, BuildError> {
        if self.steps.is_empty() {
            return Err(BuildError::NoSteps(self.flow_type));
        }

        let mut steps = HashMap::with_capacity(self.steps.len());
        let mut order = Vec::with_capacity(self.steps.len());
        for builder in self.steps {
            let step = builder.build()?;
            let id = step.id().to_string();
            if steps.contains_key(&id) {
                return Err(BuildError::DuplicateStep(id));
            }
            order.push(id.clone());
            steps.insert(id, step);
        }

        let known: HashSet<&str> = order.iter().map(String::as_str).collect();
        for id in &order {
            let step = &steps[id];
            let targets = step
                .properties
                .targets()
                .chain(step.declared_targets.iter().map(String::as_str));
            for target in targets {
                if !known.contains(target) {
                    return Err(BuildError::UnknownTarget {
                        step: id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let flagged: Vec<String> = order
            .iter()
            .filter(|id| steps[*id].properties.first_step)
            .cloned()
            .collect();
        let first_step = match flagged.as_slice() {
            [] => order[0].clone(),
            [only] => only.clone(),
            _ => return Err(BuildError::MultipleFirstSteps(flagged)),
        };

        Ok(FlowDefinition {
            flow_type: self.flow_type,
            properties: self.properties,
            steps,
            order,
            first_step,
        })
    }
}
