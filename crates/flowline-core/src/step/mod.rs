//! Steps - named units of flow logic.
//!
//! - `StepProperties`: declarative per-step configuration
//! - `StepExecution`: what runs when the step is current
//! - `StepCallbackHandler` / `CallbackLoop`: reduce task events to a transition
//! - `StepBuilder`: assembles a `Step` from the above

pub mod builder;
pub mod callback;
pub mod execution;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use self::builder::StepBuilder;
pub use self::callback::{CallbackLoop, ResultProcessor, StepCallbackHandler, StepListener, StepUpdate};
pub use self::execution::{
    AsyncStep, BatchFactory, FnStep, StepContext, StepExecution, StepLaunch, TransitionStep,
};

/// Per-step configuration.
///
/// Deserializes with defaults, so a host can keep a table of these in JSON
/// and only spell out what differs:
///
/// ```ignore
/// let props: StepProperties = serde_json::from_str(
///     r#"{ "id": "deploy", "weight": 5, "on_exception": "handleError" }"#,
/// )?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepProperties {
    pub id: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub desc: String,

    /// Share of the flow's progress this step represents.
    pub weight: u32,

    /// Persist this step's log lines in the flow record.
    pub logging: bool,

    /// Start the flow here instead of at the first declared step.
    pub first_step: bool,

    /// Error-handling step; running it does not count as progress.
    pub is_error_step: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_else: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_exception: Option<String>,
}

impl StepProperties {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Steps this step may transition to by configuration.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        [&self.on_success, &self.on_else, &self.on_exception]
            .into_iter()
            .filter_map(|t| t.as_deref())
    }
}

impl Default for StepProperties {
    fn default() -> Self {
        Self {
            id: String::new(),
            desc: String::new(),
            weight: 1,
            logging: true,
            first_step: false,
            is_error_step: false,
            on_success: None,
            on_else: None,
            on_exception: None,
        }
    }
}

/// A step ready to be registered in a flow definition.
#[derive(Clone)]
pub struct Step {
    pub properties: StepProperties,
    pub execution: Arc<dyn StepExecution>,

    /// Targets named inside the execution itself (fixed edges, callback
    /// mappings), checked when the flow definition is built.
    pub(crate) declared_targets: Vec<String>,
}

impl Step {
    pub fn id(&self) -> &str {
        &self.properties.id
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("properties", &self.properties)
            .field("declared_targets", &self.declared_targets)
            .finish()
    }
}
