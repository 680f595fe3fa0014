//! Flows - definitions and the driver that runs them.

pub mod definition;
pub mod driver;

pub use self::definition::{BuildError, FlowDefinition, FlowDefinitionBuilder, FlowProperties};
pub use self::driver::{FlowDriver, FlowDriverBuilder};
