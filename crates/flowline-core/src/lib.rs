//! flowline-core
//!
//! Core building blocks of the flowline workflow engine.
//!
//! # Modules
//! - **domain**: domain model (ids, results, options, transitions, flow records, errors, events)
//! - **ports**: collaborator interfaces (FlowStore, LockService, Clock, IdGenerator)
//! - **impls**: in-memory implementations of the ports, for development and tests
//! - **task**: the Task trait, group fan-out, batches, poll monitors
//! - **worker**: async / poll / batch workers with retry and deadlines
//! - **step**: step properties, executions, callback handling, StepBuilder
//! - **flow**: flow definitions and the FlowDriver

pub mod domain;
pub mod flow;
pub mod impls;
pub mod ports;
pub mod step;
pub mod task;
pub mod worker;

pub use domain::{
    BatchOption, ExecuteOption, FlowError, FlowId, FlowRecord, FlowResult, FlowState, LogEntry,
    MonitorOption, StepTransition, TaskError, TaskEvent, TaskId, TaskResult, TaskResultStatus,
};
pub use flow::{BuildError, FlowDefinition, FlowDriver, FlowProperties};
pub use step::{StepBuilder, StepCallbackHandler, StepContext, StepExecution};
pub use task::{AsyncPollMonitor, BatchTask, FnTask, GroupTask, Task};
