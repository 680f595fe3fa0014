//! Task workers.
//!
//! - `AsyncTaskWorker`: submit with retry, under an optional deadline
//! - `AsyncPollTaskWorker`: submit, then poll through a monitor
//! - `BatchWorker`: runs every task of a batch and reports `Completed`
//!
//! Workers report to the launching step only through its event channel.

pub mod async_worker;
pub mod batch_worker;
pub mod decision;
pub mod poll_worker;
pub(crate) mod supervise;

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::TaskEvent;

pub use self::async_worker::AsyncTaskWorker;
pub use self::batch_worker::BatchWorker;
pub use self::decision::{Decision, Phase, RetryBudget};
pub use self::poll_worker::AsyncPollTaskWorker;

/// Sending half of a step's event channel.
pub type EventSender = mpsc::UnboundedSender<TaskEvent>;

pub(crate) fn notify(events: &EventSender, event: TaskEvent) {
    let kind = event.kind();
    // the step may already have resumed or been paused
    if events.send(event).is_err() {
        debug!(event = kind, "event dropped, step no longer listening");
    }
}
