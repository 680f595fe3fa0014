//! Domain model (IDs, results, options, transitions, flow records, errors,
//! events).

pub mod errors;
pub mod events;
pub mod flow;
pub mod ids;
pub mod options;
pub mod result;
pub mod transition;

pub use self::errors::{FlowError, LockError, StoreError, TaskError};
pub use self::events::TaskEvent;
pub use self::flow::{ErrorInfo, FlowRecord, StepLog};
pub use self::ids::{FlowId, LeaseId, TaskId};
pub use self::options::{BatchOption, ExecuteOption, MonitorOption};
pub use self::result::{TaskResult, TaskResultStatus};
pub use self::transition::{FlowResult, FlowState, LogEntry, StepTransition};
