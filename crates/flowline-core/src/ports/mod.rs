//! Ports - the collaborator interfaces the engine depends on.
//!
//! Persistence and cluster locking live outside the engine; these traits are
//! the seam. `impls` has in-memory versions for tests and demos.

pub mod clock;
pub mod flow_store;
pub mod id_generator;
pub mod lock_service;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::flow_store::FlowStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock_service::{Lease, LockService};
