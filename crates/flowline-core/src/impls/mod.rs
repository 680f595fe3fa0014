//! In-memory implementations of the ports, for development and tests.

pub mod inmem_lock;
pub mod inmem_store;

pub use self::inmem_lock::InMemoryLockService;
pub use self::inmem_store::InMemoryFlowStore;
