//! Durable storage and mutual exclusion for saga instances.
//!
//! The saga layer treats the store as a keyed read-modify-write target and
//! the mutex as the only concurrency control. Stores need atomic per-key
//! reads and writes; they do not lock.

pub mod advisory;
pub mod error;
pub mod filter;
pub mod instance;
pub mod memory;
pub mod mutex;
pub mod postgres;
pub mod store;

pub use advisory::PostgresAdvisoryMutex;
pub use common::{InstanceId, SagaState};
pub use error::{MutexError, Result, StoreError};
pub use filter::InstanceFilter;
pub use instance::{HistoryEntry, Revision, SagaInstance};
pub use memory::{InMemorySagaStore, InMemoryStoreFactory};
pub use mutex::{InstanceLock, InstanceMutex, LocalInstanceMutex, LockHandle};
pub use postgres::{PostgresSagaStore, PostgresStoreFactory};
pub use store::{SagaStore, StoreFactory};
