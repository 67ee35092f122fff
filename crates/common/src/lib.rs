//! Shared types for the saga orchestration workspace.

pub mod state;
pub mod types;

pub use state::{SagaState, UnknownSagaState};
pub use types::{InstanceId, MessageId};
