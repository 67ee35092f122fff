//! Saga orchestration on top of the message bus.
//!
//! A saga is a long-running process expressed as a set of event handlers.
//! This crate binds sagas to a bus and drives their instances:
//! - [`SagaComponent`] collects sagas and endpoints and binds them at boot
//! - [`ControlHandler`] serves the Start / Recover / Compensate commands
//! - [`EventHandler`] delivers events to the instance they address
//! - [`status`] exposes read-only HTTP status routes
//!
//! All processing for one instance is serialized by an
//! [`InstanceMutex`](saga_store::InstanceMutex); the store is read and
//! written only while that lock is held.

pub mod component;
pub mod config;
pub mod context;
pub mod contracts;
pub mod error;
pub mod handlers;
pub mod id_extractor;
pub mod saga;
pub mod status;

pub use component::{BoundSagaComponent, SagaComponent};
pub use config::{ComponentConfig, DEFAULT_LOCK_TIMEOUT};
pub use context::SagaContext;
pub use contracts::{
    CompensateSagaCommand, RecoverSagaCommand, SagaChildCompletedEvent, SagaCompletedEvent,
    StartSagaCommand, lifecycle_contracts, register_lifecycle_contracts,
};
pub use error::{BootError, Result, SagaError, SagaFailure};
pub use handlers::{ControlHandler, EventHandler};
pub use id_extractor::{HeaderIdExtractor, IdExtractor, PayloadFieldExtractor, SAGA_ID_HEADER};
pub use saga::{Saga, SagaRegistry};
pub use saga_store::{InstanceId, SagaState};
