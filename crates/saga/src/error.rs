//! Saga error types.

use std::time::Duration;

use bus::{BusError, CodecError, SchemeError, TypeKey};
use saga_store::{InstanceId, MutexError, SagaState, StoreError};
use thiserror::Error;

/// Error raised by saga definition logic.
///
/// Returned from [`Saga`](crate::Saga) hooks to signal a domain failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SagaFailure {
    message: String,
}

impl SagaFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for SagaFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for SagaFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for SagaFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid saga state: {err}"))
    }
}

impl From<CodecError> for SagaFailure {
    fn from(err: CodecError) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors that can occur while handling a lifecycle command or an event.
///
/// These are returned to the dispatcher, which owns retry and
/// dead-lettering. Nothing here is retried by the saga component itself.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The command is not valid in the instance's current state.
    #[error("Cannot apply {command} to saga instance {instance_id} in state {state}")]
    InvalidTransition {
        instance_id: InstanceId,
        command: TypeKey,
        state: SagaState,
    },

    /// The addressed instance was never started.
    #[error("Saga instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// The instance lock was not obtained in time.
    #[error("Timed out after {timeout:?} waiting for lock on saga instance {instance_id}")]
    LockTimeout {
        instance_id: InstanceId,
        timeout: Duration,
    },

    /// The processing flow was cancelled while waiting for the instance lock.
    #[error("Processing of saga instance {0} was cancelled")]
    Cancelled(InstanceId),

    /// The store failed to load or save the instance.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The mutex backend failed.
    #[error("Mutex error: {0}")]
    Mutex(#[source] MutexError),

    /// No saga is registered under this type key.
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// The saga does not declare a handler for this event type.
    #[error("Saga {saga_type} does not handle event {kind}")]
    UnhandledEvent { saga_type: String, kind: TypeKey },

    /// The control handler received a message it does not serve.
    #[error("Unsupported saga command: {0}")]
    UnsupportedCommand(TypeKey),

    /// No instance id could be derived from the message.
    #[error("No saga instance id in message {kind}")]
    MissingInstanceId { kind: TypeKey },

    /// Saga logic reported a failure.
    #[error("Saga logic failed: {0}")]
    Failure(#[from] SagaFailure),

    /// A message could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<MutexError> for SagaError {
    fn from(err: MutexError) -> Self {
        match err {
            MutexError::Timeout {
                instance_id,
                timeout,
            } => SagaError::LockTimeout {
                instance_id,
                timeout,
            },
            MutexError::Cancelled(instance_id) => SagaError::Cancelled(instance_id),
            other => SagaError::Mutex(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Fatal errors raised while binding the saga component at boot.
///
/// A boot error leaves no handler subscribed and no endpoint registered.
#[derive(Debug, Error)]
pub enum BootError {
    /// A saga declared an event type the scheme registry does not know.
    #[error("Saga {saga_type} handles event {kind}, which is not registered in the scheme: {source}")]
    UnresolvedEventType {
        saga_type: String,
        kind: TypeKey,
        #[source]
        source: SchemeError,
    },

    /// The store factory failed.
    #[error("Failed to create saga store: {0}")]
    StoreFactory(#[source] StoreError),

    /// A saga's init hook failed.
    #[error("Failed to initialize saga {saga_type}: {source}")]
    SagaInit {
        saga_type: String,
        #[source]
        source: SagaFailure,
    },

    /// Two registered sagas share a type key.
    #[error("Saga type registered twice: {0}")]
    DuplicateSagaType(String),

    /// The dispatcher rejected the subscription table.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
