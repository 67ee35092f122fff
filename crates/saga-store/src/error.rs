use std::time::Duration;

use bus::CodecError;
use thiserror::Error;

use crate::{InstanceId, Revision};

/// Errors that can occur when interacting with a saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The revision being written does not match the stored revision.
    ///
    /// Under a correctly held instance mutex this indicates a stale copy.
    #[error(
        "Revision conflict for saga instance {instance_id}: expected {expected}, found {actual}"
    )]
    RevisionConflict {
        instance_id: InstanceId,
        expected: Revision,
        actual: Revision,
    },

    /// A stored row could not be interpreted.
    #[error("Corrupt record for saga instance {instance_id}: {reason}")]
    Corrupt {
        instance_id: InstanceId,
        reason: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Encoding or decoding with the bus codec failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur when acquiring or releasing an instance lock.
#[derive(Debug, Error)]
pub enum MutexError {
    /// The lock was not obtained within the timeout.
    #[error("Timed out after {timeout:?} waiting for lock on saga instance {instance_id}")]
    Timeout {
        instance_id: InstanceId,
        timeout: Duration,
    },

    /// The surrounding processing flow was cancelled while waiting.
    #[error("Lock acquisition for saga instance {0} was cancelled")]
    Cancelled(InstanceId),

    /// The lock backend failed.
    #[error("Lock backend error: {0}")]
    Database(#[from] sqlx::Error),
}
