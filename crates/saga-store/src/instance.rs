use bus::{MessageId, TypeKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{InstanceId, SagaState};

/// Revision of a stored saga instance, used to detect stale writes.
///
/// An instance that has never been saved is at revision 0; every
/// successful save increments the revision by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(i64);

impl Revision {
    /// Creates a revision from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the revision of an unsaved instance (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next revision.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw revision value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Revision {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A message processed by a saga instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The processed message.
    pub message_id: MessageId,
    /// Its type key.
    pub kind: TypeKey,
    /// The instance status after processing.
    pub status: SagaState,
    /// When processing finished.
    pub recorded_at: DateTime<Utc>,
}

/// Persisted state of one saga instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    /// The instance identifier.
    pub id: InstanceId,

    /// Type key of the saga definition that owns this instance.
    pub saga_type: String,

    /// Parent instance, for sagas started by another saga.
    pub parent_id: Option<InstanceId>,

    /// Current lifecycle state.
    pub status: SagaState,

    /// Accumulated process state, opaque to the core.
    pub payload: serde_json::Value,

    /// Stored revision this copy was loaded at.
    pub revision: Revision,

    /// Last error raised by saga logic, if any.
    pub last_error: Option<String>,

    /// Reason given when compensation was requested.
    pub compensation_reason: Option<String>,

    /// Messages processed by this instance, oldest first.
    pub history: Vec<HistoryEntry>,

    /// When the instance was created.
    pub started_at: DateTime<Utc>,

    /// When the instance was last modified.
    pub updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates a new, unsaved instance.
    pub fn new(id: InstanceId, saga_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            saga_type: saga_type.into(),
            parent_id: None,
            status: SagaState::NotStarted,
            payload,
            revision: Revision::initial(),
            last_error: None,
            compensation_reason: None,
            history: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Sets the parent instance.
    pub fn with_parent(mut self, parent_id: Option<InstanceId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Returns true if the instance has already processed `message_id`.
    pub fn has_processed(&self, message_id: &MessageId) -> bool {
        self.history.iter().any(|h| &h.message_id == message_id)
    }

    /// Appends a history entry for a processed message at the current status.
    pub fn record(&mut self, message_id: MessageId, kind: TypeKey) {
        let now = Utc::now();
        self.history.push(HistoryEntry {
            message_id,
            kind,
            status: self.status,
            recorded_at: now,
        });
        self.updated_at = now;
    }

    /// Returns true if the instance is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
