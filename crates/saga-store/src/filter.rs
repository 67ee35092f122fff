use serde::Deserialize;

use crate::{InstanceId, SagaInstance, SagaState};

/// Filter for listing saga instances.
///
/// All set criteria must match. Results are ordered by start time, oldest
/// first, before offset and limit are applied.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InstanceFilter {
    /// Filter by saga type.
    pub saga_type: Option<String>,

    /// Filter by lifecycle state.
    pub status: Option<SagaState>,

    /// Filter by parent instance.
    pub parent_id: Option<InstanceId>,

    /// Maximum number of instances to return.
    pub limit: Option<usize>,

    /// Number of instances to skip.
    pub offset: Option<usize>,
}

impl InstanceFilter {
    /// Creates a filter matching every instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by saga type.
    pub fn saga_type(mut self, saga_type: impl Into<String>) -> Self {
        self.saga_type = Some(saga_type.into());
        self
    }

    /// Filters by lifecycle state.
    pub fn status(mut self, status: SagaState) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by parent instance.
    pub fn parent_id(mut self, parent_id: InstanceId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Sets the maximum number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of results to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the instance satisfies every set criterion.
    ///
    /// Offset and limit are not considered.
    pub fn matches(&self, instance: &SagaInstance) -> bool {
        if let Some(ref saga_type) = self.saga_type
            && &instance.saga_type != saga_type
        {
            return false;
        }
        if let Some(status) = self.status
            && instance.status != status
        {
            return false;
        }
        if let Some(ref parent) = self.parent_id
            && instance.parent_id.as_ref() != Some(parent)
        {
            return false;
        }
        true
    }
}
