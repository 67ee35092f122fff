//! Saga component configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::id_extractor::{HeaderIdExtractor, IdExtractor};

/// Default bound on waiting for an instance lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Options recognised by the saga component.
///
/// Every option has a default:
/// - `id_extractor`: [`HeaderIdExtractor`] reading the `saga-id` header
/// - `api_mount`: none, so no status routes are built
/// - `lock_timeout`: [`DEFAULT_LOCK_TIMEOUT`]
#[derive(Clone, Default)]
pub struct ComponentConfig {
    pub id_extractor: Option<Arc<dyn IdExtractor>>,
    pub api_mount: Option<String>,
    pub lock_timeout: Option<Duration>,
}

impl ComponentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how event handlers derive the target instance id.
    pub fn with_id_extractor(mut self, extractor: Arc<dyn IdExtractor>) -> Self {
        self.id_extractor = Some(extractor);
        self
    }

    /// Enables the read-only status routes under `mount` (e.g. `"/"` or
    /// `"/admin"`).
    pub fn with_api_mount(mut self, mount: impl Into<String>) -> Self {
        self.api_mount = Some(mount.into());
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub(crate) fn resolve(self) -> ResolvedConfig {
        ResolvedConfig {
            id_extractor: self
                .id_extractor
                .unwrap_or_else(|| Arc::new(HeaderIdExtractor::default())),
            api_mount: self.api_mount.map(|m| normalize_mount(&m)),
            lock_timeout: self.lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT),
        }
    }
}

impl std::fmt::Debug for ComponentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentConfig")
            .field("id_extractor", &self.id_extractor.as_ref().map(|_| "custom"))
            .field("api_mount", &self.api_mount)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

pub(crate) struct ResolvedConfig {
    pub(crate) id_extractor: Arc<dyn IdExtractor>,
    pub(crate) api_mount: Option<String>,
    pub(crate) lock_timeout: Duration,
}

/// Gives a mount point exactly one leading slash and no trailing slash.
/// The root mount is `"/"`.
fn normalize_mount(mount: &str) -> String {
    let trimmed = mount.trim().trim_matches('/');
    format!("/{trimmed}")
}
