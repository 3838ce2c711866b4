//! Client configuration: every knob has a default, some may be overridden
//! through the environment, all may be overridden programmatically.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::storage::BackendKind;

/// Default REST namespace for data collections.
pub const DEFAULT_NAMESPACE: &str = "appdata";
/// Default reserved table holding the sync journal.
pub const DEFAULT_SYNC_TABLE: &str = "kinvey_sync";
/// Default entity identifier attribute.
pub const DEFAULT_ID_ATTRIBUTE: &str = "_id";
/// Default entity metadata attribute.
pub const DEFAULT_KMD_ATTRIBUTE: &str = "_kmd";
/// Default number of records pushed per batch.
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 100;

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Configuration for one client instance.
///
/// `app_key` scopes all persisted state (the storage database and the sync
/// counter); everything else carries a default from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application key; also the local database name.
    pub app_key: String,
    /// REST namespace segment (`KINVEY_DATASTORE_NAMESPACE`).
    pub api_namespace: String,
    /// Reserved journal table name (`KINVEY_SYNC_COLLECTION_NAME`).
    pub sync_table: String,
    /// Entity id attribute (`KINVEY_ID_ATTRIBUTE`).
    pub id_attribute: String,
    /// Entity metadata attribute (`KINVEY_KMD_ATTRIBUTE`).
    pub kmd_attribute: String,
    /// Records per push batch.
    pub push_batch_size: usize,
    /// Ordered backend preference; first available wins.
    pub backend_preference: Vec<BackendKind>,
    /// Per-request timeout; `None` leaves it to the transport.
    pub request_timeout: Option<Duration>,
    /// Directory for file-backed storage; `None` means the working directory.
    pub storage_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Build a configuration with defaults and environment overrides applied.
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            api_namespace: env_or("KINVEY_DATASTORE_NAMESPACE", DEFAULT_NAMESPACE),
            sync_table: env_or("KINVEY_SYNC_COLLECTION_NAME", DEFAULT_SYNC_TABLE),
            id_attribute: env_or("KINVEY_ID_ATTRIBUTE", DEFAULT_ID_ATTRIBUTE),
            kmd_attribute: env_or("KINVEY_KMD_ATTRIBUTE", DEFAULT_KMD_ATTRIBUTE),
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            backend_preference: BackendKind::default_preference(),
            request_timeout: None,
            storage_dir: None,
        }
    }

    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    pub fn with_backend_preference(mut self, preference: Vec<BackendKind>) -> Self {
        self.backend_preference = preference;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }
}

/// Validate a collection or database name: 1-128 chars of `[A-Za-z0-9-]`.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    let ok = !name.is_empty()
        && name.len() <= 128
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(name.to_string()))
    }
}
