use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(r#"Invalid name "{0}": must be 1-128 characters of [A-Za-z0-9-]"#)]
    InvalidName(String),

    #[error("No storage backend available (tried: {0})")]
    NoBackend(String),
}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(r#"Document saved to "{table}" is missing a string "{id_attribute}""#)]
    MissingId { table: String, id_attribute: String },

    #[error(r#"Document is not a JSON object and cannot be stored in "{table}""#)]
    NotAnObject { table: String },

    #[error("Storage corruption in {table}/{id}: stored value is not valid JSON")]
    Corruption {
        table: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// QueryError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(r#"Entity is missing an "_id" and cannot be added to the sync journal"#)]
    MissingEntityId,

    #[error("A collection name is required")]
    MissingCollection,

    #[error(r#"Unrecognized sync method "{0}""#)]
    UnknownMethod(String),

    #[error("A push is already in progress")]
    PushInProgress,
}

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Failure of a single remote operation, as classified by the transport.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Entity not found on the backend")]
    NotFound,

    #[error("Insufficient credentials (HTTP {status})")]
    InsufficientCredentials { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
}

impl RemoteError {
    /// True for 401/403-class failures, which trigger local-store repair.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, RemoteError::InsufficientCredentials { .. })
    }
}

// ---------------------------------------------------------------------------
// KinveyError, the top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum KinveyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias; the default error type is `KinveyError`.
pub type Result<T, E = KinveyError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
