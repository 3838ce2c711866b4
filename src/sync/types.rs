//! Sync-specific types: journal records, push results, and the remote
//! transport trait the engine dispatches through.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KinveyError, RemoteError, Result};

// ============================================================================
// Journal records
// ============================================================================

/// What a pending mutation will do to the remote collection.
///
/// `Unknown` absorbs any unrecognized method string found in a persisted
/// record; such records are dropped at push time with a per-record error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    CreateOrUpdate,
    Delete,
    Unknown,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMethod::CreateOrUpdate => "CREATE_OR_UPDATE",
            SyncMethod::Delete => "DELETE",
            SyncMethod::Unknown => "UNKNOWN",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "CREATE_OR_UPDATE" => SyncMethod::CreateOrUpdate,
            "DELETE" => SyncMethod::Delete,
            _ => SyncMethod::Unknown,
        }
    }
}

impl Serialize for SyncMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SyncMethod {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SyncMethod::parse(&s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub method: SyncMethod,
}

/// One row of the sync journal: a pending mutation and the entity snapshot
/// taken at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Storage id, derived from `key`; primary-key uniqueness in the
    /// journal table keeps keys unique.
    #[serde(rename = "_id")]
    pub record_id: String,
    pub key: u64,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    pub collection: String,
    pub state: SyncState,
    pub entity: Value,
}

impl SyncRecord {
    pub fn new(
        key: u64,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        method: SyncMethod,
        entity: Value,
    ) -> Self {
        Self {
            record_id: record_id_for_key(key),
            key,
            entity_id: entity_id.into(),
            collection: collection.into(),
            state: SyncState { method },
            entity,
        }
    }

    pub fn to_doc(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| KinveyError::Internal(e.to_string()))
    }

    pub fn from_doc(doc: &Value) -> Option<Self> {
        serde_json::from_value(doc.clone()).ok()
    }
}

/// Zero-padded so lexicographic id order equals numeric key order.
pub fn record_id_for_key(key: u64) -> String {
    format!("{key:020}")
}

// ============================================================================
// Remote transport
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// One remote operation. The engine builds the path; wire encoding, auth,
/// and TLS belong to the transport.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

/// User-implemented network layer. Implementations map transport and HTTP
/// failures onto [`RemoteError`]; a timed-out request fails with
/// `RemoteError::Timeout`.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> std::result::Result<Value, RemoteError>;
}

// ============================================================================
// Push results
// ============================================================================

/// Classification of a per-record push failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushErrorKind {
    /// Retriable; the record went back into the journal.
    Transient,
    /// 401/403-class; retrying cannot make progress, the record is dropped.
    Auth,
    /// Malformed record; dropped.
    Permanent,
}

#[derive(Debug, Clone)]
pub struct PushError {
    pub message: String,
    pub kind: PushErrorKind,
}

/// Outcome of pushing one coalesced record. Errors are carried here, never
/// thrown: every dispatched record yields exactly one result.
#[derive(Debug, Clone)]
pub struct PushResult {
    /// The entity id the mutation was enqueued under (for an offline
    /// create, the device-generated id).
    pub entity_id: String,
    pub entity: Value,
    pub error: Option<PushError>,
}

impl PushResult {
    pub fn acknowledged(entity_id: impl Into<String>, entity: Value) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity,
            error: None,
        }
    }

    pub fn failed(
        entity_id: impl Into<String>,
        entity: Value,
        kind: PushErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity,
            error: Some(PushError {
                message: message.into(),
                kind,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ============================================================================
// Tests
// ============================================================================
