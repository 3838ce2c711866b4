//! The raw key/value adapter contract shared by every storage backend.

use serde_json::Value;

use crate::error::StorageError;

/// Uniform key/value persistence surface per table.
///
/// Implementors must be `Send + Sync` so a bound backend can be shared
/// across tasks. Semantics every backend honors:
///
/// - Keys are the doc's string id field; values are opaque JSON.
/// - `save` upserts and is all-or-nothing per call.
/// - Tables are created lazily on first write; reads against a missing
///   table return empty, never fail.
/// - `clear_all` drops every user table; system tables survive.
pub trait StorageBackend: Send + Sync {
    /// All docs in a table, undefined order.
    fn find(&self, table: &str) -> Result<Vec<Value>, StorageError>;

    /// A single doc by id, or `None`.
    fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError>;

    /// Upsert docs by id. Returns the saved docs.
    fn save(&self, table: &str, docs: &[Value]) -> Result<Vec<Value>, StorageError>;

    /// Remove one doc by id. Removing an absent doc is not an error.
    fn remove_by_id(&self, table: &str, id: &str) -> Result<(), StorageError>;

    /// Drop one table.
    fn clear(&self, table: &str) -> Result<(), StorageError>;

    /// Drop every user table.
    fn clear_all(&self) -> Result<(), StorageError>;
}

/// Extract the doc's id, validating that the doc is an object carrying a
/// string id. Called by backends before any write so a multi-doc `save`
/// fails whole.
pub fn doc_id<'a>(
    doc: &'a Value,
    id_attribute: &str,
    table: &str,
) -> Result<&'a str, StorageError> {
    let obj = doc.as_object().ok_or_else(|| StorageError::NotAnObject {
        table: table.to_string(),
    })?;
    obj.get(id_attribute)
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::MissingId {
            table: table.to_string(),
            id_attribute: id_attribute.to_string(),
        })
}
