//! Structured in-memory object store.
//!
//! Docs are held as parsed JSON values, keyed by table and id. Interior
//! mutability via `parking_lot::Mutex`; uncontended locks are near-zero
//! overhead under cooperative scheduling.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageError;
use crate::storage::is_system_table;

use super::backend::{doc_id, StorageBackend};

/// table name → (doc id → doc)
type Tables = HashMap<String, HashMap<String, Value>>;

pub struct ObjectBackend {
    id_attribute: String,
    tables: Mutex<Tables>,
}

impl ObjectBackend {
    pub fn new(id_attribute: impl Into<String>) -> Self {
        Self {
            id_attribute: id_attribute.into(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Capability probe. The object store has no external requirements.
    pub fn is_available() -> bool {
        true
    }
}

impl StorageBackend for ObjectBackend {
    fn find(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        let tables = self.tables.lock();
        Ok(tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        let tables = self.tables.lock();
        Ok(tables.get(table).and_then(|t| t.get(id)).cloned())
    }

    fn save(&self, table: &str, docs: &[Value]) -> Result<Vec<Value>, StorageError> {
        // Validate every doc before touching the table: all-or-nothing.
        let mut keyed = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc_id(doc, &self.id_attribute, table)?;
            keyed.push((id.to_string(), doc.clone()));
        }

        let mut tables = self.tables.lock();
        let t = tables.entry(table.to_string()).or_default();
        for (id, doc) in keyed {
            t.insert(id, doc);
        }
        Ok(docs.to_vec())
    }

    fn remove_by_id(&self, table: &str, id: &str) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        if let Some(t) = tables.get_mut(table) {
            t.remove(id);
        }
        Ok(())
    }

    fn clear(&self, table: &str) -> Result<(), StorageError> {
        self.tables.lock().remove(table);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        self.tables.lock().retain(|name, _| is_system_table(name));
        Ok(())
    }
}
