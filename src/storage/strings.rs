//! String-value dictionary backend.
//!
//! The narrowest capability tier: a per-table dictionary of id → serialized
//! JSON string. Docs are serialized on write and parsed on read, which makes
//! stored values opaque to the backend itself.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageError;
use crate::storage::is_system_table;

use super::backend::{doc_id, StorageBackend};

/// table name → (doc id → serialized doc)
type Tables = HashMap<String, HashMap<String, String>>;

pub struct StringBackend {
    id_attribute: String,
    tables: Mutex<Tables>,
}

impl StringBackend {
    pub fn new(id_attribute: impl Into<String>) -> Self {
        Self {
            id_attribute: id_attribute.into(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Capability probe. The dictionary has no external requirements.
    pub fn is_available() -> bool {
        true
    }

    fn parse(table: &str, id: &str, raw: &str) -> Result<Value, StorageError> {
        serde_json::from_str(raw).map_err(|source| StorageError::Corruption {
            table: table.to_string(),
            id: id.to_string(),
            source,
        })
    }
}

impl StorageBackend for StringBackend {
    fn find(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        let tables = self.tables.lock();
        let t = match tables.get(table) {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };
        t.iter()
            .map(|(id, raw)| Self::parse(table, id, raw))
            .collect()
    }

    fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        let tables = self.tables.lock();
        match tables.get(table).and_then(|t| t.get(id)) {
            Some(raw) => Ok(Some(Self::parse(table, id, raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, table: &str, docs: &[Value]) -> Result<Vec<Value>, StorageError> {
        let mut keyed = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc_id(doc, &self.id_attribute, table)?;
            keyed.push((id.to_string(), doc.to_string()));
        }

        let mut tables = self.tables.lock();
        let t = tables.entry(table.to_string()).or_default();
        for (id, raw) in keyed {
            t.insert(id, raw);
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
