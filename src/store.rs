//! Typed CRUD and query over one collection, on top of the storage adapter.
//!
//! The store bridges the richer query descriptor down to the adapter's full
//! table scan, generates device-local ids for incoming docs, and owns name
//! validation for user-facing collections.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{validate_name, ClientConfig};
use crate::entity::generate_entity_id;
use crate::error::Result;
use crate::query::{self, Aggregation, Query};
use crate::storage::Storage;

pub struct LocalStore {
    storage: Arc<Storage>,
    table: String,
    id_attribute: String,
}

impl LocalStore {
    /// Open a store over a user collection. The collection name is
    /// validated; reserved/system tables go through [`LocalStore::reserved`].
    pub fn open(storage: Arc<Storage>, config: &ClientConfig, collection: &str) -> Result<Self> {
        validate_name(collection)?;
        Ok(Self::reserved(storage, config, collection))
    }

    /// Open a store over an engine-internal table, skipping name validation.
    pub(crate) fn reserved(
        storage: Arc<Storage>,
        config: &ClientConfig,
        table: &str,
    ) -> Self {
        Self {
            storage,
            table: table.to_string(),
            id_attribute: config.id_attribute.clone(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.table
    }

    /// Generate a device-local id for a doc the backend has never seen.
    pub fn generate_id(&self) -> String {
        generate_entity_id()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Upsert one doc, assigning a device-local id when none is present.
    pub fn save(&self, doc: Value) -> Result<Value> {
        let saved = self.save_many(vec![doc])?;
        // save_many returns exactly as many docs as it was given
        Ok(saved.into_iter().next().expect("one doc in, one doc out"))
    }

    /// Upsert docs in a single all-or-nothing adapter call, assigning ids
    /// where missing.
    pub fn save_many(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let docs: Vec<Value> = docs
            .into_iter()
            .map(|mut doc| {
                if let Some(obj) = doc.as_object_mut() {
                    let has_id = obj
                        .get(&self.id_attribute)
                        .map(|v| v.is_string())
                        .unwrap_or(false);
                    if !has_id {
                        obj.insert(self.id_attribute.clone(), Value::from(self.generate_id()));
                    }
                }
                doc
            })
            .collect();
        Ok(self.storage.save(&self.table, &docs)?)
    }

    /// Read-modify-write a single doc under the adapter's per-call
    /// atomicity. `f` receives the current doc (if any) and returns the
    /// replacement.
    pub fn find_and_modify<F>(&self, id: &str, f: F) -> Result<Value>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let current = self.storage.find_by_id(&self.table, id)?;
        let mut updated = f(current);
        if let Some(obj) = updated.as_object_mut() {
            obj.insert(self.id_attribute.clone(), Value::from(id));
        }
        let saved = self.storage.save(&self.table, &[updated])?;
        Ok(saved.into_iter().next().expect("one doc in, one doc out"))
    }

    pub fn remove_by_id(&self, id: &str) -> Result<()> {
        Ok(self.storage.remove_by_id(&self.table, id)?)
    }

    /// Delete every doc matching the query. Returns how many were removed.
    pub fn clean(&self, query: Option<&Query>) -> Result<usize> {
        let matches = self.find(query)?;
        let mut removed = 0;
        for doc in &matches {
            if let Some(id) = doc.get(&self.id_attribute).and_then(Value::as_str) {
                self.storage.remove_by_id(&self.table, id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        Ok(self.storage.clear(&self.table)?)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn find(&self, query: Option<&Query>) -> Result<Vec<Value>> {
        let docs = self.storage.find(&self.table)?;
        match query {
            Some(q) => query::execute(docs, q),
            None => Ok(docs),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.storage.find_by_id(&self.table, id)?)
    }

    /// Count matches; the query's sort/skip/limit are ignored.
    pub fn count(&self, query: Option<&Query>) -> Result<usize> {
        let docs = self.storage.find(&self.table)?;
        match query {
            Some(q) => query::count_matching(&docs, q),
            None => Ok(docs.len()),
        }
    }

    pub fn group(&self, aggregation: &Aggregation) -> Result<Vec<Value>> {
        let docs = self.storage.find(&self.table)?;
        query::group(&docs, aggregation)
    }
}
