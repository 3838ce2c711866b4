//! The sync journal: a durable, append-only log of pending mutations,
//! stored in a reserved table and keyed by a monotonic counter.

use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::entity::entity_id;
use crate::error::{Result, SyncError};
use crate::query::Query;
use crate::storage::Storage;
use crate::store::LocalStore;

use super::coalesce::coalesce;
use super::types::{SyncMethod, SyncRecord};

/// System table holding per-client engine state; survives `clear_all`.
pub const CONFIG_TABLE: &str = "_kinvey_config";
/// Doc id of the persisted sync counter within [`CONFIG_TABLE`].
pub const SYNC_KEY_DOC: &str = "syncKey";

pub struct SyncJournal {
    store: LocalStore,
    counters: LocalStore,
    id_attribute: String,
    /// Cached counter value: the next key to assign. `None` until first
    /// use, then kept in step with the persisted doc.
    counter: Mutex<Option<u64>>,
}

impl SyncJournal {
    pub fn new(storage: Arc<Storage>, config: &ClientConfig) -> Self {
        Self {
            store: LocalStore::reserved(storage.clone(), config, &config.sync_table),
            counters: LocalStore::reserved(storage, config, CONFIG_TABLE),
            id_attribute: config.id_attribute.clone(),
            counter: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Counter
    // -----------------------------------------------------------------------

    /// Claim the next key: load the persisted counter on first use, bump
    /// it, persist, and hand out the pre-increment value. Keys are never
    /// reused even across restarts.
    fn next_key(&self) -> Result<u64> {
        let mut cached = self.counter.lock();
        let next = match *cached {
            Some(v) => v,
            None => self
                .counters
                .find_by_id(SYNC_KEY_DOC)?
                .and_then(|doc| doc.get("value").and_then(Value::as_u64))
                .unwrap_or(0),
        };
        self.counters
            .find_and_modify(SYNC_KEY_DOC, |_| json!({ "value": next + 1 }))?;
        *cached = Some(next + 1);
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Append one pending mutation. The entity must already carry a
    /// non-empty string id.
    pub fn enqueue(
        &self,
        collection: &str,
        method: SyncMethod,
        entity: &Value,
    ) -> Result<SyncRecord> {
        let id = entity_id(entity, &self.id_attribute)
            .filter(|id| !id.is_empty())
            .ok_or(SyncError::MissingEntityId)?;

        let key = self.next_key()?;
        let record = SyncRecord::new(key, collection, id, method, entity.clone());
        self.store.save(record.to_doc()?)?;
        Ok(record)
    }

    /// Atomically remove every record matching the query and return them.
    /// Callers are expected to `reinstate` the subset that fails.
    pub fn drain(&self, query: Option<&Query>) -> Result<Vec<SyncRecord>> {
        let records = self.find(query)?;
        for record in &records {
            self.store.remove_by_id(&record.record_id)?;
        }
        Ok(records)
    }

    /// Put failed records back, preserving their original keys.
    pub fn reinstate(&self, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let docs = records
            .iter()
            .map(SyncRecord::to_doc)
            .collect::<Result<Vec<_>>>()?;
        self.store.save_many(docs)?;
        Ok(())
    }

    /// Remove matching records. Returns how many were removed.
    pub fn clear(&self, query: Option<&Query>) -> Result<usize> {
        self.store.clean(query)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// All matching records, uncoalesced, in key order.
    pub fn find(&self, query: Option<&Query>) -> Result<Vec<SyncRecord>> {
        let docs = self.store.find(query)?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            match SyncRecord::from_doc(&doc) {
                Some(record) => records.push(record),
                // A row that no longer parses cannot be pushed; leave it
                // out rather than failing the whole read.
                None => warn!("skipping malformed sync record: {doc}"),
            }
        }
        records.sort_by_key(|r| r.key);
        Ok(records)
    }

    /// Matching records after coalescing, without removing anything.
    pub fn pending(&self, query: Option<&Query>) -> Result<Vec<SyncRecord>> {
        Ok(coalesce(self.find(query)?))
    }

    /// Number of distinct entities with pending mutations.
    pub fn count(&self, query: Option<&Query>) -> Result<usize> {
        Ok(self.pending(query)?.len())
    }
}
