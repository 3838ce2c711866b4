//! The public synchronization surface.
//!
//! `SyncManager` owns the journal and the push engine for one client.
//! Enqueue operations validate and throw; `push` collects per-record
//! errors into its results and only fails outright on programming errors
//! (re-entrant push).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{validate_name, ClientConfig};
use crate::error::{Result, SyncError};
use crate::query::Query;
use crate::storage::Storage;
use crate::store::LocalStore;

use super::journal::SyncJournal;
use super::push::PushEngine;
use super::types::{PushResult, RemoteTransport, SyncMethod, SyncRecord};

pub struct SyncManager {
    config: Arc<ClientConfig>,
    storage: Arc<Storage>,
    journal: Arc<SyncJournal>,
    engine: PushEngine,
    /// Guards `push` against re-entry; a second concurrent call is refused,
    /// never queued, because a double drain could claim twice.
    push_lock: Mutex<()>,
}

impl SyncManager {
    /// Open storage per the config's backend preference and build the
    /// engine on top of it.
    pub fn new(config: ClientConfig, transport: Arc<dyn RemoteTransport>) -> Result<Self> {
        let config = Arc::new(config);
        let storage = Arc::new(Storage::open(&config)?);
        Ok(Self::with_storage(config, storage, transport))
    }

    /// Build on an already-open storage handle.
    pub fn with_storage(
        config: Arc<ClientConfig>,
        storage: Arc<Storage>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        let journal = Arc::new(SyncJournal::new(storage.clone(), &config));
        let engine = PushEngine::new(
            journal.clone(),
            storage.clone(),
            transport,
            config.clone(),
        );
        Self {
            config,
            storage,
            journal,
            engine,
            push_lock: Mutex::new(()),
        }
    }

    /// The local table mirroring one collection.
    pub fn collection(&self, name: &str) -> Result<LocalStore> {
        LocalStore::open(self.storage.clone(), &self.config, name)
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Number of distinct entities with pending mutations.
    pub fn count(&self, query: Option<&Query>) -> Result<usize> {
        self.journal.count(query)
    }

    /// The coalesced pending mutations, without claiming them.
    pub fn pending(&self, query: Option<&Query>) -> Result<Vec<SyncRecord>> {
        self.journal.pending(query)
    }

    /// Record a local create-or-update for later push. Returns the entity
    /// unchanged.
    pub fn enqueue_create_or_update(&self, collection: &str, entity: Value) -> Result<Value> {
        self.enqueue(collection, SyncMethod::CreateOrUpdate, &entity)?;
        Ok(entity)
    }

    /// Record local create-or-updates for a batch of entities. All ids are
    /// validated before anything is written.
    pub fn enqueue_create_or_update_many(
        &self,
        collection: &str,
        entities: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.enqueue_many(collection, SyncMethod::CreateOrUpdate, entities)
    }

    /// Record a local delete for later push. Returns the entity unchanged.
    pub fn enqueue_delete(&self, collection: &str, entity: Value) -> Result<Value> {
        self.enqueue(collection, SyncMethod::Delete, &entity)?;
        Ok(entity)
    }

    pub fn enqueue_delete_many(
        &self,
        collection: &str,
        entities: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.enqueue_many(collection, SyncMethod::Delete, entities)
    }

    /// Drain matching pending mutations and push them to the backend.
    /// Per-record failures ride in the results; the call itself only fails
    /// on re-entry or journal I/O errors.
    pub async fn push(&self, query: Option<&Query>) -> Result<Vec<PushResult>> {
        let _guard = self
            .push_lock
            .try_lock()
            .map_err(|_| SyncError::PushInProgress)?;
        self.engine.push(query).await
    }

    /// Discard matching pending mutations. Returns how many were removed.
    pub fn clear(&self, query: Option<&Query>) -> Result<usize> {
        self.journal.clear(query)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn enqueue(&self, collection: &str, method: SyncMethod, entity: &Value) -> Result<SyncRecord> {
        Self::check_collection(collection)?;
        self.journal.enqueue(collection, method, entity)
    }

    fn enqueue_many(
        &self,
        collection: &str,
        method: SyncMethod,
        entities: Vec<Value>,
    ) -> Result<Vec<Value>> {
        Self::check_collection(collection)?;
        // Validate the whole batch before writing any record, so a bad
        // entity in the middle cannot leave a partial enqueue behind.
        for entity in &entities {
            let has_id = crate::entity::entity_id(entity, &self.config.id_attribute)
                .map(|id| !id.is_empty())
                .unwrap_or(false);
            if !has_id {
                return Err(SyncError::MissingEntityId.into());
            }
        }
        for entity in &entities {
            self.journal.enqueue(collection, method, entity)?;
        }
        Ok(entities)
    }

    fn check_collection(collection: &str) -> Result<()> {
        if collection.is_empty() {
            return Err(SyncError::MissingCollection.into());
        }
        validate_name(collection)?;
        Ok(())
    }
}
