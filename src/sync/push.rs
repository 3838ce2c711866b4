//! The push pipeline: drain the journal, coalesce, dispatch in bounded
//! batches, classify outcomes, repair local state on authorization
//! failures, and reinstate what can be retried.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::entity::{is_local, strip_for_create};
use crate::error::{RemoteError, Result, SyncError};
use crate::query::Query;
use crate::storage::Storage;
use crate::store::LocalStore;

use super::coalesce::coalesce;
use super::journal::SyncJournal;
use super::types::{
    HttpMethod, PushErrorKind, PushResult, RemoteRequest, RemoteTransport, SyncMethod, SyncRecord,
};

// ============================================================================
// PushEngine
// ============================================================================

pub struct PushEngine {
    journal: Arc<SyncJournal>,
    ctx: DispatchContext,
}

/// Everything a single dispatch task needs; cheap to clone into the task.
#[derive(Clone)]
struct DispatchContext {
    storage: Arc<Storage>,
    transport: Arc<dyn RemoteTransport>,
    config: Arc<ClientConfig>,
}

/// Terminal outcome of one dispatched record: its caller-visible result,
/// plus the record itself when it belongs back in the journal.
struct Dispatched {
    result: PushResult,
    reinstate: Option<SyncRecord>,
}

impl Dispatched {
    fn done(result: PushResult) -> Self {
        Self {
            result,
            reinstate: None,
        }
    }
}

impl PushEngine {
    pub fn new(
        journal: Arc<SyncJournal>,
        storage: Arc<Storage>,
        transport: Arc<dyn RemoteTransport>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            journal,
            ctx: DispatchContext {
                storage,
                transport,
                config,
            },
        }
    }

    /// Drain matching records and push them. Batches run sequentially;
    /// records within a batch are dispatched concurrently and their results
    /// collected in dispatch order. Failed records go back into the journal
    /// in one write at the end.
    pub async fn push(&self, query: Option<&Query>) -> Result<Vec<PushResult>> {
        let drained = self.journal.drain(query)?;
        if drained.is_empty() {
            return Ok(Vec::new());
        }

        let records = coalesce(drained);
        let batch_size = self.ctx.config.push_batch_size.max(1);
        let mut results = Vec::with_capacity(records.len());
        let mut to_reinstate = Vec::new();

        for batch in records.chunks(batch_size) {
            debug!("pushing batch of {} record(s)", batch.len());

            let mut handles = Vec::with_capacity(batch.len());
            for record in batch {
                let ctx = self.ctx.clone();
                let record = record.clone();
                handles.push((record.clone(), tokio::spawn(dispatch(ctx, record))));
            }

            for (original, handle) in handles {
                let dispatched = match handle.await {
                    Ok(d) => d,
                    // A panicked dispatch task: the remote outcome is
                    // unknown, so keep the record for a later retry.
                    Err(e) => Dispatched {
                        result: PushResult::failed(
                            original.entity_id.clone(),
                            original.entity.clone(),
                            PushErrorKind::Transient,
                            format!("dispatch failed: {e}"),
                        ),
                        reinstate: Some(original),
                    },
                };
                if let Some(record) = dispatched.reinstate {
                    to_reinstate.push(record);
                }
                results.push(dispatched.result);
            }
        }

        self.journal.reinstate(&to_reinstate)?;
        Ok(results)
    }
}

// ============================================================================
// Per-record dispatch
// ============================================================================

async fn dispatch(ctx: DispatchContext, record: SyncRecord) -> Dispatched {
    match record.state.method {
        SyncMethod::CreateOrUpdate => dispatch_save(ctx, record).await,
        SyncMethod::Delete => dispatch_delete(ctx, record).await,
        SyncMethod::Unknown => Dispatched::done(PushResult::failed(
            record.entity_id.clone(),
            record.entity,
            PushErrorKind::Permanent,
            SyncError::UnknownMethod("UNKNOWN".to_string()).to_string(),
        )),
    }
}

async fn dispatch_save(ctx: DispatchContext, record: SyncRecord) -> Dispatched {
    let config = &ctx.config;

    if is_local(&record.entity, &config.kmd_attribute) {
        // Never acknowledged by the backend: create, then swap the local
        // row from the device id to the server-assigned id.
        let body = strip_for_create(&record.entity, &config.id_attribute, &config.kmd_attribute);
        let request = RemoteRequest {
            method: HttpMethod::Post,
            path: collection_path(config, &record.collection),
            body: Some(body),
            timeout: config.request_timeout,
        };
        match ctx.transport.send(request).await {
            Ok(returned) => {
                let entity = if returned.is_object() {
                    if let Err(e) = replace_local_row(&ctx, &record, &returned) {
                        debug!(
                            "local swap after create failed for {}/{}: {e}",
                            record.collection, record.entity_id
                        );
                    }
                    returned
                } else {
                    record.entity.clone()
                };
                Dispatched::done(PushResult::acknowledged(record.entity_id, entity))
            }
            Err(error) => classify_failure(&ctx, record, error).await,
        }
    } else {
        let request = RemoteRequest {
            method: HttpMethod::Put,
            path: entity_path(config, &record.collection, &record.entity_id),
            body: Some(record.entity.clone()),
            timeout: config.request_timeout,
        };
        match ctx.transport.send(request).await {
            Ok(returned) => {
                let entity = if returned.is_object() {
                    if let Err(e) = write_local_row(&ctx, &record.collection, returned.clone()) {
                        debug!(
                            "local mirror after update failed for {}/{}: {e}",
                            record.collection, record.entity_id
                        );
                    }
                    returned
                } else {
                    record.entity.clone()
                };
                Dispatched::done(PushResult::acknowledged(record.entity_id, entity))
            }
            Err(error) => classify_failure(&ctx, record, error).await,
        }
    }
}

async fn dispatch_delete(ctx: DispatchContext, record: SyncRecord) -> Dispatched {
    let request = RemoteRequest {
        method: HttpMethod::Delete,
        path: entity_path(&ctx.config, &record.collection, &record.entity_id),
        body: None,
        timeout: ctx.config.request_timeout,
    };
    match ctx.transport.send(request).await {
        Ok(_) => Dispatched::done(PushResult::acknowledged(record.entity_id, record.entity)),
        // Already gone remotely: the delete is moot, not a failure.
        // Retrying a missing entity can never converge, so the record is
        // dropped rather than reinstated.
        Err(RemoteError::NotFound) => {
            Dispatched::done(PushResult::acknowledged(record.entity_id, record.entity))
        }
        Err(error) => classify_failure(&ctx, record, error).await,
    }
}

/// Classify a remote failure: credential failures trigger a best-effort
/// local repair and drop the record; everything else is retriable and the
/// record is reinstated.
async fn classify_failure(
    ctx: &DispatchContext,
    record: SyncRecord,
    error: RemoteError,
) -> Dispatched {
    if error.is_credential_failure() {
        repair(ctx, &record).await;
        return Dispatched::done(PushResult::failed(
            record.entity_id.clone(),
            record.entity,
            PushErrorKind::Auth,
            error.to_string(),
        ));
    }

    Dispatched {
        result: PushResult::failed(
            record.entity_id.clone(),
            record.entity.clone(),
            PushErrorKind::Transient,
            error.to_string(),
        ),
        reinstate: Some(record),
    }
}

// ============================================================================
// Repair
// ============================================================================

/// Restore the local row to the backend's current view of the entity.
/// Only meaningful for server-known entities; every failure in here is
/// swallowed; repair must never affect the push outcome.
async fn repair(ctx: &DispatchContext, record: &SyncRecord) {
    if is_local(&record.entity, &ctx.config.kmd_attribute) {
        return;
    }

    let request = RemoteRequest {
        method: HttpMethod::Get,
        path: entity_path(&ctx.config, &record.collection, &record.entity_id),
        body: None,
        timeout: ctx.config.request_timeout,
    };
    match ctx.transport.send(request).await {
        Ok(returned) if returned.is_object() => {
            if let Err(e) = write_local_row(ctx, &record.collection, returned) {
                debug!(
                    "repair write failed for {}/{}: {e}",
                    record.collection, record.entity_id
                );
            }
        }
        Ok(_) => {}
        Err(e) => debug!(
            "repair fetch failed for {}/{}: {e}",
            record.collection, record.entity_id
        ),
    }
}

// ============================================================================
// Local mirroring
// ============================================================================

/// After a successful create: store the returned doc under its
/// server-assigned id and drop the device-id row.
fn replace_local_row(ctx: &DispatchContext, record: &SyncRecord, returned: &Value) -> Result<()> {
    let store = collection_store(ctx, &record.collection);
    let saved = store.save(returned.clone())?;
    let new_id = saved.get(&ctx.config.id_attribute).and_then(Value::as_str);
    if new_id != Some(record.entity_id.as_str()) {
        store.remove_by_id(&record.entity_id)?;
    }
    Ok(())
}

fn write_local_row(ctx: &DispatchContext, collection: &str, doc: Value) -> Result<()> {
    collection_store(ctx, collection).save(doc)?;
    Ok(())
}

fn collection_store(ctx: &DispatchContext, collection: &str) -> LocalStore {
    // Collection names were validated at enqueue time.
    LocalStore::reserved(ctx.storage.clone(), &ctx.config, collection)
}

// ============================================================================
// Paths
// ============================================================================

fn collection_path(config: &ClientConfig, collection: &str) -> String {
    format!(
        "/{}/{}/{}",
        config.api_namespace, config.app_key, collection
    )
}

fn entity_path(config: &ClientConfig, collection: &str, id: &str) -> String {
    format!("{}/{}", collection_path(config, collection), id)
}
