//! Push pipeline scenarios: dispatch paths, outcome classification,
//! local-store repair, and reinstatement, driven through a mock transport.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use kinvey_sync::config::ClientConfig;
use kinvey_sync::error::{KinveyError, RemoteError, SyncError};
use kinvey_sync::query::Query;
use kinvey_sync::sync::{
    HttpMethod, PushErrorKind, RemoteRequest, RemoteTransport, SyncManager,
};

// ============================================================================
// Mock transport
// ============================================================================

type SendHandler =
    Box<dyn Fn(&RemoteRequest) -> Result<Value, RemoteError> + Send + Sync>;

struct MockTransport {
    calls: Mutex<Vec<RemoteRequest>>,
    handler: Mutex<Option<SendHandler>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        })
    }

    fn on_send(
        &self,
        f: impl Fn(&RemoteRequest) -> Result<Value, RemoteError> + Send + Sync + 'static,
    ) {
        *self.handler.lock() = Some(Box::new(f));
    }

    fn calls(&self) -> Vec<RemoteRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn send(&self, request: RemoteRequest) -> Result<Value, RemoteError> {
        self.calls.lock().push(request.clone());
        let handler = self.handler.lock();
        match &*handler {
            Some(f) => f(&request),
            // Default: echo the body back, the way a PUT answers.
            None => Ok(request.body.clone().unwrap_or_else(|| json!({}))),
        }
    }
}

fn manager(transport: Arc<MockTransport>) -> SyncManager {
    SyncManager::new(ClientConfig::new("app1"), transport).unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn update_of_server_known_entity_goes_out_as_put() {
    let transport = MockTransport::new();
    let m = manager(transport.clone());

    m.enqueue_create_or_update("books", json!({"_id": "a", "v": 1}))
        .unwrap();
    let results = m.push(None).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, HttpMethod::Put);
    assert_eq!(calls[0].path, "/appdata/app1/books/a");
    assert_eq!(calls[0].body, Some(json!({"_id": "a", "v": 1})));

    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].entity_id, "a");
    assert_eq!(results[0].entity, json!({"_id": "a", "v": 1}));
    assert_eq!(m.count(None).unwrap(), 0);
}

#[tokio::test]
async fn offline_create_posts_stripped_body_and_swaps_local_row() {
    let transport = MockTransport::new();
    transport.on_send(|request| {
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "/appdata/app1/books");
        let body = request.body.as_ref().unwrap();
        assert!(body.get("_id").is_none(), "device id must be stripped");
        assert!(body.get("_kmd").is_none(), "local marker must be stripped");
        Ok(json!({"_id": "srv7", "v": 2}))
    });
    let m = manager(transport.clone());

    let local = m.collection("books").unwrap();
    let entity = json!({"_id": "local_ab", "_kmd": {"local": true}, "v": 2});
    local.save(entity.clone()).unwrap();
    m.enqueue_create_or_update("books", entity).unwrap();

    let results = m.push(None).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].entity_id, "local_ab");
    assert_eq!(results[0].entity, json!({"_id": "srv7", "v": 2}));

    assert_eq!(
        local.find_by_id("srv7").unwrap(),
        Some(json!({"_id": "srv7", "v": 2}))
    );
    assert!(local.find_by_id("local_ab").unwrap().is_none());
    assert_eq!(m.count(None).unwrap(), 0);
}

#[tokio::test]
async fn delete_of_remotely_absent_entity_counts_as_success() {
    let transport = MockTransport::new();
    transport.on_send(|_| Err(RemoteError::NotFound));
    let m = manager(transport.clone());

    m.enqueue_delete("books", json!({"_id": "b"})).unwrap();
    let results = m.push(None).await.unwrap();

    // The always-retry reading of this case would loop on an entity that
    // can never reappear; the strict rule drops the record instead.
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success(), "404 on DELETE is success");
    assert_eq!(m.count(None).unwrap(), 0);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, HttpMethod::Delete);
}

#[tokio::test]
async fn server_error_reinstates_the_record_with_its_key() {
    let transport = MockTransport::new();
    transport.on_send(|_| {
        Err(RemoteError::Server {
            status: 500,
            message: "boom".into(),
        })
    });
    let m = manager(transport.clone());

    m.enqueue_create_or_update("books", json!({"_id": "c", "v": 1}))
        .unwrap();
    let results = m.push(None).await.unwrap();

    assert_eq!(results.len(), 1);
    let error = results[0].error.as_ref().expect("result carries the error");
    assert_eq!(error.kind, PushErrorKind::Transient);
    assert!(error.message.contains("500"), "{}", error.message);

    let pending = m.pending(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, 0, "original key preserved");
    assert_eq!(pending[0].entity_id, "c");
}

#[tokio::test]
async fn coalesced_entity_dispatches_exactly_once() {
    let transport = MockTransport::new();
    let m = manager(transport.clone());

    for v in 1..=3 {
        m.enqueue_create_or_update("books", json!({"_id": "d", "v": v}))
            .unwrap();
    }
    m.enqueue_delete("books", json!({"_id": "d"})).unwrap();
    assert_eq!(m.count(None).unwrap(), 1);

    let results = m.push(None).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1, "one remote op per coalesced entity");
    assert_eq!(calls[0].method, HttpMethod::Delete);
    assert_eq!(results.len(), 1);
    assert_eq!(m.count(None).unwrap(), 0);
}

#[tokio::test]
async fn credential_failure_repairs_local_row_and_drops_record() {
    let transport = MockTransport::new();
    transport.on_send(|request| match request.method {
        HttpMethod::Delete => Err(RemoteError::InsufficientCredentials { status: 403 }),
        HttpMethod::Get => Ok(json!({"_id": "e", "v": 9})),
        other => panic!("unexpected {other} call"),
    });
    let m = manager(transport.clone());

    let local = m.collection("books").unwrap();
    local.save(json!({"_id": "e", "v": 1})).unwrap();
    m.enqueue_delete("books", json!({"_id": "e"})).unwrap();

    let results = m.push(None).await.unwrap();

    assert_eq!(results.len(), 1);
    let error = results[0].error.as_ref().expect("result carries the error");
    assert_eq!(error.kind, PushErrorKind::Auth);

    assert_eq!(
        local.find_by_id("e").unwrap(),
        Some(json!({"_id": "e", "v": 9})),
        "local row restored to the remote's current value"
    );
    assert_eq!(m.count(None).unwrap(), 0, "record not reinstated");

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].method, HttpMethod::Get);
    assert_eq!(calls[1].path, "/appdata/app1/books/e");
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn empty_journal_pushes_nothing() {
    let transport = MockTransport::new();
    let m = manager(transport.clone());

    let results = m.push(None).await.unwrap();
    assert!(results.is_empty());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn one_remote_call_per_result() {
    let transport = MockTransport::new();
    let m = manager(transport.clone());

    for id in ["a", "b", "c", "d", "e"] {
        m.enqueue_create_or_update("books", json!({"_id": id}))
            .unwrap();
    }
    let results = m.push(None).await.unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(transport.calls().len(), 5);
}

#[tokio::test]
async fn small_batches_cover_all_records() {
    let transport = MockTransport::new();
    let config = ClientConfig::new("app1").with_push_batch_size(2);
    let m = SyncManager::new(config, transport.clone()).unwrap();

    for i in 0..5 {
        m.enqueue_create_or_update("books", json!({"_id": format!("b{i}")}))
            .unwrap();
    }
    let results = m.push(None).await.unwrap();

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(transport.calls().len(), 5);
    assert_eq!(m.count(None).unwrap(), 0);
}

#[tokio::test]
async fn repair_is_skipped_for_local_only_entities() {
    let transport = MockTransport::new();
    transport.on_send(|request| match request.method {
        HttpMethod::Post => Err(RemoteError::InsufficientCredentials { status: 401 }),
        other => panic!("unexpected {other} call"),
    });
    let m = manager(transport.clone());

    m.enqueue_create_or_update(
        "books",
        json!({"_id": "local_x", "_kmd": {"local": true}}),
    )
    .unwrap();
    let results = m.push(None).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].error.as_ref().unwrap().kind,
        PushErrorKind::Auth
    );
    // No GET: the backend has nothing to consult for a local-only entity.
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(m.count(None).unwrap(), 0);
}

#[tokio::test]
async fn repair_failures_never_surface() {
    let transport = MockTransport::new();
    transport.on_send(|request| match request.method {
        HttpMethod::Delete => Err(RemoteError::InsufficientCredentials { status: 403 }),
        HttpMethod::Get => Err(RemoteError::Network("offline".into())),
        other => panic!("unexpected {other} call"),
    });
    let m = manager(transport.clone());

    m.enqueue_delete("books", json!({"_id": "e"})).unwrap();
    let results = m.push(None).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error.as_ref().unwrap().kind, PushErrorKind::Auth);
    assert_eq!(m.count(None).unwrap(), 0);
}

#[tokio::test]
async fn timeout_is_classified_transient() {
    let transport = MockTransport::new();
    transport.on_send(|_| Err(RemoteError::Timeout(std::time::Duration::from_secs(5))));
    let m = manager(transport.clone());

    m.enqueue_create_or_update("books", json!({"_id": "t"}))
        .unwrap();
    let results = m.push(None).await.unwrap();

    assert_eq!(results[0].error.as_ref().unwrap().kind, PushErrorKind::Transient);
    assert_eq!(m.count(None).unwrap(), 1, "record reinstated");
}

#[tokio::test]
async fn unrecognized_method_is_abandoned_with_an_error() {
    let transport = MockTransport::new();
    let m = manager(transport.clone());

    // A journal row written by a newer engine revision, say.
    let rogue = json!({
        "_id": "00000000000000000042",
        "key": 42,
        "entityId": "x",
        "collection": "books",
        "state": {"method": "PATCH"},
        "entity": {"_id": "x"},
    });
    m.storage().save("kinvey_sync", &[rogue]).unwrap();
    assert_eq!(m.count(None).unwrap(), 1);

    let results = m.push(None).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].error.as_ref().unwrap().kind,
        PushErrorKind::Permanent
    );
    assert!(transport.calls().is_empty(), "nothing was dispatched");
    assert_eq!(m.count(None).unwrap(), 0, "record dropped, not reinstated");
}

#[tokio::test]
async fn mixed_batch_yields_one_result_per_record() {
    let transport = MockTransport::new();
    transport.on_send(|request| {
        if request.path.ends_with("/bad") {
            Err(RemoteError::Server {
                status: 502,
                message: "bad gateway".into(),
            })
        } else {
            Ok(request.body.clone().unwrap_or_else(|| json!({})))
        }
    });
    let m = manager(transport.clone());

    m.enqueue_create_or_update("books", json!({"_id": "good1"}))
        .unwrap();
    m.enqueue_create_or_update("books", json!({"_id": "bad"}))
        .unwrap();
    m.enqueue_create_or_update("books", json!({"_id": "good2"}))
        .unwrap();

    let results = m.push(None).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
    assert_eq!(results.iter().filter(|r| !r.is_success()).count(), 1);

    // Only the failed record is still pending.
    let pending = m.pending(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, "bad");
}

#[tokio::test]
async fn push_restricted_by_query_leaves_other_collections_pending() {
    let transport = MockTransport::new();
    let m = manager(transport.clone());

    m.enqueue_create_or_update("books", json!({"_id": "a"}))
        .unwrap();
    m.enqueue_create_or_update("movies", json!({"_id": "m"}))
        .unwrap();

    let q = Query::filtered(json!({"collection": "books"}));
    let results = m.push(Some(&q)).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity_id, "a");
    assert_eq!(m.count(None).unwrap(), 1);
    assert_eq!(m.pending(None).unwrap()[0].collection, "movies");
}

// ============================================================================
// Re-entry
// ============================================================================

struct GatedTransport {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl RemoteTransport for GatedTransport {
    async fn send(&self, _request: RemoteRequest) -> Result<Value, RemoteError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(json!({}))
    }
}

#[tokio::test]
async fn concurrent_push_is_refused() {
    let transport = Arc::new(GatedTransport {
        started: Notify::new(),
        release: Notify::new(),
    });
    let m = Arc::new(SyncManager::new(ClientConfig::new("app1"), transport.clone()).unwrap());

    m.enqueue_create_or_update("books", json!({"_id": "a", "v": 1}))
        .unwrap();

    let first = {
        let m = m.clone();
        tokio::spawn(async move { m.push(None).await })
    };
    transport.started.notified().await;

    let second = m.push(None).await;
    assert!(matches!(
        second,
        Err(KinveyError::Sync(SyncError::PushInProgress))
    ));

    transport.release.notify_one();
    let results = first.await.unwrap().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
}
