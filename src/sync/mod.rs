//! Offline write synchronization: the journal of pending mutations, the
//! coalescer, the push engine, and the public manager surface.

pub mod coalesce;
pub mod journal;
pub mod manager;
pub mod push;
pub mod types;

pub use coalesce::coalesce;
pub use journal::SyncJournal;
pub use manager::SyncManager;
pub use push::PushEngine;
pub use types::{
    HttpMethod, PushError, PushErrorKind, PushResult, RemoteRequest, RemoteTransport, SyncMethod,
    SyncRecord, SyncState,
};
