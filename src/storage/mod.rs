//! Pluggable key/value persistence.
//!
//! A flat set of backends implements the same adapter contract; at
//! construction the first backend from an ordered preference list whose
//! capability probe succeeds is bound. No inheritance, no fallback at
//! runtime: probing happens once.

pub mod backend;
pub mod memory;
pub mod sqlite;
pub mod strings;

use log::debug;
use serde_json::Value;

use crate::config::{validate_name, ClientConfig};
use crate::error::{ConfigError, Result, StorageError};

pub use backend::StorageBackend;
pub use memory::ObjectBackend;
pub use sqlite::SqliteBackend;
pub use strings::StringBackend;

/// Tables whose names start with `_` are system tables: they hold engine
/// bookkeeping (e.g. the sync counter) and survive `clear_all`.
pub fn is_system_table(name: &str) -> bool {
    name.starts_with('_')
}

// ============================================================================
// Backend selection
// ============================================================================

/// The capability tiers a client can prefer between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Structured in-memory object store.
    Object,
    /// SQL over local files.
    Sqlite,
    /// String-value dictionary.
    Strings,
}

impl BackendKind {
    /// The default preference order.
    pub fn default_preference() -> Vec<BackendKind> {
        vec![BackendKind::Object, BackendKind::Sqlite, BackendKind::Strings]
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Object => "object",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Strings => "strings",
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// A bound storage handle for one database: the backend chosen by probe,
/// plus the database identity.
pub struct Storage {
    database: String,
    kind: BackendKind,
    backend: Box<dyn StorageBackend>,
}

impl Storage {
    /// Probe the configured preference list and bind the first supported
    /// backend. No backend available is fatal.
    pub fn open(config: &ClientConfig) -> Result<Self> {
        validate_name(&config.app_key)?;

        for kind in &config.backend_preference {
            if let Some(backend) = Self::probe(*kind, config)? {
                debug!(
                    "storage backend selected for {}: {}",
                    config.app_key,
                    kind.label()
                );
                return Ok(Self {
                    database: config.app_key.clone(),
                    kind: *kind,
                    backend,
                });
            }
        }

        let tried = config
            .backend_preference
            .iter()
            .map(|k| k.label())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::NoBackend(tried).into())
    }

    fn probe(
        kind: BackendKind,
        config: &ClientConfig,
    ) -> Result<Option<Box<dyn StorageBackend>>> {
        let id_attr = config.id_attribute.clone();
        Ok(match kind {
            BackendKind::Object if ObjectBackend::is_available() => {
                Some(Box::new(ObjectBackend::new(id_attr)))
            }
            BackendKind::Strings if StringBackend::is_available() => {
                Some(Box::new(StringBackend::new(id_attr)))
            }
            BackendKind::Sqlite if SqliteBackend::is_available() => {
                let dir = match &config.storage_dir {
                    Some(dir) => {
                        std::fs::create_dir_all(dir).ok();
                        dir.clone()
                    }
                    None => std::path::PathBuf::from("."),
                };
                let path = dir.join(format!("{}.sqlite3", config.app_key));
                match SqliteBackend::open(&path, id_attr) {
                    Ok(b) => Some(Box::new(b)),
                    // Probe failure means unsupported, not fatal: fall
                    // through to the next preference.
                    Err(e) => {
                        debug!("sqlite backend unavailable at {}: {e}", path.display());
                        None
                    }
                }
            }
            _ => None,
        })
    }

    /// Wrap an already-constructed backend (tests, custom deployments).
    pub fn with_backend(
        database: impl Into<String>,
        kind: BackendKind,
        backend: Box<dyn StorageBackend>,
    ) -> Result<Self> {
        let database = database.into();
        validate_name(&database)?;
        Ok(Self {
            database,
            kind,
            backend,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    // -----------------------------------------------------------------------
    // Adapter surface (delegation)
    // -----------------------------------------------------------------------

    pub fn find(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        self.backend.find(table)
    }

    pub fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.backend.find_by_id(table, id)
    }

    pub fn save(&self, table: &str, docs: &[Value]) -> Result<Vec<Value>, StorageError> {
        self.backend.save(table, docs)
    }

    pub fn remove_by_id(&self, table: &str, id: &str) -> Result<(), StorageError> {
        self.backend.remove_by_id(table, id)
    }

    pub fn clear(&self, table: &str) -> Result<(), StorageError> {
        self.backend.clear(table)
    }

    pub fn clear_all(&self) -> Result<(), StorageError> {
        self.backend.clear_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preference_binds_object_store() {
        let config = ClientConfig::new("app1");
        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.kind(), BackendKind::Object);
        assert_eq!(storage.database(), "app1");
    }

    #[test]
    fn preference_order_is_respected() {
        let config = ClientConfig::new("app1")
            .with_backend_preference(vec![BackendKind::Strings, BackendKind::Object]);
        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.kind(), BackendKind::Strings);
    }

    #[test]
    fn empty_preference_is_fatal() {
        let config = ClientConfig::new("app1").with_backend_preference(vec![]);
        assert!(Storage::open(&config).is_err());
    }

    #[test]
    fn invalid_database_name_is_fatal() {
        let config = ClientConfig::new("bad name");
        assert!(Storage::open(&config).is_err());
    }
}
