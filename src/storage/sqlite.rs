//! SQLite storage backend.
//!
//! All tables share one `documents` relation keyed by (table, id), with the
//! doc serialized as JSON text. The connection is protected by a
//! `parking_lot::ReentrantMutex<RefCell<Connection>>` so multi-statement
//! operations can hold the lock across their whole transaction.

use std::cell::RefCell;
use std::path::Path;

use parking_lot::ReentrantMutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;
use crate::storage::is_system_table;

use super::backend::{doc_id, StorageBackend};

pub struct SqliteBackend {
    id_attribute: String,
    conn: ReentrantMutex<RefCell<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a file-backed database.
    pub fn open(path: &Path, id_attribute: impl Into<String>) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?, id_attribute)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory(id_attribute: impl Into<String>) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?, id_attribute)
    }

    /// Capability probe: can a connection be opened at all?
    pub fn is_available() -> bool {
        Connection::open_in_memory().is_ok()
    }

    fn from_connection(
        conn: Connection,
        id_attribute: impl Into<String>,
    ) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS documents (
                 tbl TEXT NOT NULL,
                 id  TEXT NOT NULL,
                 doc TEXT NOT NULL,
                 PRIMARY KEY (tbl, id)
             );
             CREATE INDEX IF NOT EXISTS idx_documents_tbl ON documents(tbl);",
        )?;
        Ok(Self {
            id_attribute: id_attribute.into(),
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    fn parse(table: &str, id: &str, raw: &str) -> Result<Value, StorageError> {
        serde_json::from_str(raw).map_err(|source| StorageError::Corruption {
            table: table.to_string(),
            id: id.to_string(),
            source,
        })
    }
}

impl StorageBackend for SqliteBackend {
    fn find(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn.prepare("SELECT id, doc FROM documents WHERE tbl = ?1")?;
        let rows = stmt.query_map(params![table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            docs.push(Self::parse(table, &id, &raw)?);
        }
        Ok(docs)
    }

    fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let raw: Option<String> = conn
            .query_row(
                "SELECT doc FROM documents WHERE tbl = ?1 AND id = ?2",
                params![table, id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Self::parse(table, id, &raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, table: &str, docs: &[Value]) -> Result<Vec<Value>, StorageError> {
        let mut keyed = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc_id(doc, &self.id_attribute, table)?;
            keyed.push((id.to_string(), doc.to_string()));
        }

        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction()?;
        for (id, raw) in keyed {
            tx.execute(
                "INSERT INTO documents (tbl, id, doc) VALUES (?1, ?2, ?3)
                 ON CONFLICT (tbl, id) DO UPDATE SET doc = excluded.doc",
                params![table, id, raw],
            )?;
        }
        tx.commit()?;
        Ok(docs.to_vec())
    }

    fn remove_by_id(&self, table: &str, id: &str) -> Result<(), StorageError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        conn.execute(
            "DELETE FROM documents WHERE tbl = ?1 AND id = ?2",
            params![table, id],
        )?;
        Ok(())
    }

    fn clear(&self, table: &str) -> Result<(), StorageError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        conn.execute("DELETE FROM documents WHERE tbl = ?1", params![table])?;
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction()?;
        let tables: Vec<String> = {
            let mut stmt = tx.prepare("SELECT DISTINCT tbl FROM documents")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for table in tables.iter().filter(|t| !is_system_table(t)) {
            tx.execute("DELETE FROM documents WHERE tbl = ?1", params![table])?;
        }
        tx.commit()?;
        Ok(())
    }
}
