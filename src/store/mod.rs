//! Persistent stores shared across pipeline runs.
//!
//! - AliasStore: feedback items and user-taught alias mappings
//! - ExtractionCache: transcript data and finished reports per video
//!
//! Both are SQLite-backed. A store owns one connection behind a mutex and
//! runs every statement on the blocking pool, so it can be cloned freely and
//! shared between concurrent runs.

pub mod alias;
pub mod cache;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

use crate::domain::FeedbackStatus;

pub use alias::AliasStore;
pub use cache::ExtractionCache;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("task join error: {0}")]
    Join(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid feedback transition for {id}: already {from:?}")]
    InvalidTransition { id: String, from: FeedbackStatus },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Shared SQLite connection with blocking-pool execution
#[derive(Clone)]
pub(crate) struct SqliteHandle {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandle {
    /// Open (or create) a database file and apply the schema
    pub(crate) fn open(path: impl AsRef<Path>, schema: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(schema)?;

        Ok(Self {
            path: Some(path),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database (tests, one-shot runs)
    pub(crate) fn in_memory(schema: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema)?;

        Ok(Self {
            path: None,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The mutex is held for the whole closure, so everything inside it is
    /// serialized against every other call on this store.
    pub(crate) async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}
