//! Shared access to the SQLite connection.
//!
//! The connection lives behind one mutex.  Holding it is the append critical
//! section: ids and `sent_at` are assigned and hub notifications are queued
//! while it is held, so commit order and delivery order agree.

use std::sync::{Arc, Mutex};

use causerie_shared::ChatError;
use causerie_store::Database;

use crate::config::DatabaseLocation;

#[derive(Clone)]
pub(crate) struct DbHandle {
    inner: Arc<Mutex<Database>>,
}

impl DbHandle {
    pub(crate) fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub(crate) fn open(location: &DatabaseLocation) -> Result<Self, ChatError> {
        let db = match location {
            DatabaseLocation::Default => Database::new()?,
            DatabaseLocation::Path(path) => Database::open_at(path)?,
            DatabaseLocation::InMemory => Database::open_in_memory()?,
        };
        Ok(Self::new(db))
    }

    /// Run `f` with exclusive access to the database.
    pub(crate) fn with<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, ChatError>,
    ) -> Result<T, ChatError> {
        let mut guard = self.inner.lock().map_err(|e| {
            tracing::error!(error = %e, "database lock poisoned");
            ChatError::TransientUnavailable("database lock poisoned".into())
        })?;
        f(&mut guard)
    }
}
