// Apply Service
//
// Runs the synchronous apply engine on blocking threads, holding a per-table
// lock for the whole transaction. Applies against different tables run in
// parallel; applies against the same table queue behind each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use super::apply_engine::ApplyEngine;
use crate::config::DatabaseConfig;
use crate::error::ApplyError;
use crate::models::{ApplyReport, DiffObject, TableRef};
use crate::storage::sqlite::{open_connection, DiffObjectReader, SqliteObjectStore};

/// Schema and table name as SQLite resolves them: an unqualified table
/// lives in `main`, and names compare case-insensitively (ASCII only)
type LockKey = (String, String);

fn lock_key(table: &TableRef) -> LockKey {
    (
        table.schema_or_main().to_ascii_lowercase(),
        table.table.to_ascii_lowercase(),
    )
}

/// One lock per destination table, created on first use.
///
/// Entries are never evicted; the map holds one mutex per table ever
/// applied to.
#[derive(Default)]
pub struct TableLockRegistry {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl TableLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, table: &TableRef) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            // The map holds no invariant a panicking holder could break
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(lock_key(table))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive use of `table`
    pub async fn acquire(&self, table: &TableRef) -> OwnedMutexGuard<()> {
        self.lock_for(table).lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies diff objects stored in a SQLite database to its tables
pub struct ApplyService {
    db_path: PathBuf,
    locks: Arc<TableLockRegistry>,
    engine: Arc<ApplyEngine>,
}

impl ApplyService {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            locks: Arc::new(TableLockRegistry::new()),
            engine: Arc::new(ApplyEngine::new()),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(&config.url)
    }

    /// Apply the stored object `object_id` to `table`
    pub async fn apply_object(
        &self,
        object_id: &str,
        table: &TableRef,
    ) -> Result<ApplyReport, ApplyError> {
        let object_id = object_id.to_string();
        self.run_locked(table, move |conn| {
            let store = SqliteObjectStore::new(conn)?;
            store.read_diff(&object_id)
        })
        .await
    }

    /// Apply an in-memory diff object to `table`
    pub async fn apply(&self, diff: DiffObject, table: &TableRef) -> Result<ApplyReport, ApplyError> {
        self.run_locked(table, move |_| Ok(diff)).await
    }

    async fn run_locked<F>(&self, table: &TableRef, load: F) -> Result<ApplyReport, ApplyError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<DiffObject, ApplyError> + Send + 'static,
    {
        let guard = self.locks.acquire(table).await;
        debug!(table = %table, "acquired table lock");

        let db_path = self.db_path.clone();
        let engine = self.engine.clone();
        let table = table.clone();

        // The guard moves into the blocking task: a cancelled caller cannot
        // release the table while its transaction is still running
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut conn = open_connection(&db_path)?;
            let diff = load(&conn)?;
            engine.apply(&mut conn, &diff, &table)
        })
        .await
        .map_err(|e| ApplyError::Internal(format!("apply task failed: {}", e)))?
    }

    pub fn lock_registry(&self) -> Arc<TableLockRegistry> {
        self.locks.clone()
    }
}
