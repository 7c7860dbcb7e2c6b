//! SQLite-backed storage adapter.
//!
//! Persists the snapshot record, the append-only update log, the
//! pending-sync list, and the sync checkpoint to a SQLite database. The
//! connection is wrapped in a `Mutex`; the adapter methods do their work
//! synchronously inside a ready future.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use crate::storage::{BoxFuture, SnapshotRecord, StorageAdapter, StorageResult};

/// SQLite [`StorageAdapter`] with the full capability set.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create a SQLite database at the given path, creating the
    /// schema if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database. Data is lost on drop.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            -- Snapshot record, generations, and sync checkpoint
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                snapshot BLOB,
                snapshot_generation INTEGER NOT NULL DEFAULT 0,
                synced_snapshot_generation INTEGER NOT NULL DEFAULT 0,
                sync_checkpoint TEXT,
                updated_at INTEGER NOT NULL
            );

            -- Append-only update log
            -- Note: no foreign key; updates may arrive before a snapshot exists
            CREATE TABLE IF NOT EXISTS updates (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                data BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_updates_doc ON updates(doc_id, seq);

            -- Pending-sync list, ordered
            CREATE TABLE IF NOT EXISTS pending_sync (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                data BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pending_doc ON pending_sync(doc_id, seq);
            "#,
        )?;
        Ok(())
    }

    fn ready<T: Send + 'static>(value: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
        Box::pin(async move { value })
    }

    fn doc_is_known(conn: &Connection, id: &str) -> StorageResult<bool> {
        let in_documents: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if in_documents.is_some() {
            return Ok(true);
        }
        let in_updates: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM updates WHERE doc_id = ? LIMIT 1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(in_updates.is_some())
    }
}

impl StorageAdapter for SqliteStorage {
    fn get_snapshot<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<SnapshotRecord>>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            let record = conn
                .query_row(
                    "SELECT snapshot, snapshot_generation, synced_snapshot_generation
                     FROM documents WHERE id = ?",
                    params![id],
                    |row| {
                        Ok(SnapshotRecord {
                            snapshot: row.get(0)?,
                            snapshot_generation: row.get::<_, i64>(1)? as u64,
                            synced_snapshot_generation: row.get::<_, i64>(2)? as u64,
                        })
                    },
                )
                .optional()?;
            // A row that only carries a checkpoint is not a snapshot record.
            Ok(record.filter(|r| r.snapshot.is_some() || r.snapshot_generation > 0))
        })();
        Self::ready(result)
    }

    fn get_updates<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            if !Self::doc_is_known(&conn, id)? {
                return Ok(None);
            }
            let mut stmt =
                conn.prepare("SELECT data FROM updates WHERE doc_id = ? ORDER BY seq ASC")?;
            let updates: Vec<Vec<u8>> = stmt
                .query_map(params![id], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(Some(updates))
        })();
        Self::ready(result)
    }

    fn get_pending_sync<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            if !Self::doc_is_known(&conn, id)? {
                return Ok(None);
            }
            let mut stmt =
                conn.prepare("SELECT data FROM pending_sync WHERE doc_id = ? ORDER BY seq ASC")?;
            let pending: Vec<Vec<u8>> = stmt
                .query_map(params![id], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(Some(pending))
        })();
        Self::ready(result)
    }

    fn get_sync_checkpoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            let checkpoint: Option<Option<String>> = conn
                .query_row(
                    "SELECT sync_checkpoint FROM documents WHERE id = ?",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(checkpoint.flatten())
        })();
        Self::ready(result)
    }

    fn append_update<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            let now = chrono::Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO updates (doc_id, data, created_at) VALUES (?, ?, ?)",
                params![id, update, now],
            )?;
            Ok(())
        })();
        Self::ready(result)
    }

    fn set_snapshot<'a>(&'a self, id: &'a str, snapshot: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            let now = chrono::Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO documents (id, snapshot, snapshot_generation, updated_at)
                 VALUES (?, ?, 1, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     snapshot = excluded.snapshot,
                     snapshot_generation = documents.snapshot_generation + 1,
                     updated_at = excluded.updated_at",
                params![id, snapshot, now],
            )?;
            Ok(())
        })();
        Self::ready(result)
    }

    fn mark_pending_sync<'a>(
        &'a self,
        id: &'a str,
        updates: &'a [Vec<u8>],
    ) -> BoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM pending_sync WHERE doc_id = ?", params![id])?;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO pending_sync (doc_id, data) VALUES (?, ?)")?;
                for update in updates {
                    stmt.execute(params![id, update])?;
                }
            }
            tx.commit()?;
            Ok(())
        })();
        Self::ready(result)
    }

    fn clear_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM pending_sync WHERE doc_id = ?", params![id])?;
            Ok(())
        })();
        Self::ready(result)
    }

    fn mark_snapshot_synced<'a>(
        &'a self,
        id: &'a str,
        generation: u64,
    ) -> BoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE documents SET synced_snapshot_generation =
                     MAX(synced_snapshot_generation, MIN(?, snapshot_generation))
                 WHERE id = ?",
                params![generation as i64, id],
            )?;
            Ok(())
        })();
        Self::ready(result)
    }

    fn set_sync_checkpoint<'a>(
        &'a self,
        id: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            let now = chrono::Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO documents (id, sync_checkpoint, updated_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     sync_checkpoint = excluded.sync_checkpoint,
                     updated_at = excluded.updated_at",
                params![id, value, now],
            )?;
            Ok(())
        })();
        Self::ready(result)
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM updates WHERE doc_id = ?", params![id])?;
            tx.execute("DELETE FROM pending_sync WHERE doc_id = ?", params![id])?;
            tx.execute("DELETE FROM documents WHERE id = ?", params![id])?;
            tx.commit()?;
            Ok(())
        })();
        Self::ready(result)
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}
