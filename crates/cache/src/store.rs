//! SQLite-backed document cache with one sync cursor per owner.
//!
//! Records are insert-or-ignore on `(owner, record_id)`: once cached a record
//! is never rewritten, only removed by [`CacheStore::purge`]. Cursors only move
//! forward.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use provenance_core::{unix_now, Digest};

use crate::error::{CacheError, CacheResult};
use crate::record::{normalize_owner, DocumentRecord};

const RECORD_COLUMNS: &str = "owner, record_id, filename, content_id, content_digest, \
                              token_id, timestamp, tx_ref, block_height";

/// Aggregate figures over the whole cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub documents: u64,
    pub owners: u64,
    pub database_bytes: u64,
}

pub struct CacheStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl CacheStore {
    /// Opens or creates the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening document cache");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory cache.
    pub fn in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn init_schema(conn: &Connection) -> CacheResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                record_id INTEGER NOT NULL,
                filename TEXT NOT NULL,
                content_id TEXT NOT NULL,
                content_digest TEXT NOT NULL,
                token_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                tx_ref TEXT NOT NULL,
                block_height INTEGER NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                UNIQUE(owner, record_id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner);
            CREATE INDEX IF NOT EXISTS idx_documents_block ON documents(block_height);
            CREATE INDEX IF NOT EXISTS idx_documents_tx ON documents(tx_ref);

            CREATE TABLE IF NOT EXISTS sync_cursors (
                owner TEXT PRIMARY KEY,
                last_synced_height INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Database file, or `None` for an in-memory cache.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cached records for `owner`, newest first.
    pub fn get(&self, owner: &str) -> CacheResult<Vec<DocumentRecord>> {
        let owner = normalize_owner(owner);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE owner = ?1 \
             ORDER BY timestamp DESC, block_height DESC, record_id DESC",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![owner], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Inserts records that are not cached yet and returns how many were new.
    pub fn upsert_batch(&self, records: &[DocumentRecord]) -> CacheResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO documents ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                RECORD_COLUMNS
            ))?;
            for record in records {
                inserted += stmt.execute(params![
                    normalize_owner(&record.owner),
                    record.record_id,
                    record.filename,
                    record.content_id,
                    record.content_digest.to_hex(),
                    record.token_id,
                    record.timestamp,
                    record.tx_ref,
                    record.block_height,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            offered = records.len(),
            inserted = inserted,
            "Upserted document batch"
        );
        Ok(inserted)
    }

    pub fn get_cursor(&self, owner: &str) -> CacheResult<Option<u64>> {
        let conn = self.lock()?;
        let height = conn
            .query_row(
                "SELECT last_synced_height FROM sync_cursors WHERE owner = ?1",
                params![normalize_owner(owner)],
                |row| row.get::<_, u64>(0),
            )
            .optional()?;
        Ok(height)
    }

    /// Records `height` as synced for `owner`. A lower height than the stored
    /// one leaves the cursor where it is.
    pub fn set_cursor(&self, owner: &str, height: u64) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_cursors (owner, last_synced_height, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(owner) DO UPDATE SET
                 last_synced_height = MAX(last_synced_height, excluded.last_synced_height),
                 updated_at = excluded.updated_at",
            params![normalize_owner(owner), height, unix_now()],
        )?;
        Ok(())
    }

    /// Deletes every record and the cursor of `owner`. Returns the number of
    /// records removed.
    pub fn purge(&self, owner: &str) -> CacheResult<usize> {
        let owner = normalize_owner(owner);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM documents WHERE owner = ?1", params![owner])?;
        tx.execute("DELETE FROM sync_cursors WHERE owner = ?1", params![owner])?;
        tx.commit()?;

        warn!(owner = %owner, removed = removed, "Purged owner cache");
        Ok(removed)
    }

    /// Looks up a cached record by transaction reference.
    pub fn get_by_tx(&self, tx_ref: &str) -> CacheResult<Option<DocumentRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE tx_ref = ?1 ORDER BY record_id LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![tx_ref],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        let conn = self.lock()?;
        let documents: u64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let owners: u64 = conn.query_row(
            "SELECT COUNT(DISTINCT owner) FROM documents",
            [],
            |row| row.get(0),
        )?;
        let database_bytes: u64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(CacheStats {
            documents,
            owners,
            database_bytes,
        })
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let digest_hex: String = row.get(4)?;
    let content_digest = Digest::from_hex(&digest_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DocumentRecord {
        owner: row.get(0)?,
        record_id: row.get(1)?,
        filename: row.get(2)?,
        content_id: row.get(3)?,
        content_digest,
        token_id: row.get(5)?,
        timestamp: row.get(6)?,
        tx_ref: row.get(7)?,
        block_height: row.get(8)?,
    })
}
