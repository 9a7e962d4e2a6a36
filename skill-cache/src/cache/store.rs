//! SQLite-backed entry storage
//!
//! One database file per cache name: `<base_dir>/<name>/cache.db`.
//!
//! Features:
//! - WAL journaling and a busy timeout so short-lived processes can share a cache
//! - Owner-only cache directories, verified after creation
//! - Corruption detection with automatic reinitialization
//! - Schema versioning through the `cache_meta` table

use crate::cache::entry::{from_micros, to_micros, CacheEntry, EntryMetadata};
use crate::cache::types::CategoryStats;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::BTreeMap;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the backing database inside a cache directory
pub const DATABASE_FILE: &str = "cache.db";

/// Bumped whenever the `entries` layout changes; a mismatch resets the table
const SCHEMA_VERSION: &str = "1";

const CREATE_ENTRIES: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        category TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER,
        last_accessed_at INTEGER,
        PRIMARY KEY (category, key)
    );
    CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key);
    CREATE INDEX IF NOT EXISTS idx_entries_expires ON entries(expires_at);
    CREATE INDEX IF NOT EXISTS idx_entries_lru
        ON entries(COALESCE(last_accessed_at, created_at));";

const SUMMARY_COLUMNS: &str =
    "category, key, size_bytes, created_at, expires_at, last_accessed_at";

const LIVE_CLAUSE: &str = "(expires_at IS NULL OR expires_at > ?)";

/// Order in which [`CacheStore::scan`] visits rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Whatever order the storage engine returns
    Unordered,
    /// Oldest `COALESCE(last_accessed_at, created_at)` first
    LeastRecentlyUsed,
}

/// An entry without its payload, as produced by scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub category: String,
    pub key: String,
    pub metadata: EntryMetadata,
}

/// Durable table of entries for one cache name
pub struct CacheStore {
    conn: Connection,
    path: PathBuf,
}

impl CacheStore {
    /// Opens or creates the store for `name` under `base_dir`.
    ///
    /// Idempotent. A corrupt database file is deleted and recreated.
    pub fn open(name: &str, base_dir: &Path, busy_timeout: Duration) -> Result<Self> {
        let dir = prepare_cache_dir(base_dir, name)?;
        let path = dir.join(DATABASE_FILE);

        match Self::open_at(&path, busy_timeout) {
            Ok(store) => Ok(store),
            Err(e) if e.is_corruption() => {
                warn!(path = %path.display(), error = %e, "cache database corrupt; reinitializing");
                remove_database_files(&path)?;
                Self::open_at(&path, busy_timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Creates an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CacheError::from_sqlite("open in-memory cache", e))?;
        let store = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        store.init_tables()?;
        store.check_schema_version()?;
        Ok(store)
    }

    fn open_at(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn =
            Connection::open(path).map_err(|e| CacheError::from_sqlite("open cache", e))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| CacheError::from_sqlite("set busy timeout", e))?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.configure()?;
        store.init_tables()?;
        store.check_schema_version()?;

        debug!(path = %path.display(), "cache store opened");
        Ok(store)
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure(&self) -> Result<()> {
        let mode: String = self
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| CacheError::from_sqlite("set journal mode", e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            debug!(mode = %mode, "WAL journaling unavailable; using fallback journal mode");
        }

        self.conn
            .pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| CacheError::from_sqlite("set synchronous", e))?;
        Ok(())
    }

    fn init_tables(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS cache_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                {}",
                CREATE_ENTRIES
            ))
            .map_err(|e| CacheError::from_sqlite("init tables", e))
    }

    fn check_schema_version(&self) -> Result<()> {
        let stored = self.get_meta("schema_version")?;

        match stored.as_deref() {
            Some(SCHEMA_VERSION) => {}
            Some(old) => {
                info!(from = old, to = SCHEMA_VERSION, "cache schema changed; resetting entries");
                self.conn
                    .execute_batch(&format!("DROP TABLE IF EXISTS entries; {}", CREATE_ENTRIES))
                    .map_err(|e| CacheError::from_sqlite("reset entries", e))?;
                self.set_meta("schema_version", SCHEMA_VERSION)?;
            }
            None => self.set_meta("schema_version", SCHEMA_VERSION)?,
        }

        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM cache_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CacheError::from_sqlite("get_meta", e))
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| CacheError::from_sqlite("set_meta", e))?;
        Ok(())
    }

    /// Runs `f` inside an IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. Must not be nested.
    pub fn write<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(|e| CacheError::from_sqlite("begin write", e))?;
        let out = f(self)?;
        tx.commit()
            .map_err(|e| CacheError::from_sqlite("commit", e))?;
        Ok(out)
    }

    /// Inserts or overwrites the row for `(category, key)`.
    pub fn put(
        &self,
        category: &str,
        key: &str,
        value: &str,
        metadata: &EntryMetadata,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO entries
                    (category, key, value, size_bytes, created_at, expires_at, last_accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
                 ON CONFLICT(category, key) DO UPDATE SET
                    value = excluded.value,
                    size_bytes = excluded.size_bytes,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at,
                    last_accessed_at = NULL",
                params![
                    category,
                    key,
                    value,
                    metadata.size_bytes as i64,
                    to_micros(metadata.created_at),
                    metadata.expires_at.map(to_micros),
                ],
            )
            .map_err(|e| CacheError::from_sqlite("put", e))?;
        Ok(())
    }

    /// Returns the entry if it is live at `now`, stamping its access time.
    pub fn get(&self, category: &str, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let now_micros = to_micros(now);
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, value FROM entries
                     WHERE category = ? AND key = ? AND {}",
                    SUMMARY_COLUMNS, LIVE_CLAUSE
                ),
                params![category, key, now_micros],
                |row| {
                    let summary = summary_from_row(row)?;
                    let value = match row.get_ref(6)? {
                        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                            String::from_utf8_lossy(bytes).into_owned()
                        }
                        _ => String::new(),
                    };
                    Ok(CacheEntry {
                        category: summary.category,
                        key: summary.key,
                        value,
                        metadata: summary.metadata,
                    })
                },
            )
            .optional()
            .map_err(|e| CacheError::from_sqlite("get", e))?;

        let Some(mut entry) = found else {
            return Ok(None);
        };

        // A failed access stamp only degrades eviction order.
        match self.conn.execute(
            "UPDATE entries SET last_accessed_at = ?3 WHERE category = ?1 AND key = ?2",
            params![category, key, now_micros],
        ) {
            Ok(_) => entry.metadata.last_accessed_at = Some(now),
            Err(e) => warn!(category, key, error = %e, "failed to record cache access"),
        }

        Ok(Some(entry))
    }

    /// Deletes one row; returns 0 or 1.
    pub fn delete_exact(&self, category: &str, key: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM entries WHERE category = ?1 AND key = ?2",
                params![category, key],
            )
            .map_err(|e| CacheError::from_sqlite("delete_exact", e))
    }

    /// Deletes every row whose key equals `key`, in any category.
    pub fn delete_key_everywhere(&self, key: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM entries WHERE key = ?1", params![key])
            .map_err(|e| CacheError::from_sqlite("delete_key", e))
    }

    /// Deletes every row in `category`.
    pub fn delete_by_category(&self, category: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM entries WHERE category = ?1", params![category])
            .map_err(|e| CacheError::from_sqlite("delete_by_category", e))
    }

    /// Deletes every row.
    pub fn delete_all(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM entries", [])
            .map_err(|e| CacheError::from_sqlite("delete_all", e))
    }

    /// Deletes rows with `lower <= key < upper` (no upper bound when `None`).
    pub fn delete_key_range(
        &self,
        category: Option<&str>,
        lower: &str,
        upper: Option<&str>,
    ) -> Result<usize> {
        let mut sql = String::from("DELETE FROM entries WHERE key >= ?");
        let mut args = vec![lower];
        if let Some(upper) = upper {
            sql.push_str(" AND key < ?");
            args.push(upper);
        }
        if let Some(category) = category {
            sql.push_str(" AND category = ?");
            args.push(category);
        }

        self.conn
            .execute(&sql, params_from_iter(args))
            .map_err(|e| CacheError::from_sqlite("delete_key_range", e))
    }

    /// Deletes the given `(category, key)` rows; returns how many existed.
    pub fn delete_keys(&self, keys: &[(String, String)]) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM entries WHERE category = ?1 AND key = ?2")
            .map_err(|e| CacheError::from_sqlite("delete_keys", e))?;

        let mut removed = 0;
        for (category, key) in keys {
            removed += stmt
                .execute(params![category, key])
                .map_err(|e| CacheError::from_sqlite("delete_keys", e))?;
        }
        Ok(removed)
    }

    /// Deletes rows that expired at or before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![to_micros(now)],
            )
            .map_err(|e| CacheError::from_sqlite("purge_expired", e))
    }

    /// Streams entry summaries to `visit` until it breaks or rows run out.
    ///
    /// `category` restricts the scan to one partition, `live_at` skips rows
    /// expired at that instant.
    pub fn scan<F>(
        &self,
        category: Option<&str>,
        live_at: Option<DateTime<Utc>>,
        order: ScanOrder,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(EntrySummary) -> ControlFlow<()>,
    {
        let (filter, args) = filter_clause(category, live_at);
        let mut sql = format!("SELECT {} FROM entries WHERE {}", SUMMARY_COLUMNS, filter);
        if order == ScanOrder::LeastRecentlyUsed {
            sql.push_str(" ORDER BY COALESCE(last_accessed_at, created_at) ASC, rowid ASC");
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| CacheError::from_sqlite("scan", e))?;
        let mut rows = stmt
            .query(params_from_iter(args))
            .map_err(|e| CacheError::from_sqlite("scan", e))?;

        while let Some(row) = rows.next().map_err(|e| CacheError::from_sqlite("scan", e))? {
            let summary = summary_from_row(row).map_err(|e| CacheError::from_sqlite("scan", e))?;
            if visit(summary).is_break() {
                break;
            }
        }

        Ok(())
    }

    /// Total `size_bytes` of matching rows.
    pub fn total_size(
        &self,
        category: Option<&str>,
        live_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let (filter, args) = filter_clause(category, live_at);
        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COALESCE(SUM(size_bytes), 0) FROM entries WHERE {}", filter),
                params_from_iter(args),
                |row| row.get(0),
            )
            .map_err(|e| CacheError::from_sqlite("total_size", e))?;
        Ok(total.max(0) as u64)
    }

    /// Rows stored but already expired at `now`.
    pub fn expired_count(&self, now: DateTime<Utc>) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![to_micros(now)],
                |row| row.get(0),
            )
            .map_err(|e| CacheError::from_sqlite("expired_count", e))?;
        Ok(count.max(0) as u64)
    }

    /// Live row count and bytes per category at `now`.
    pub fn category_summary(&self, now: DateTime<Utc>) -> Result<BTreeMap<String, CategoryStats>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT category, COUNT(*), COALESCE(SUM(size_bytes), 0) FROM entries
                 WHERE {} GROUP BY category",
                LIVE_CLAUSE
            ))
            .map_err(|e| CacheError::from_sqlite("category_summary", e))?;

        let rows = stmt
            .query_map(params![to_micros(now)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    CategoryStats {
                        count: row.get::<_, i64>(1)?.max(0) as u64,
                        total_size_bytes: row.get::<_, i64>(2)?.max(0) as u64,
                    },
                ))
            })
            .map_err(|e| CacheError::from_sqlite("category_summary", e))?;

        let mut summary = BTreeMap::new();
        for row in rows {
            let (category, stats) =
                row.map_err(|e| CacheError::from_sqlite("category_summary", e))?;
            summary.insert(category, stats);
        }
        Ok(summary)
    }

    /// Closes the connection, reporting any error SQLite raises on close.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| CacheError::from_sqlite("close", e))
    }
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<EntrySummary> {
    Ok(EntrySummary {
        category: row.get(0)?,
        key: row.get(1)?,
        metadata: EntryMetadata {
            size_bytes: row.get::<_, i64>(2)?.max(0) as u64,
            created_at: from_micros(row.get(3)?),
            expires_at: row.get::<_, Option<i64>>(4)?.map(from_micros),
            last_accessed_at: row.get::<_, Option<i64>>(5)?.map(from_micros),
        },
    })
}

fn filter_clause(category: Option<&str>, live_at: Option<DateTime<Utc>>) -> (String, Vec<Value>) {
    let mut clauses = vec!["1 = 1".to_string()];
    let mut args = Vec::new();
    if let Some(category) = category {
        clauses.push("category = ?".to_string());
        args.push(Value::Text(category.to_string()));
    }
    if let Some(now) = live_at {
        clauses.push(LIVE_CLAUSE.to_string());
        args.push(Value::Integer(to_micros(now)));
    }
    (clauses.join(" AND "), args)
}

// ---------------------------------------------------------------------------
// Cache directory handling
// ---------------------------------------------------------------------------

/// Creates `<base_dir>/<name>` restricted to the owner and returns its path.
pub fn prepare_cache_dir(base_dir: &Path, name: &str) -> Result<PathBuf> {
    validate_cache_name(name)?;

    create_private_dir(base_dir).map_err(|e| {
        CacheError::StorageError(format!(
            "cannot create cache directory {}: {}",
            base_dir.display(),
            e
        ))
    })?;

    let dir = base_dir.join(name);
    create_private_dir(&dir).map_err(|e| {
        CacheError::StorageError(format!("cannot create cache directory {}: {}", dir.display(), e))
    })?;
    restrict_to_owner(&dir)?;

    Ok(dir)
}

/// Cache names become directory names, so they must be a single path component.
pub fn validate_cache_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(CacheError::ValidationError(format!(
            "invalid cache name {:?}: must be a single non-empty path component",
            name
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn restrict_to_owner(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    let mode = fs::metadata(dir)?.permissions().mode() & 0o777;
    if mode != 0o700 {
        return Err(CacheError::StorageError(format!(
            "cache directory {} has mode {:o}, expected 700",
            dir.display(),
            mode
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_dir: &Path) -> Result<()> {
    Ok(())
}

pub(crate) fn remove_database_files(path: &Path) -> Result<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }

    for candidate in candidates {
        if candidate.exists() {
            fs::remove_file(&candidate).map_err(|e| {
                CacheError::StorageError(format!(
                    "deleting corrupt cache file {}: {}",
                    candidate.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
