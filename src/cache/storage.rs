//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::types::{CacheKey, CachedResponse};
use crate::http::Response;

/// Trait for cache storage backends.
///
/// Each call is individually atomic. Composite sequences (lookup then write)
/// are not transactional; concurrent writers to one key resolve as
/// last-write-wins.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Names of all existing stores, oldest first.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Look up a cached response.
  fn match_key(&self, store: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite an entry, creating the store on demand.
  fn put(&self, store: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Write a batch of entries atomically: all of them or none.
  fn put_all(&self, store: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Keys of all entries in a store, in insertion order.
  fn keys(&self, store: &str) -> Result<Vec<CacheKey>>;
}

/// SQLite-based storage for cache stores and the pending-action queue.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for all tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    conn
      .execute_batch(crate::sync::PENDING_SCHEMA)
      .map_err(|e| eyre!("Failed to run sync migrations: {}", e))?;

    Ok(())
  }

  pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (store, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store);
"#;

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to open store {}: {}", name, e))?;
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_key(&self, store: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE store = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![store, key.hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url, store, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body: body.into(),
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.put_all(store, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, store: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let now = Utc::now().to_rfc3339();

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, ?)",
      params![store, now],
    )
    .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT INTO cache_entries (store, request_hash, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (store, request_hash) DO UPDATE SET
           status = excluded.status,
           headers = excluded.headers,
           body = excluded.body,
           cached_at = excluded.cached_at",
        params![
          store,
          key.hash(),
          key.method,
          key.url,
          response.status,
          headers,
          response.body.as_ref(),
          now
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url, store, e))?;
    }

    // Dropping an uncommitted transaction rolls it back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self, store: &str) -> Result<Vec<CacheKey>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE store = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| {
        Ok(CacheKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }
}

/// Parse an RFC 3339 timestamp written by this module.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
