//! Durable storage for pending actions.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::types::{ActionPayload, PendingAction};
use crate::cache::{parse_datetime, SqliteStorage};

/// Schema for the pending queue. Applied alongside the cache schema.
pub const PENDING_SCHEMA: &str = r#"
-- seq preserves enqueue order even when timestamps collide
CREATE TABLE IF NOT EXISTS pending_actions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    action TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE TABLE IF NOT EXISTS sync_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const LAST_SYNCED_KEY: &str = "last_synced_at";

/// Key-value store of pending actions keyed by item id.
pub trait PendingStore: Send + Sync {
  /// All pending items, oldest enqueued first.
  fn all_pending(&self) -> Result<Vec<PendingAction>>;

  /// Insert a new item or update an existing one in place.
  fn upsert_pending(&self, item: &PendingAction) -> Result<()>;

  /// Update the retry bookkeeping of an existing item. Never inserts;
  /// returns false when the item is gone.
  fn record_retry(&self, item: &PendingAction) -> Result<bool>;

  fn delete_pending(&self, id: &Uuid) -> Result<bool>;

  /// Remove every item. Returns how many were removed.
  fn clear_pending(&self) -> Result<usize>;

  fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>>;

  fn set_last_synced_at(&self, at: DateTime<Utc>) -> Result<()>;
}

impl PendingStore for SqliteStorage {
  fn all_pending(&self) -> Result<Vec<PendingAction>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, created_at, action, retry_count, last_error
         FROM pending_actions ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String, u32, Option<String>)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending action: {}", e))?;

    rows
      .into_iter()
      .map(|(id, created_at, action, retry_count, last_error)| {
        let action: ActionPayload = serde_json::from_str(&action)
          .map_err(|e| eyre!("Failed to deserialize action {}: {}", id, e))?;
        Ok(PendingAction {
          id: Uuid::parse_str(&id).map_err(|e| eyre!("Invalid action id '{}': {}", id, e))?,
          created_at: parse_datetime(&created_at)?,
          action,
          retry_count,
          last_error,
        })
      })
      .collect()
  }

  fn upsert_pending(&self, item: &PendingAction) -> Result<()> {
    let conn = self.lock()?;
    let action =
      serde_json::to_string(&item.action).map_err(|e| eyre!("Failed to serialize action: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_actions (id, created_at, action, retry_count, last_error)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (id) DO UPDATE SET
           action = excluded.action,
           retry_count = MAX(retry_count, excluded.retry_count),
           last_error = excluded.last_error",
        params![
          item.id.to_string(),
          item.created_at.to_rfc3339(),
          action,
          item.retry_count,
          item.last_error
        ],
      )
      .map_err(|e| eyre!("Failed to store pending action {}: {}", item.id, e))?;

    Ok(())
  }

  fn record_retry(&self, item: &PendingAction) -> Result<bool> {
    let conn = self.lock()?;
    let updated = conn
      .execute(
        "UPDATE pending_actions
         SET retry_count = MAX(retry_count, ?), last_error = ?
         WHERE id = ?",
        params![item.retry_count, item.last_error, item.id.to_string()],
      )
      .map_err(|e| eyre!("Failed to record retry for {}: {}", item.id, e))?;
    Ok(updated > 0)
  }

  fn delete_pending(&self, id: &Uuid) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM pending_actions WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to delete pending action {}: {}", id, e))?;
    Ok(removed > 0)
  }

  fn clear_pending(&self) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM pending_actions", [])
      .map_err(|e| eyre!("Failed to clear pending actions: {}", e))
  }

  fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock()?;
    let value: Option<String> = conn
      .query_row(
        "SELECT value FROM sync_meta WHERE key = ?",
        params![LAST_SYNCED_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read last sync time: {}", e))?;

    value.as_deref().map(parse_datetime).transpose()
  }

  fn set_last_synced_at(&self, at: DateTime<Utc>) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
        params![LAST_SYNCED_KEY, at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to record last sync time: {}", e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn item(kind: &str) -> PendingAction {
    PendingAction::new(ActionPayload::new(kind, json!({ "kind": kind })))
  }

  #[test]
  fn test_upsert_keeps_position() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut a = item("a");
    let b = item("b");
    storage.upsert_pending(&a).unwrap();
    storage.upsert_pending(&b).unwrap();

    a.record_failure("timeout".to_string());
    storage.upsert_pending(&a).unwrap();

    let all = storage.all_pending().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, a.id);
    assert_eq!(all[0].retry_count, 1);
    assert_eq!(all[0].last_error.as_deref(), Some("timeout"));
    assert_eq!(all[1], b);
  }

  #[test]
  fn test_retry_count_never_decreases() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut a = item("a");
    a.retry_count = 3;
    storage.upsert_pending(&a).unwrap();

    a.retry_count = 1;
    storage.upsert_pending(&a).unwrap();
    assert_eq!(storage.all_pending().unwrap()[0].retry_count, 3);
  }

  #[test]
  fn test_delete_and_clear() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let a = item("a");
    storage.upsert_pending(&a).unwrap();
    storage.upsert_pending(&item("b")).unwrap();
    storage.upsert_pending(&item("c")).unwrap();

    assert!(storage.delete_pending(&a.id).unwrap());
    assert!(!storage.delete_pending(&a.id).unwrap());
    assert_eq!(storage.clear_pending().unwrap(), 2);
    assert!(storage.all_pending().unwrap().is_empty());
  }

  #[test]
  fn test_record_retry_never_inserts() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut a = item("a");
    storage.upsert_pending(&a).unwrap();

    a.record_failure("HTTP 503".to_string());
    assert!(storage.record_retry(&a).unwrap());
    assert_eq!(storage.all_pending().unwrap()[0].retry_count, 1);

    storage.clear_pending().unwrap();
    a.record_failure("HTTP 503".to_string());
    assert!(!storage.record_retry(&a).unwrap());
    assert!(storage.all_pending().unwrap().is_empty());
  }

  #[test]
  fn test_last_synced_round_trips() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.last_synced_at().unwrap().is_none());

    let now = Utc::now();
    storage.set_last_synced_at(now).unwrap();
    assert_eq!(storage.last_synced_at().unwrap(), Some(now));
  }
}
