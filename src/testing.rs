//! Test doubles for the network, the client host, and action replay.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

use crate::cache::{CacheKey, CacheStorage, CachedResponse, SqliteStorage};
use crate::config::Config;
use crate::http::{Fetcher, Request, Response};
use crate::notify::{ClientHost, Notification};
use crate::sync::{ActionReplayer, PendingAction, PendingStore, ReplayError};

pub const ORIGIN: &str = "https://dispatch.example.org";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config() -> Config {
  let mut config = Config::with_origin(Url::parse(ORIGIN).unwrap());
  config.version = "1".to_string();
  config
}

/// Make SQLite abort every cache entry insert whose URL ends with `suffix`.
pub fn abort_inserts_ending_with(storage: &SqliteStorage, suffix: &str) {
  let sql = format!(
    "CREATE TRIGGER abort_entry_insert BEFORE INSERT ON cache_entries
     WHEN NEW.url LIKE '%{}'
     BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    suffix
  );
  storage.lock().unwrap().execute_batch(&sql).unwrap();
}

/// Fetcher serving canned responses by path. Unknown paths return 404.
#[derive(Default)]
pub struct MockFetcher {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl MockFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn route(&self, path: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  /// Make requests to this path fail with a network error.
  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(url(path).to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls_to(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| **u == target)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let target = request.url.to_string();
    self.calls.lock().unwrap().push(target.clone());

    if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&target) {
      return Err(eyre!("network unreachable: {}", target));
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&target)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

/// Host that records what the worker asked of it.
#[derive(Default)]
pub struct RecordingHost {
  pub claims: Mutex<usize>,
  pub notifications: Mutex<Vec<Notification>>,
  pub opened: Mutex<Vec<String>>,
}

#[async_trait]
impl ClientHost for RecordingHost {
  async fn claim_clients(&self) -> Result<()> {
    *self.claims.lock().unwrap() += 1;
    Ok(())
  }

  async fn show_notification(&self, notification: Notification) -> Result<()> {
    self.notifications.lock().unwrap().push(notification);
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self.opened.lock().unwrap().push(url.to_string());
    Ok(())
  }
}

/// Replayer that rejects selected action kinds and records attempt order.
#[derive(Default)]
pub struct RecordingReplayer {
  rejecting: Mutex<HashMap<String, u16>>,
  pub attempts: Mutex<Vec<String>>,
}

impl RecordingReplayer {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Fail this kind with a retryable server error.
  pub fn fail_kind(&self, kind: &str) {
    self.reject_kind(kind, 500);
  }

  pub fn reject_kind(&self, kind: &str, status: u16) {
    self.rejecting.lock().unwrap().insert(kind.to_string(), status);
  }

  pub fn attempts(&self) -> Vec<String> {
    self.attempts.lock().unwrap().clone()
  }
}

#[async_trait]
impl ActionReplayer for RecordingReplayer {
  async fn replay(&self, item: &PendingAction) -> Result<(), ReplayError> {
    self.attempts.lock().unwrap().push(item.action.kind.clone());
    match self.rejecting.lock().unwrap().get(&item.action.kind) {
      Some(status) => Err(ReplayError::Rejected(*status)),
      None => Ok(()),
    }
  }
}

/// Replayer that signals `started` on each attempt, then blocks until
/// `release` and fails with a 503.
#[derive(Default)]
pub struct GatedReplayer {
  pub started: Notify,
  pub release: Notify,
  attempts: AtomicUsize,
}

impl GatedReplayer {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn attempts(&self) -> usize {
    self.attempts.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ActionReplayer for GatedReplayer {
  async fn replay(&self, _item: &PendingAction) -> Result<(), ReplayError> {
    self.attempts.fetch_add(1, Ordering::SeqCst);
    self.started.notify_one();
    self.release.notified().await;
    Err(ReplayError::Rejected(503))
  }
}

/// In-memory SQLite storage that counts entry reads and can be told to fail
/// reads, writes, or deletes.
pub struct InstrumentedStorage {
  inner: SqliteStorage,
  match_calls: AtomicUsize,
  failing_deletes: Mutex<HashSet<String>>,
  failing_puts: AtomicBool,
  failing_matches: AtomicBool,
}

impl InstrumentedStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      match_calls: AtomicUsize::new(0),
      failing_deletes: Mutex::new(HashSet::new()),
      failing_puts: AtomicBool::new(false),
      failing_matches: AtomicBool::new(false),
    }
  }

  pub fn match_calls(&self) -> usize {
    self.match_calls.load(Ordering::SeqCst)
  }

  pub fn fail_delete(&self, store: &str) {
    self.failing_deletes.lock().unwrap().insert(store.to_string());
  }

  pub fn fail_put(&self, failing: bool) {
    self.failing_puts.store(failing, Ordering::SeqCst);
  }

  pub fn fail_match(&self, failing: bool) {
    self.failing_matches.store(failing, Ordering::SeqCst);
  }
}

impl CacheStorage for InstrumentedStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    self.inner.open_store(name)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    self.inner.store_names()
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    if self.failing_deletes.lock().unwrap().contains(name) {
      return Err(eyre!("store {} is locked", name));
    }
    self.inner.delete_store(name)
  }

  fn match_key(&self, store: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.match_calls.fetch_add(1, Ordering::SeqCst);
    if self.failing_matches.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error"));
    }
    self.inner.match_key(store, key)
  }

  fn put(&self, store: &str, key: &CacheKey, response: &Response) -> Result<()> {
    if self.failing_puts.load(Ordering::SeqCst) {
      return Err(eyre!("database or disk is full"));
    }
    self.inner.put(store, key, response)
  }

  fn put_all(&self, store: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    if self.failing_puts.load(Ordering::SeqCst) {
      return Err(eyre!("database or disk is full"));
    }
    self.inner.put_all(store, entries)
  }

  fn keys(&self, store: &str) -> Result<Vec<CacheKey>> {
    self.inner.keys(store)
  }
}

impl PendingStore for InstrumentedStorage {
  fn all_pending(&self) -> Result<Vec<PendingAction>> {
    self.inner.all_pending()
  }

  fn upsert_pending(&self, item: &PendingAction) -> Result<()> {
    self.inner.upsert_pending(item)
  }

  fn record_retry(&self, item: &PendingAction) -> Result<bool> {
    self.inner.record_retry(item)
  }

  fn delete_pending(&self, id: &uuid::Uuid) -> Result<bool> {
    self.inner.delete_pending(id)
  }

  fn clear_pending(&self) -> Result<usize> {
    self.inner.clear_pending()
  }

  fn last_synced_at(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    self.inner.last_synced_at()
  }

  fn set_last_synced_at(&self, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
    self.inner.set_last_synced_at(at)
  }
}
