//! Caching strategies: cache-first, network-first, stale-while-revalidate.
//!
//! Every strategy turns a request into a response without ever surfacing a
//! network error: failures fall back to the cache or to a synthetic 503.
//! Cache read and write failures are logged and treated as misses or skipped
//! writes, so the live response still reaches the caller.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStorage, CachedResponse};
use crate::classify::TrafficClass;
use crate::http::{Fetcher, Request, Response, SERVED_BY_CACHE, SERVED_BY_HEADER};

pub const OFFLINE_MESSAGE: &str = "You are offline. Some features may not be available.";
const UNAVAILABLE_BODY: &str =
  "Service unavailable: resource is not cached and the network is offline";

/// The three caching algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

impl Strategy {
  pub fn for_class(class: TrafficClass) -> Self {
    match class {
      TrafficClass::Static => Strategy::CacheFirst,
      TrafficClass::Api => Strategy::NetworkFirst,
      TrafficClass::Other => Strategy::StaleWhileRevalidate,
    }
  }
}

/// Executes strategies against a cache storage and the network.
pub struct StrategyEngine<S: CacheStorage> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  /// Detached revalidations spawned by stale-while-revalidate
  revalidations: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage + 'static> StrategyEngine<S> {
  pub fn new(storage: Arc<S>, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      storage,
      fetcher,
      revalidations: Mutex::new(JoinSet::new()),
    }
  }

  pub async fn execute(&self, strategy: Strategy, request: &Request, store: &str) -> Response {
    match strategy {
      Strategy::CacheFirst => self.cache_first(request, store).await,
      Strategy::NetworkFirst => self.network_first(request, store).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, store).await,
    }
  }

  /// Serve from cache when present; otherwise fetch and cache a 200.
  pub async fn cache_first(&self, request: &Request, store: &str) -> Response {
    let key = CacheKey::from_request(request);

    if let Some(cached) = lookup(self.storage.as_ref(), store, &key) {
      debug!(url = %request.url, store, cached_at = %cached.cached_at, "Cache hit");
      return cached.response;
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          write(self.storage.as_ref(), store, &key, &response);
        }
        response
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Network fetch failed with no cached entry");
        unavailable_response()
      }
    }
  }

  /// Fetch first; on network failure serve the cached entry, marked as such.
  pub async fn network_first(&self, request: &Request, store: &str) -> Response {
    let key = CacheKey::from_request(request);

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          write(self.storage.as_ref(), store, &key, &response);
        }
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed, falling back to cache");
        match lookup(self.storage.as_ref(), store, &key) {
          Some(cached) => cached
            .response
            .with_header(SERVED_BY_HEADER, SERVED_BY_CACHE),
          None => offline_json_response(OFFLINE_MESSAGE),
        }
      }
    }
  }

  /// Serve the cached entry immediately and refresh it in the background.
  ///
  /// Without a cached entry the refresh is awaited instead.
  pub async fn stale_while_revalidate(&self, request: &Request, store: &str) -> Response {
    let key = CacheKey::from_request(request);
    let cached = lookup(self.storage.as_ref(), store, &key);

    let revalidation = Self::revalidate(
      Arc::clone(&self.storage),
      Arc::clone(&self.fetcher),
      request.clone(),
      store.to_string(),
      key,
    );

    match cached {
      Some(cached) => {
        self.spawn_revalidation(revalidation);
        cached.response
      }
      None => revalidation.await.unwrap_or_else(unavailable_response),
    }
  }

  /// Wait for all background revalidations spawned so far.
  pub async fn settle(&self) {
    let mut pending = match self.revalidations.lock() {
      Ok(mut set) => std::mem::take(&mut *set),
      Err(e) => {
        warn!(error = %e, "Revalidation set poisoned");
        return;
      }
    };

    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Revalidation task failed");
      }
    }
  }

  fn spawn_revalidation<F>(&self, revalidation: F)
  where
    F: std::future::Future<Output = Option<Response>> + Send + 'static,
  {
    match self.revalidations.lock() {
      Ok(mut set) => {
        // Reap finished tasks so the set does not grow unbounded
        while set.try_join_next().is_some() {}
        set.spawn(async move {
          let _ = revalidation.await;
        });
      }
      Err(e) => warn!(error = %e, "Revalidation set poisoned, skipping refresh"),
    }
  }

  async fn revalidate(
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    request: Request,
    store: String,
    key: CacheKey,
  ) -> Option<Response> {
    match fetcher.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() {
          write(storage.as_ref(), &store, &key, &response);
        }
        Some(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Revalidation fetch failed");
        None
      }
    }
  }
}

fn lookup<S: CacheStorage>(storage: &S, store: &str, key: &CacheKey) -> Option<CachedResponse> {
  match storage.match_key(store, key) {
    Ok(cached) => cached,
    Err(e) => {
      warn!(url = %key.url, store, error = %e, "Cache read failed, treating as miss");
      None
    }
  }
}

fn write<S: CacheStorage>(storage: &S, store: &str, key: &CacheKey, response: &Response) {
  if let Err(e) = storage.put(store, key, response) {
    warn!(url = %key.url, store, error = %e, "Cache write failed, skipping");
  }
}

/// Synthetic 503 for resources that are neither cached nor reachable.
pub fn unavailable_response() -> Response {
  Response::new(503, UNAVAILABLE_BODY).with_header("Content-Type", "text/plain")
}

/// Synthetic 503 for API calls, carrying an explicit `offline` flag.
pub fn offline_json_response(message: &str) -> Response {
  let body = serde_json::json!({
    "error": "Offline",
    "message": message,
    "offline": true,
    "timestamp": Utc::now().to_rfc3339(),
  });
  Response::new(503, body.to_string()).with_header("Content-Type", "application/json")
}
