//! Control-channel protocol between the hosting application and the worker.
//!
//! Messages and replies use the JSON shape `{ "type": ..., "payload": ... }`.
//! Replies travel over the channel supplied with the request, so no request
//! id is needed for correlation.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::ServiceWorker;
use crate::cache::{CacheKey, CacheStorage};
use crate::http::Request;
use crate::sync::PendingStore;

/// Entries whose bodies are read when estimating a store's size.
pub const SIZE_SAMPLE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
  GetCacheStats,
  ClearCache {
    #[serde(rename = "cacheName")]
    cache_name: String,
  },
  PrefetchResources {
    urls: Vec<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
  CacheStats(BTreeMap<String, StoreStats>),
  CacheCleared { success: bool },
  PrefetchComplete(Vec<PrefetchResult>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
  pub count: usize,
  /// Approximate size in bytes, see [`estimate_store_size`]
  pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchStatus {
  Success,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchResult {
  pub url: String,
  pub status: PrefetchStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

/// Approximate a store's byte size from a sample of its entries.
///
/// Reads the bodies of at most [`SIZE_SAMPLE`] entries (the first ones in
/// insertion order) and extrapolates linearly to the whole store:
/// `sampled_total * entry_count / sampled`. Accurate only when the sample is
/// representative; stores of mixed asset sizes can be far off.
pub fn estimate_store_size<S: CacheStorage + ?Sized>(
  storage: &S,
  store: &str,
  keys: &[CacheKey],
) -> Result<u64> {
  let sample = &keys[..keys.len().min(SIZE_SAMPLE)];
  if sample.is_empty() {
    return Ok(0);
  }

  let mut sampled_total = 0u64;
  for key in sample {
    if let Some(cached) = storage.match_key(store, key)? {
      sampled_total += cached.response.body.len() as u64;
    }
  }

  Ok(sampled_total * keys.len() as u64 / sample.len() as u64)
}

impl<S: CacheStorage + PendingStore + 'static> ServiceWorker<S> {
  /// Entry count and estimated size for every store.
  pub fn cache_stats(&self) -> Result<BTreeMap<String, StoreStats>> {
    let mut stats = BTreeMap::new();

    for name in self.storage.store_names()? {
      let keys = self.storage.keys(&name)?;
      let size = estimate_store_size(self.storage.as_ref(), &name, &keys)?;
      stats.insert(
        name,
        StoreStats {
          count: keys.len(),
          size,
        },
      );
    }

    Ok(stats)
  }

  /// Fetch each URL into the dynamic store. Failures are isolated per URL.
  pub async fn prefetch(&self, urls: &[String]) -> Vec<PrefetchResult> {
    join_all(urls.iter().map(|url| async move {
      match self.prefetch_one(url).await {
        Ok(()) => PrefetchResult {
          url: url.clone(),
          status: PrefetchStatus::Success,
          reason: None,
        },
        Err(e) => {
          debug!(url = %url, error = %e, "Prefetch failed");
          PrefetchResult {
            url: url.clone(),
            status: PrefetchStatus::Failed,
            reason: Some(e.to_string()),
          }
        }
      }
    }))
    .await
  }

  async fn prefetch_one(&self, url: &str) -> Result<()> {
    let request = Request::get(self.config.resolve(url)?);
    let response = self.fetcher.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!("HTTP {}", response.status));
    }

    let store = &self.names.dynamic_store;
    if let Err(e) = self
      .storage
      .put(store, &CacheKey::from_request(&request), &response)
    {
      warn!(url = %request.url, error = %e, "Failed to store prefetched resource");
      return Err(e);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Response;
  use crate::testing::{config, url, InstrumentedStorage, MockFetcher, RecordingHost};
  use serde_json::json;
  use std::sync::Arc;

  fn worker(
    fetcher: &Arc<MockFetcher>,
  ) -> (Arc<InstrumentedStorage>, ServiceWorker<InstrumentedStorage>) {
    let storage = Arc::new(InstrumentedStorage::new());
    let host = Arc::new(RecordingHost::default());
    let worker = ServiceWorker::new(config(), Arc::clone(&storage), fetcher.clone(), host).unwrap();
    (storage, worker)
  }

  fn key(path: &str) -> CacheKey {
    CacheKey::from_request(&Request::get(url(path)))
  }

  #[test]
  fn test_messages_parse_from_wire() {
    let parse = |v: serde_json::Value| serde_json::from_value::<ControlMessage>(v).unwrap();

    assert_eq!(parse(json!({ "type": "SKIP_WAITING" })), ControlMessage::SkipWaiting);
    assert_eq!(parse(json!({ "type": "GET_CACHE_STATS" })), ControlMessage::GetCacheStats);
    assert_eq!(
      parse(json!({ "type": "CLEAR_CACHE", "payload": { "cacheName": "static-v0" } })),
      ControlMessage::ClearCache {
        cache_name: "static-v0".to_string()
      }
    );
    assert_eq!(
      parse(json!({ "type": "PREFETCH_RESOURCES", "payload": { "urls": ["/a.json"] } })),
      ControlMessage::PrefetchResources {
        urls: vec!["/a.json".to_string()]
      }
    );
  }

  #[test]
  fn test_replies_serialize_to_wire() {
    let cleared = serde_json::to_value(ControlReply::CacheCleared { success: true }).unwrap();
    assert_eq!(cleared, json!({ "type": "CACHE_CLEARED", "payload": { "success": true } }));

    let mut stores = BTreeMap::new();
    stores.insert("static-v1".to_string(), StoreStats { count: 2, size: 40 });
    let stats = serde_json::to_value(ControlReply::CacheStats(stores)).unwrap();
    assert_eq!(
      stats,
      json!({ "type": "CACHE_STATS", "payload": { "static-v1": { "count": 2, "size": 40 } } })
    );
  }

  #[test]
  fn test_size_estimate_extrapolates_from_sample() {
    let storage = InstrumentedStorage::new();
    let mut keys = Vec::new();
    for i in 0..20 {
      let k = key(&format!("/asset/{}", i));
      let body = if i < 10 { vec![0u8; 100] } else { vec![0u8; 1] };
      storage.put("s", &k, &Response::new(200, body)).unwrap();
      keys.push(k);
    }

    assert_eq!(estimate_store_size(&storage, "s", &keys).unwrap(), 2000);
    assert_eq!(storage.match_calls(), SIZE_SAMPLE);
    assert_eq!(estimate_store_size(&storage, "s", &keys[..4]).unwrap(), 400);
    assert_eq!(estimate_store_size(&storage, "s", &[]).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_cache_stats_reads_at_most_ten_entries_per_store() {
    let fetcher = MockFetcher::new();
    let (storage, worker) = worker(&fetcher);
    for i in 0..10_000 {
      storage
        .put("dynamic-v1", &key(&format!("/api/calls/{}", i)), &Response::new(200, "0123456789"))
        .unwrap();
    }
    storage
      .put("static-v1", &key("/app.js"), &Response::new(200, "js"))
      .unwrap();

    let reply = worker.on_message(ControlMessage::GetCacheStats).await.unwrap();

    let Some(ControlReply::CacheStats(stats)) = reply else {
      panic!("expected cache stats");
    };
    assert_eq!(stats["dynamic-v1"], StoreStats { count: 10_000, size: 100_000 });
    assert_eq!(stats["static-v1"], StoreStats { count: 1, size: 2 });
    assert_eq!(storage.match_calls(), SIZE_SAMPLE + 1);
  }

  #[tokio::test]
  async fn test_prefetch_reports_per_url() {
    let fetcher = MockFetcher::new();
    fetcher.route("/a.json", Response::new(200, "{}"));
    fetcher.route("/b.json", Response::new(404, ""));
    let (storage, worker) = worker(&fetcher);

    let reply = worker
      .on_message(ControlMessage::PrefetchResources {
        urls: vec!["/a.json".to_string(), "/b.json".to_string()],
      })
      .await
      .unwrap()
      .unwrap();

    assert_eq!(
      serde_json::to_value(&reply).unwrap(),
      json!({
        "type": "PREFETCH_COMPLETE",
        "payload": [
          { "url": "/a.json", "status": "success" },
          { "url": "/b.json", "status": "failed", "reason": "HTTP 404" }
        ]
      })
    );
    assert!(storage.match_key("dynamic-v1", &key("/a.json")).unwrap().is_some());
    assert!(storage.match_key("dynamic-v1", &key("/b.json")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_prefetch_isolates_network_errors() {
    let fetcher = MockFetcher::new();
    fetcher.route("/a.json", Response::new(200, "{}"));
    fetcher.fail("/down.json");
    let (_, worker) = worker(&fetcher);

    let results = worker
      .prefetch(&["/down.json".to_string(), "/a.json".to_string()])
      .await;

    assert_eq!(results[0].status, PrefetchStatus::Failed);
    assert!(results[0].reason.is_some());
    assert_eq!(results[1].status, PrefetchStatus::Success);
  }

  #[tokio::test]
  async fn test_clear_cache_reports_success() {
    let fetcher = MockFetcher::new();
    let (storage, worker) = worker(&fetcher);
    storage.open_store("static-v0").unwrap();

    let clear = |name: &str| ControlMessage::ClearCache {
      cache_name: name.to_string(),
    };
    assert_eq!(
      worker.on_message(clear("static-v0")).await.unwrap(),
      Some(ControlReply::CacheCleared { success: true })
    );
    assert_eq!(
      worker.on_message(clear("static-v0")).await.unwrap(),
      Some(ControlReply::CacheCleared { success: false })
    );
  }

  #[tokio::test]
  async fn test_skip_waiting_has_no_reply() {
    let fetcher = MockFetcher::new();
    let (_, worker) = worker(&fetcher);
    assert!(worker
      .on_message(ControlMessage::SkipWaiting)
      .await
      .unwrap()
      .is_none());
  }
}
