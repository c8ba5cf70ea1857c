//! Core types for the cache stores.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::http::{Request, Response};

/// Canonical form of a request used for matching.
///
/// Only method and URL take part; headers and body are ignored, and the URL
/// fragment is stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

impl CacheKey {
  pub fn from_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);
    Self {
      method: request.method.as_str().to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  /// Stable, fixed-length key used as the row identifier.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The persisted response snapshot
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}
