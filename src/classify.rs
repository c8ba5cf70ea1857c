//! Request classification into traffic classes.

use url::Url;

use crate::config::CacheConfig;

/// Traffic class deciding which caching strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
  Static,
  Api,
  Other,
}

/// Maps request URLs to traffic classes. Pure and deterministic.
#[derive(Debug, Clone)]
pub struct Classifier {
  static_paths: Vec<String>,
  static_extensions: Vec<String>,
  api_prefixes: Vec<String>,
}

impl Classifier {
  pub fn new(config: &CacheConfig) -> Self {
    Self {
      static_paths: config.static_paths.clone(),
      static_extensions: config
        .static_extensions
        .iter()
        .map(|e| e.to_ascii_lowercase())
        .collect(),
      api_prefixes: config.api_prefixes.clone(),
    }
  }

  pub fn classify(&self, url: &Url) -> TrafficClass {
    let path = url.path();

    if self.is_static(path) {
      TrafficClass::Static
    } else if self.is_api(path) {
      TrafficClass::Api
    } else {
      TrafficClass::Other
    }
  }

  fn is_static(&self, path: &str) -> bool {
    if self.static_paths.iter().any(|p| p == path) || path.contains("/static/") {
      return true;
    }

    let lower = path.to_ascii_lowercase();
    self.static_extensions.iter().any(|ext| lower.ends_with(ext))
  }

  fn is_api(&self, path: &str) -> bool {
    path.contains("/api/") || self.api_prefixes.iter().any(|p| path.starts_with(p))
  }
}
