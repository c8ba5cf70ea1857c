use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the interception layer serves (scheme, host, port)
  pub origin: Url,
  /// Deployment version; embedded in every store name of this generation
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
}

fn default_version() -> String {
  "1.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Database file holding stores and the pending queue
  pub database: Option<PathBuf>,
  /// Critical assets fetched into the static store on install
  pub precache: Vec<String>,
  /// Exact paths always treated as static assets
  pub static_paths: Vec<String>,
  /// Path suffixes treated as static assets
  pub static_extensions: Vec<String>,
  /// Path prefixes of known API routes outside `/api/`
  pub api_prefixes: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      database: None,
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
      ],
      static_paths: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
      ],
      static_extensions: [
        ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      api_prefixes: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Per-request timeout applied by the HTTP client
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background sync tag that triggers a queue drain
  pub tag: String,
  /// Endpoint pending actions are replayed against (relative to origin)
  pub endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "pending-actions-sync".to_string(),
      endpoint: "/api/sync/actions".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Dispatch".to_string(),
      icon: "/logo192.png".to_string(),
      badge: "/logo192.png".to_string(),
    }
  }
}

/// Store names belonging to one deployed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  pub static_store: String,
  pub dynamic_store: String,
}

impl CacheNames {
  pub fn for_version(version: &str) -> Self {
    Self {
      static_store: format!("static-v{}", version),
      dynamic_store: format!("dynamic-v{}", version),
    }
  }

  /// Stores that survive activation; everything else is garbage collected.
  pub fn allow_list(&self) -> [&str; 2] {
    [&self.static_store, &self.dynamic_store]
  }
}

impl Config {
  /// Build a config with defaults for everything but the origin.
  #[cfg(test)]
  pub fn with_origin(origin: Url) -> Self {
    Self {
      origin,
      version: default_version(),
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dispatch-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dispatch-offline/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/dispatch-offline/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("dispatch-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dispatch-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  pub fn cache_names(&self) -> CacheNames {
    CacheNames::for_version(&self.version)
  }

  /// Database path, falling back to the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("dispatch-offline").join("cache.db"))
  }

  /// Resolve a possibly relative URL against the configured origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }
}
