use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::PartitionKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the storefront is served from; other origins bypass the worker
  pub origin: String,
  /// Build version tag embedded in every partition name
  pub version: String,
  pub cache_prefix: String,
  /// Requests under this path prefix are always network-first
  pub api_prefix: String,
  pub offline_page: String,
  /// Shell assets fetched into the static partition at install
  pub precache: Vec<String>,
  pub request_timeout_secs: u64,
  /// SQLite database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  pub log_level: String,
  /// Write logs to a daily rolling file in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Path prefixes of cart/checkout requests replayed on `sync-cart`
  pub cart_patterns: Vec<String>,
  /// Path prefixes of order mutations queued in the outbox when offline
  pub order_paths: Vec<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      cart_patterns: vec!["/api/cart".to_string(), "/api/checkout".to_string()],
      order_paths: vec!["/api/orders".to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push carries no payload
  pub fallback_body: String,
  pub icon: String,
  pub badge: String,
  /// Where the "explore" action leads
  pub action_path: String,
  /// Where a click on the notification body leads
  pub default_path: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Storefront".to_string(),
      fallback_body: "New update available!".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
      action_path: "/collection".to_string(),
      default_path: "/".to_string(),
    }
  }
}

const ICON_SIZES: &[u32] = &[72, 96, 128, 144, 152, 192, 384, 512];

impl Default for Config {
  fn default() -> Self {
    let mut precache = vec![
      "/".to_string(),
      "/offline.html".to_string(),
      "/manifest.json".to_string(),
    ];
    precache.extend(
      ICON_SIZES
        .iter()
        .map(|size| format!("/icons/icon-{size}x{size}.png")),
    );

    Self {
      origin: "http://localhost:3000".to_string(),
      version: "v1".to_string(),
      cache_prefix: "storefront".to_string(),
      api_prefix: "/api/".to_string(),
      offline_page: "/offline.html".to_string(),
      precache,
      request_timeout_secs: 30,
      database: None,
      log_level: "info".to_string(),
      log_dir: None,
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Without any file the built-in defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.version.trim().is_empty() {
      return Err(eyre!("Config field `version` must not be empty"));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!(
        "Config field `api_prefix` must start with '/': {}",
        self.api_prefix
      ));
    }
    Ok(())
  }

  /// Replace the origin, e.g. from `SHELLCACHE_ORIGIN` or `--origin`.
  pub fn with_origin(self, origin: Option<String>) -> Result<Self> {
    let config = match origin {
      Some(origin) => Config { origin, ..self },
      None => self,
    };
    config.origin_url()?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http(s): {}", self.origin));
    }
    Ok(url)
  }

  /// Get the database path, falling back to the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  pub fn partition_name(&self, kind: PartitionKind) -> String {
    kind.partition_name(&self.cache_prefix, &self.version)
  }
}
