use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::RequestDefaults;

/// Public HPInet deployment used when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "https://kaabil.net/hpinetbackend";

/// Environment variable that overrides `api.base_url`.
pub const API_BASE_URL_ENV: &str = "HPINET_API_BASE_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Backend root; endpoint paths such as `/api/go/` are appended to it
  pub base_url: String,
  /// Extra attempts for retriable failures
  pub retries: u32,
  /// Base backoff delay, doubled per attempt
  pub retry_delay_ms: u64,
  /// Default per-attempt timeout (0 disables it)
  pub timeout_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    let defaults = RequestDefaults::default();
    Self {
      base_url: DEFAULT_API_BASE_URL.to_string(),
      retries: defaults.retries,
      retry_delay_ms: defaults.retry_delay.as_millis() as u64,
      timeout_ms: defaults.timeout.as_millis() as u64,
    }
  }
}

impl ApiConfig {
  pub fn request_defaults(&self) -> RequestDefaults {
    RequestDefaults {
      retries: self.retries,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
      timeout: Duration::from_millis(self.timeout_ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Upper bound on cached entries per query cache; `null` disables eviction
  pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: Some(256),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hpinet.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hpinet/config.yaml
  ///
  /// Falls back to built-in defaults when no file exists. `HPINET_API_BASE_URL`
  /// overrides the base URL in every case.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(base_url) = std::env::var(API_BASE_URL_ENV) {
      config.apply_base_url(&base_url);
    }

    Ok(config)
  }

  /// Override the API base URL, ignoring blank values.
  pub fn apply_base_url(&mut self, base_url: &str) {
    let trimmed = base_url.trim();
    if !trimmed.is_empty() {
      self.api.base_url = trimmed.trim_end_matches('/').to_string();
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("hpinet.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hpinet").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}
