use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Server base URL, e.g. "https://fleet.example.com" or "https://host/fleet"
  pub url: String,
  /// Prefix of every API path
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Transport timeout; unset keeps the HTTP client's default
  pub timeout_secs: Option<u64>,
}

fn default_api_prefix() -> String {
  "/api".to_string()
}

impl ServerConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// Local database file (defaults to $XDG_DATA_HOME/fleetsync/offline.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Seconds between background drain attempts; 0 disables the timer
  #[serde(default = "default_retry_interval")]
  pub retry_interval_secs: u64,
}

fn default_retry_interval() -> u64 {
  30
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      retry_interval_secs: default_retry_interval(),
    }
  }
}

impl SyncConfig {
  pub fn retry_interval(&self) -> Option<Duration> {
    (self.retry_interval_secs > 0).then(|| Duration::from_secs(self.retry_interval_secs))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter directive; RUST_LOG wins when set
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Directory for daily-rolling log files; stderr only when unset
  pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fleetsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fleetsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/fleetsync/config.yaml\n\
                 with at least `server: {{ url: ... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fleetsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fleetsync").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the bearer token from environment variables.
  ///
  /// Checks FLEETSYNC_TOKEN first, then FLEETSYNC_API_TOKEN as fallback.
  /// Missing is not an error: reads of public data and queued writes still
  /// work, and the server answers with 401 where a token is required.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FLEETSYNC_TOKEN")
      .or_else(|_| std::env::var("FLEETSYNC_API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}
