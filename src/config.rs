use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Override for the store location (defaults to the platform data dir).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the backend (scheme + host).
  pub url: String,
  /// Bound on each connectivity probe request.
  #[serde(default = "default_probe_timeout_secs")]
  pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cached entries older than this are evicted.
  #[serde(default = "default_max_age_days")]
  pub max_age_days: i64,
  /// Cadence of the eviction timer.
  #[serde(default = "default_evict_interval_hours")]
  pub evict_interval_hours: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age_days: default_max_age_days(),
      evict_interval_hours: default_evict_interval_hours(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Cadence of the periodic drain pass in watch mode. Failed items are
  /// retried here; there is no separate backoff.
  #[serde(default = "default_sync_interval_secs")]
  pub interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_sync_interval_secs(),
    }
  }
}

fn default_probe_timeout_secs() -> u64 {
  5
}

fn default_max_age_days() -> i64 {
  7
}

fn default_evict_interval_hours() -> u64 {
  24
}

fn default_sync_interval_secs() -> u64 {
  300
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./satchel.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/satchel/config.yaml
  /// 4. ~/.config/satchel/config.yaml
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
        "No configuration file found. Create one at ~/.config/satchel/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("satchel.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("satchel").join("config.yaml");
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

    // Catch a malformed URL at startup rather than on the first pass.
    Url::parse(&config.remote.url)
      .map_err(|e| eyre!("Invalid remote.url '{}': {}", config.remote.url, e))?;

    Ok(config)
  }

  /// Path of the offline store database.
  pub fn store_path(&self) -> Result<PathBuf> {
    let base = match &self.data_dir {
      Some(dir) => dir.clone(),
      None => dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .ok_or_else(|| eyre!("Could not determine data directory"))?
        .join("satchel"),
    };

    Ok(base.join("offline.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_minimal_config() {
    let config: Config = serde_yaml::from_str("remote:\n  url: https://example.com\n").unwrap();

    assert_eq!(config.remote.url, "https://example.com");
    assert_eq!(config.remote.probe_timeout_secs, 5);
    assert_eq!(config.cache.max_age_days, 7);
    assert_eq!(config.cache.evict_interval_hours, 24);
    assert_eq!(config.sync.interval_secs, 300);
  }

  #[test]
  fn test_parse_full_config() {
    let yaml = r#"
remote:
  url: https://backend.internal
  probe_timeout_secs: 2
cache:
  max_age_days: 30
  evict_interval_hours: 6
sync:
  interval_secs: 60
data_dir: /tmp/satchel-test
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.cache.max_age_days, 30);
    assert_eq!(config.sync.interval_secs, 60);
    assert_eq!(
      config.store_path().unwrap(),
      PathBuf::from("/tmp/satchel-test/offline.db")
    );
  }
}
