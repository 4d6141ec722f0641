use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How many times a failed fetch should be retried.
///
/// Accepted for compatibility with TanStack-style options; no retries are ever
/// executed.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Retry {
  #[default]
  Never,
  Enabled(bool),
  Times(u32),
}

/// Client-wide defaults for queries.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
  /// Minimum age in milliseconds before cached data is refetched automatically
  pub stale_time_ms: u64,
  /// Inert: entries are never evicted
  pub cache_time_ms: u64,
  /// Inert
  pub retry: Retry,
  /// Inert
  pub retry_delay_ms: u64,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      stale_time_ms: 0,
      cache_time_ms: 5 * 60 * 1000,
      retry: Retry::Never,
      retry_delay_ms: 1000,
    }
  }
}

impl QueryConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_millis(self.stale_time_ms)
  }

  pub fn cache_time(&self) -> Duration {
    Duration::from_millis(self.cache_time_ms)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time_ms = u64::try_from(stale_time.as_millis()).unwrap_or(u64::MAX);
    self
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (missing file is an error)
  /// 2. ./qcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qcache/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("qcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qcache").join("config.yaml");
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
    let config: QueryConfig = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_default_config() {
    let config = QueryConfig::default();
    assert_eq!(config.stale_time(), Duration::ZERO);
    assert_eq!(config.cache_time(), Duration::from_secs(5 * 60));
    assert_eq!(config.retry, Retry::Never);
  }

  #[test]
  fn test_partial_yaml_uses_defaults() {
    let config = QueryConfig::from_yaml("stale_time_ms: 5000\n").unwrap();
    assert_eq!(config.stale_time(), Duration::from_secs(5));
    assert_eq!(config.cache_time_ms, 5 * 60 * 1000);
  }

  #[test]
  fn test_retry_forms() {
    let config = QueryConfig::from_yaml("retry: 3\n").unwrap();
    assert_eq!(config.retry, Retry::Times(3));

    let config = QueryConfig::from_yaml("retry: false\n").unwrap();
    assert_eq!(config.retry, Retry::Enabled(false));
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stale_time_ms: 250\nretry_delay_ms: 10").unwrap();

    let config = QueryConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.stale_time(), Duration::from_millis(250));
    assert_eq!(config.retry_delay(), Duration::from_millis(10));
  }

  #[test]
  fn test_load_missing_explicit_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    let err = QueryConfig::load(Some(&missing)).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_invalid_yaml_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stale_time_ms: [not, a, number]").unwrap();

    let err = QueryConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }

  #[test]
  fn test_with_stale_time() {
    let config = QueryConfig::default().with_stale_time(Duration::from_secs(30));
    assert_eq!(config.stale_time_ms, 30_000);
  }
}
