use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{CacheOptions, MountRefetch};

const FALLBACK_TOKEN_VAR: &str = "ACCREDIT_FALLBACK_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub push: PushConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend root, e.g. "https://api.example.org/v1"
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds an unsubscribed entry is kept (0 = evict immediately)
  #[serde(default = "default_keep_unused_for_secs")]
  pub keep_unused_for_secs: u64,
  #[serde(default)]
  pub refetch_on_focus: bool,
  /// Refetch cached data on subscribe once it is this old
  pub refetch_on_mount_older_than_secs: Option<u64>,
}

fn default_keep_unused_for_secs() -> u64 {
  60
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      keep_unused_for_secs: default_keep_unused_for_secs(),
      refetch_on_focus: false,
      refetch_on_mount_older_than_secs: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushConfig {
  /// Server-sent-events endpoint, relative to the base URL or absolute
  pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Defaults to the platform data directory
  pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./accredit.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/accredit/config.yaml
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
        "No configuration file found. Create one at ~/.config/accredit/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  /// Config with only a base URL, for running without a file.
  pub fn for_base_url(base_url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        base_url: base_url.into(),
      },
      cache: CacheConfig::default(),
      push: PushConfig::default(),
      log: LogConfig::default(),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("accredit.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("accredit").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.api.base_url.trim().is_empty() {
      return Err(eyre!("api.base_url must not be empty"));
    }
    Ok(config)
  }

  pub fn cache_options(&self) -> CacheOptions {
    CacheOptions {
      keep_unused_for: Duration::from_secs(self.cache.keep_unused_for_secs),
      refetch_on_focus: self.cache.refetch_on_focus,
      refetch_on_mount: match self.cache.refetch_on_mount_older_than_secs {
        Some(0) => MountRefetch::Always,
        Some(secs) => MountRefetch::OlderThan(Duration::from_secs(secs)),
        None => MountRefetch::Never,
      },
    }
  }

  /// Token used when no session is stored.
  ///
  /// Read from ACCREDIT_FALLBACK_TOKEN; unset or empty means none.
  pub fn fallback_token() -> Option<String> {
    std::env::var(FALLBACK_TOKEN_VAR)
      .ok()
      .filter(|token| !token.trim().is_empty())
  }

  /// Directory for rolling log files.
  pub fn log_directory(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.log.directory {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("accredit").join("logs"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://api.example.org\n").unwrap();
    assert_eq!(config.cache.keep_unused_for_secs, 60);
    assert_eq!(config.log.level, "info");
    assert!(config.push.url.is_none());

    let options = config.cache_options();
    assert_eq!(options.keep_unused_for, Duration::from_secs(60));
    assert_eq!(options.refetch_on_mount, MountRefetch::Never);
    assert!(!options.refetch_on_focus);
  }

  #[test]
  fn test_cache_section() {
    let config = Config::parse(
      "api:\n  base_url: https://api.example.org\n\
       cache:\n  keep_unused_for_secs: 0\n  refetch_on_focus: true\n  refetch_on_mount_older_than_secs: 30\n\
       push:\n  url: /events\n",
    )
    .unwrap();
    let options = config.cache_options();
    assert_eq!(options.keep_unused_for, Duration::ZERO);
    assert!(options.refetch_on_focus);
    assert_eq!(
      options.refetch_on_mount,
      MountRefetch::OlderThan(Duration::from_secs(30))
    );
    assert_eq!(config.push.url.as_deref(), Some("/events"));
  }

  #[test]
  fn test_rejects_missing_base_url() {
    assert!(Config::parse("cache:\n  refetch_on_focus: true\n").is_err());
    assert!(Config::parse("api:\n  base_url: \"\"\n").is_err());
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api:\n  base_url: http://localhost:8080").unwrap();
    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.base_url, "http://localhost:8080");

    assert!(Config::load(Some(Path::new("/nonexistent/accredit.yaml"))).is_err());
  }
}
