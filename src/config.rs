use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL every API path is joined onto
  #[serde(default = "default_api_url")]
  pub url: String,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_api_url() -> String {
  "https://api.linode.com/v4".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// `tracing` filter directives, overridden by `RUST_LOG`
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// Log file (defaults to the user data directory)
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      file: None,
    }
  }
}

fn default_log_filter() -> String {
  "info".to_string()
}

impl Config {
  /// Environment variables checked for the API token, in order.
  pub const TOKEN_VARS: &'static [&'static str] = &["LINODE_MANAGER_TOKEN", "LINODE_TOKEN"];

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./linode-manager.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/linode-manager/config.yaml
  ///
  /// Without a file every setting takes its default.
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

  fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("linode-manager.yaml")];
    if let Some(config_dir) = dirs::config_dir() {
      paths.push(config_dir.join("linode-manager").join("config.yaml"));
    }
    paths
  }

  fn find_config_file() -> Option<PathBuf> {
    Self::search_paths().into_iter().find(|p| p.exists())
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    // An empty file is valid and means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks LINODE_MANAGER_TOKEN first, then LINODE_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    Self::TOKEN_VARS
      .iter()
      .find_map(|var| std::env::var(var).ok().filter(|t| !t.trim().is_empty()))
      .ok_or_else(|| {
        eyre!("API token not found. Set LINODE_MANAGER_TOKEN or LINODE_TOKEN environment variable.")
      })
  }
}
