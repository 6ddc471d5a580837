use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Initialize tracing, writing to a log file so output never mixes with
/// command results.
///
/// `RUST_LOG` overrides the configured filter. Keep the returned guard alive
/// until exit or buffered lines are lost.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
  let path = match &config.file {
    Some(path) => path.clone(),
    None => default_log_path()?,
  };
  let (dir, file_name) = split_log_path(&path)?;

  // Never rotated: the prefix is the whole file name. The appender creates
  // the directory and appends to an existing file.
  let appender = RollingFileAppender::builder()
    .rotation(Rotation::NEVER)
    .filename_prefix(file_name)
    .build(&dir)
    .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(appender);
  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_target(true)
    .with_level(true);

  tracing_subscriber::registry()
    .with(filter(&config.filter))
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  tracing::debug!("Logging to {}", path.display());
  Ok(guard)
}

/// Directory and file name of the log file. A bare file name lives in the
/// current directory.
fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
  let file_name = path
    .file_name()
    .and_then(|name| name.to_str())
    .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  };
  Ok((dir, file_name.to_string()))
}

fn filter(configured: &str) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::try_new(configured).unwrap_or_else(|_| EnvFilter::new("info"))
  })
}

fn default_log_path() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(log_path_in(&data_dir))
}

fn log_path_in(data_dir: &Path) -> PathBuf {
  data_dir.join("linode-manager").join("linode-manager.log")
}
