//! Log file setup.
//!
//! stdout belongs to the credential-helper protocol, so logs only ever go to
//! a per-day file under the log directory.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use vault_login::config::expand_tilde;

pub const ENV_LOG_DIR: &str = "DCVL_LOG_DIR";
pub const ENV_LOG_LEVEL: &str = "DCVL_LOG_LEVEL";
const DEFAULT_LOG_DIR: &str = "~/.docker-credential-vault-login/logs";

/// Log directory: `DCVL_LOG_DIR`, then the config file's `log_dir`, then the default.
pub fn log_dir(env_value: Option<String>, file_value: Option<&str>) -> Result<PathBuf> {
    let raw = env_value
        .filter(|v| !v.is_empty())
        .or_else(|| file_value.filter(|v| !v.is_empty()).map(String::from))
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
    expand_tilde(&raw).context("error expanding logging directory")
}

pub fn log_file_name(date: chrono::NaiveDate) -> String {
    format!("vault-login_{}.log", date.format("%Y-%m-%d"))
}

/// Install the global subscriber writing to today's log file in `dir`.
pub fn init(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let path = dir.join(log_file_name(chrono::Local::now().date_naive()));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    Ok(path)
}
