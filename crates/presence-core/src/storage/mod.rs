mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, StorageConfig, TrackerConfig, WriteFailurePolicy};
pub use database::{local_day, DailyTotal, Database, HourlyTotal, RangeSummary, SessionRecord, SessionStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the presence data directory, creating it if needed.
///
/// `PRESENCE_DATA_DIR` overrides the location outright; otherwise it is
/// `~/.config/presence[-dev]/`, with `PRESENCE_ENV=dev` selecting the
/// development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("PRESENCE_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("PRESENCE_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("presence-dev")
            } else {
                base_dir.join("presence")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
