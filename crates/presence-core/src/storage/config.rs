//! TOML-based application configuration.
//!
//! Stores:
//! - Polling intervals and the absence debounce threshold
//! - Minimum session length and tick cadence
//! - Database location and the persistence failure policy
//!
//! Configuration is stored at `<data dir>/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use super::database::DEFAULT_DB_FILE;
use crate::error::ConfigError;

/// Tracker timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Detection interval while a subject is seen or a session is open.
    #[serde(default = "default_fast_interval")]
    pub fast_interval_secs: f64,
    /// Detection interval while idle and nothing is seen.
    #[serde(default = "default_slow_interval")]
    pub slow_interval_secs: f64,
    /// Continuous absence required to end a session.
    #[serde(default = "default_absence_threshold")]
    pub absence_threshold_secs: f64,
    /// Sessions this short or shorter are treated as detector noise.
    #[serde(default = "default_min_session")]
    pub min_session_secs: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// What happens to a closed session the store refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteFailurePolicy {
    /// Log it and move on; the session is lost.
    #[default]
    Discard,
    /// Keep it in memory and retry on the next write and at stop.
    Retain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Absolute path, or a file name relative to the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub on_write_failure: WriteFailurePolicy,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data dir>/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_fast_interval() -> f64 {
    1.0
}
fn default_slow_interval() -> f64 {
    10.0
}
fn default_absence_threshold() -> f64 {
    3.0
}
fn default_min_session() -> f64 {
    0.1
}
fn default_tick_interval_ms() -> u64 {
    30
}
fn default_database_file() -> String {
    DEFAULT_DB_FILE.into()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fast_interval_secs: default_fast_interval(),
            slow_interval_secs: default_slow_interval(),
            absence_threshold_secs: default_absence_threshold(),
            min_session_secs: default_min_session(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            on_write_failure: WriteFailurePolicy::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(root: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(root: &mut serde_json::Value, key: &str, value: &str) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };
                obj.insert(part.to_string(), new_value);
                return Ok(());
            }
            current = current.get_mut(part).ok_or_else(unknown)?;
        }
        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit file, writing defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// or fails validation.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Reject values the tracker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tracker;
        let positive = [
            ("tracker.fast_interval_secs", t.fast_interval_secs),
            ("tracker.slow_interval_secs", t.slow_interval_secs),
            ("tracker.absence_threshold_secs", t.absence_threshold_secs),
        ];
        for (key, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("must be a positive number of seconds, got {value}"),
                });
            }
        }
        if !t.min_session_secs.is_finite() || t.min_session_secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "tracker.min_session_secs".into(),
                message: format!("must not be negative, got {}", t.min_session_secs),
            });
        }
        if t.fast_interval_secs > t.slow_interval_secs {
            return Err(ConfigError::InvalidValue {
                key: "tracker.fast_interval_secs".into(),
                message: "must not exceed tracker.slow_interval_secs".into(),
            });
        }
        if t.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tracker.tick_interval_ms".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.database_file".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Resolved database location.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        let file = PathBuf::from(&self.storage.database_file);
        if file.is_absolute() {
            Ok(file)
        } else {
            Ok(data_dir()?.join(file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_default_values() {
        let cfg = Config::default();
        assert_eq!(cfg.tracker.fast_interval_secs, 1.0);
        assert_eq!(cfg.tracker.slow_interval_secs, 10.0);
        assert_eq!(cfg.tracker.absence_threshold_secs, 3.0);
        assert_eq!(cfg.tracker.min_session_secs, 0.1);
        assert_eq!(cfg.tracker.tick_interval_ms, 30);
        assert_eq!(cfg.storage.database_file, "presence.db");
        assert_eq!(cfg.storage.on_write_failure, WriteFailurePolicy::Discard);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[tracker]\nabsence_threshold_secs = 5.0\n").unwrap();
        assert_eq!(parsed.tracker.absence_threshold_secs, 5.0);
        assert_eq!(parsed.tracker.fast_interval_secs, 1.0);
        assert_eq!(parsed.storage.on_write_failure, WriteFailurePolicy::Discard);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("tracker.tick_interval_ms").as_deref(), Some("30"));
        assert_eq!(cfg.get("storage.on_write_failure").as_deref(), Some("discard"));
        assert!(cfg.get("tracker.missing_key").is_none());
    }

    #[test]
    fn apply_updates_numbers_and_enums() {
        let mut cfg = Config::default();
        cfg.apply("tracker.absence_threshold_secs", "4.5").unwrap();
        cfg.apply("tracker.slow_interval_secs", "20").unwrap();
        cfg.apply("storage.on_write_failure", "retain").unwrap();
        assert_eq!(cfg.tracker.absence_threshold_secs, 4.5);
        assert_eq!(cfg.tracker.slow_interval_secs, 20.0);
        assert_eq!(cfg.storage.on_write_failure, WriteFailurePolicy::Retain);
    }

    #[test]
    fn apply_rejects_unknown_key_and_bad_values() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.apply("tracker.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(cfg.apply("tracker.fast_interval_secs", "fast").is_err());
        assert!(cfg.apply("storage.on_write_failure", "shrug").is_err());
        assert!(cfg.apply("tracker.absence_threshold_secs", "0").is_err());
        assert!(cfg.apply("tracker.fast_interval_secs", "30").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_from_missing_file_writes_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn load_from_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tracker]\nslow_interval_secs = -1.0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
