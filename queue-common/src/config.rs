use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub const CONFIG_FILE: &str = "config.json";
pub const DB_FILE: &str = "jobs.db";
pub const PID_FILE: &str = "workers.pid";

/// Tuning knobs persisted to `config.json` in the data directory. Workers
/// re-read the file on every failure, so `backoff_base` can be adjusted
/// while jobs are in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on retry count for newly enqueued jobs.
    pub max_retries: u32,
    /// Base of the exponential retry backoff.
    pub backoff_base: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
        }
    }
}

/// A recognized config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    MaxRetries,
    BackoffBase,
}

impl FromStr for ConfigKey {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max_retries" => Ok(ConfigKey::MaxRetries),
            "backoff_base" => Ok(ConfigKey::BackoffBase),
            other => Err(QueueError::InvalidInput(format!(
                "unknown config key: {other} (expected max_retries or backoff_base)"
            ))),
        }
    }
}

/// The on-disk layout: `config.json`, `jobs.db`, and `workers.pid` under one
/// directory, `$QUEUECTL_HOME` if set, `~/.queuectl` otherwise.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from the environment, creating it if
    /// missing. Fails when no home directory can be determined.
    pub fn resolve() -> Result<Self, QueueError> {
        let root = match std::env::var_os("QUEUECTL_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir().ok_or(QueueError::NoHomeDir)?.join(".queuectl"),
        };
        Self::at(root)
    }

    /// Use an explicit directory, creating it if missing.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    /// Read the config file. A missing or malformed file is replaced with
    /// defaults, which are then returned.
    pub fn load_config(&self) -> Result<Config, QueueError> {
        match fs::read_to_string(self.config_path()) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => Ok(config),
                Err(err) => {
                    tracing::warn!("config file was malformed, rewriting defaults: {err}");
                    let config = Config::default();
                    self.save_config(&config)?;
                    Ok(config)
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let config = Config::default();
                self.save_config(&config)?;
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whole-file replace; last writer wins.
    pub fn save_config(&self, config: &Config) -> Result<(), QueueError> {
        let rendered = serde_json::to_string_pretty(config)?;
        fs::write(self.config_path(), rendered)?;
        Ok(())
    }

    /// Update a single key and persist the result.
    pub fn set_config(&self, key: ConfigKey, value: u32) -> Result<Config, QueueError> {
        let mut config = self.load_config()?;
        match key {
            ConfigKey::MaxRetries => config.max_retries = value,
            ConfigKey::BackoffBase => config.backoff_base = value,
        }
        self.save_config(&config)?;
        Ok(config)
    }
}
