//! Particle store configuration.
//!
//! # Responsibility
//! - Load `particles.json` from a base directory, writing defaults on first
//!   run.
//! - Resolve relative paths against the base directory.
//!
//! # Invariants
//! - A config file that exists but does not parse is an error, never
//!   silently replaced by defaults.

use crate::repo::id_lock::{IdAllocationLock, IdLockMode};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up inside the base directory.
pub const CONFIG_FILE_NAME: &str = "particles.json";

const DEFAULT_DB_FILE: &str = "particles.sqlite";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Errors from loading or writing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "config io error at {}: {source}", path.display()),
            Self::Parse { path, source } => {
                write!(f, "invalid config at {}: {source}", path.display())
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

/// Logging section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace|debug|info|warn|error.
    pub level: String,
    /// Log directory; relative values resolve against the base directory.
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
        }
    }
}

/// Top-level particle store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite database file; relative values resolve against the base
    /// directory.
    pub db_path: String,
    /// Granularity of the particle ID allocation lock.
    pub id_lock: IdLockMode,
    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_FILE.to_string(),
            id_lock: IdLockMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            logging: LoggingConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Reads `particles.json` under `base_dir`, creating it with defaults
    /// when absent.
    pub fn load_or_init(base_dir: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(base_dir).map_err(|source| ConfigError::Io {
            path: base_dir.to_path_buf(),
            source,
        })?;
        let path = base_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            return serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path, source });
        }

        let config = Self::default();
        let payload = serde_json::to_string_pretty(&config).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, payload).map_err(|source| ConfigError::Io { path, source })?;
        Ok(config)
    }

    pub fn db_path(&self, base_dir: &Path) -> PathBuf {
        resolve(base_dir, &self.db_path)
    }

    pub fn log_dir(&self, base_dir: &Path) -> PathBuf {
        resolve(base_dir, &self.logging.log_dir)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Builds the allocation lock to share across this process's connections.
    pub fn id_allocation_lock(&self) -> IdAllocationLock {
        IdAllocationLock::new(self.id_lock)
    }
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let candidate = PathBuf::from(value);
    if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(candidate)
    }
}
