//! # vigil-config
//!
//! Configuration management for vigil.
//!
//! Loads configuration from:
//! 1. `~/.vigil/config.toml` (global)
//! 2. `.vigil/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tracing::{debug, warn};
use vigil_log::Level;

/// Project-local config path, relative to the working directory.
pub const PROJECT_CONFIG: &str = ".vigil/config.toml";

pub const ENV_LOG_LEVEL: &str = "VIGIL_LOG_LEVEL";
pub const ENV_SOCKET: &str = "VIGIL_SOCKET";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> =
    Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub daemon: DaemonConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config =
            Self::load_from(Self::global_config_path().as_deref(), Path::new(PROJECT_CONFIG))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads and merges the given files; missing files are skipped.
    /// Environment overrides are not applied.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        // 1. Global config
        if let Some(global) = global {
            if let Some(table) = read_table(global)? {
                debug!(path = %global.display(), "Loading global config");
                merge_tables(&mut merged, table);
            }
        }

        // 2. Project config overrides global
        if let Some(table) = read_table(project)? {
            debug!(path = %project.display(), "Loading project config");
            merge_tables(&mut merged, table);
        }

        let path = project.to_path_buf();
        toml::Value::Table(merged)
            .try_into()
            .map_err(|source| ConfigError::Toml { path, source })
    }

    /// Global config path: ~/.vigil/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vigil/config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            match level.parse() {
                Ok(level) => self.logging.level = level,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_LOG_LEVEL),
            }
        }
        if let Some(socket) = lookup(ENV_SOCKET) {
            self.daemon.socket = PathBuf::from(socket);
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }
}

fn read_table(path: &Path) -> Result<Option<toml::Table>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = contents.parse().map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(table))
}

/// Deep merge: tables merge recursively, everything else in `overlay` wins.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Stderr threshold: fatal, off, error, warn, info, debug, trace
    pub level: Level,
    /// Name given to the main thread in log lines
    pub thread_name: String,
    /// Turn SIGSEGV/SIGBUS/SIGFPE/SIGILL into logged fatal errors
    pub fault_handlers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Error,
            thread_name: "main".to_string(),
            fault_handlers: true,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket log subscribers connect to
    pub socket: PathBuf,
    /// Connections beyond this are refused
    pub max_subscribers: usize,
    /// Seconds between heartbeat lines (0 disables)
    pub heartbeat_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/tmp/vigild.sock"),
            max_subscribers: 64,
            heartbeat_secs: 60,
        }
    }
}
