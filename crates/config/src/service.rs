use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub database_path: PathBuf,
    pub mirror_root: PathBuf,
    pub read_retries: u32,
    pub busy_timeout_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/data/system/privacy.db"),
            mirror_root: PathBuf::from("/data/system/privacy"),
            read_retries: 3,
            busy_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub packages_list: PathBuf,
}

impl Default for PurgeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            packages_list: PathBuf::from("/data/system/packages.list"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSection {
    pub enabled: bool,
    /// Notifications buffered for the sink before new ones are dropped.
    pub queue_depth: usize,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self { enabled: true, queue_depth: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

/// `privacyd.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub store: StoreSection,
    pub purge: PurgeSection,
    pub watcher: WatcherSection,
    pub log: LogSection,
}

impl ServiceConfig {
    /// `<config dir>/privacyd/privacyd.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("privacyd")
            .join("privacyd.toml")
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("store.database_path is empty".into()));
        }
        if self.store.mirror_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation("store.mirror_root is empty".into()));
        }
        if self.store.read_retries == 0 {
            return Err(ConfigError::Validation("store.read_retries must be at least 1".into()));
        }
        if self.purge.enabled && self.purge.interval_secs == 0 {
            return Err(ConfigError::Validation("purge.interval_secs must be at least 1".into()));
        }
        if self.watcher.queue_depth == 0 {
            return Err(ConfigError::Validation("watcher.queue_depth must be at least 1".into()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    /// Load `path`, falling back to defaults when it is missing or broken.
    ///
    /// A broken file's error is handed back rather than logged, since this
    /// runs before logging is set up.
    pub fn load_or_default(path: &Path) -> (Self, Option<ConfigError>) {
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::load(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }
}
