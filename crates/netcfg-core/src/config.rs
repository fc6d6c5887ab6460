use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_APP_NAME: &str = "netcfg";
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("config serialization failed: {0}")]
    Serialize(String),
    #[error("HOME not set")]
    NoHome,
}

/// Parameters of one locked session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Label the write lock is taken under; shown to contending applications.
    pub app_name: String,
    pub lock_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_owned(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// On-disk configuration, `~/.config/netcfg/config.toml` by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetcfgConfig {
    pub store: Option<PathBuf>,
    pub app_name: String,
    pub lock_timeout_ms: u64,
}

impl Default for NetcfgConfig {
    fn default() -> Self {
        Self {
            store: None,
            app_name: DEFAULT_APP_NAME.to_owned(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
        }
    }
}

impl NetcfgConfig {
    /// Load the default config file; a missing file yields defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            app_name: self.app_name.clone(),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME").map_err(|_| ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join(".config/netcfg/config.toml"))
}
