//! On-disk settings: a small TOML file plus an environment override.
//!
//! Resolution order is CLI flag over environment over file over default;
//! this module owns the file and environment layers, the CLI layer is
//! applied by the binary after parsing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Overrides `backend_url` when set and non-empty.
pub const BACKEND_URL_ENV: &str = "MOOT_BACKEND_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings file shape. Every field is optional in the file; omitted keys
/// keep their defaults.
///
/// ```toml
/// backend_url = "http://courtroom.example:8000"
/// heartbeat_secs = 30
/// max_reconnect_attempts = 5
/// profile_db = "/home/dana/.moot/profiles.db"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: String,
    /// Keep-alive ping period for the live channel. Zero disables it.
    pub heartbeat_secs: u64,
    pub max_reconnect_attempts: u32,
    /// Identity cache location; `None` means the per-user default path.
    pub profile_db: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            backend_url: "http://localhost:8000".into(),
            heartbeat_secs: 30,
            max_reconnect_attempts: 5,
            profile_db: None,
        }
    }
}

impl AppConfig {
    /// Parse one TOML file. Unknown keys are ignored.
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(cfg)
    }

    /// Like [`load`](Self::load), but a missing or unspecified file falls
    /// back to defaults. A file that exists but fails to parse is still an
    /// error.
    pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                warn!(path = %p.display(), "config file not found, using defaults");
                Ok(AppConfig::default())
            }
            None => Ok(AppConfig::default()),
        }
    }

    /// Fold in the environment layer. Call after `load`, before CLI flags.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                debug!(url = %url, "backend url taken from {BACKEND_URL_ENV}");
                self.backend_url = url;
            }
        }
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }
}
