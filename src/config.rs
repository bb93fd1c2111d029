use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSecondsWithFrac, serde_as};
use tracing::debug;

use crate::error::ConfigError;
use crate::reader::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCOVERY_TIMEOUT};

const CONFIG_FILE_NAME: &str = "scan-config.json";

/// Tunables for discovery and connection.
///
/// Timeouts are written in seconds (`{"discoveryTimeout": 30}`).
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ScanConfig {
    #[builder(default = DEFAULT_DISCOVERY_TIMEOUT)]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    discovery_timeout: Duration,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    connect_timeout: Duration,
    #[builder(into)]
    name_filter: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ScanConfig {
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn name_filter(&self) -> Option<&str> {
        self.name_filter.as_deref()
    }

    /// Loads the config file at `path`, or the per-user default file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing or any file fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::read(path);
        }

        match default_config_path() {
            Some(path) if path.is_file() => Self::read(&path),
            _ => {
                debug!("no config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), ?config, "loaded config file");
        Ok(config)
    }

    /// Applies command-line overrides on top of this config.
    #[must_use]
    pub fn with_overrides(
        mut self,
        discovery_timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
        name_filter: Option<String>,
    ) -> Self {
        if let Some(timeout) = discovery_timeout {
            self.discovery_timeout = timeout;
        }
        if let Some(timeout) = connect_timeout {
            self.connect_timeout = timeout;
        }
        if name_filter.is_some() {
            self.name_filter = name_filter;
        }
        self
    }
}

/// Returns the per-user config file location.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "tagscan", "tagscan")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
