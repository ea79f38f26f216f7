//! Engine settings, read from the `[archive]` table of the application config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryConfig;
use crate::security::DEFAULT_MAX_COMPRESSION_RATIO;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// What to do with the free-space check before writing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiskSpaceCheck {
    /// Fail on confirmed shortage, warn and proceed when the query fails.
    #[default]
    BestEffort,
    /// Fail on shortage and on query failure.
    Strict,
    Off,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub max_compression_ratio: f64,
    pub disk_space_check: DiskSpaceCheck,
    pub command_timeout_secs: Option<u64>,
    pub progress_buffer: usize,
    pub retry: RetryConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_compression_ratio: DEFAULT_MAX_COMPRESSION_RATIO,
            disk_space_check: DiskSpaceCheck::default(),
            command_timeout_secs: None,
            progress_buffer: 64,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    archive: ArchiveConfig,
}

impl ArchiveConfig {
    /// Parse a whole config file and take its `[archive]` table.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(input)?;
        file.archive.validate()?;
        Ok(file.archive)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_compression_ratio > 1.0) {
            return Err(Error::Invalid {
                key: "max_compression_ratio",
                reason: format!("must be greater than 1, got {}", self.max_compression_ratio),
            });
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::Invalid {
                key: "retry.backoff_multiplier",
                reason: format!("must be at least 1, got {}", self.retry.backoff_multiplier),
            });
        }
        if self.progress_buffer == 0 {
            return Err(Error::Invalid {
                key: "progress_buffer",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}
