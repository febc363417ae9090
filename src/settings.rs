//! Application settings management
//!
//! Loads the TOML configuration file (timing thresholds and source
//! device selection) and validates it.

use crate::emulator::Timings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not find config directory")]
    NoConfigDir,

    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0} deadline must be greater than zero")]
    ZeroDeadline(&'static str),

    #[error("right deadline ({right_ms} ms) must be shorter than left deadline ({left_ms} ms)")]
    DeadlineOrder { left_ms: u64, right_ms: u64 },
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long a LEFT press waits for RIGHT before it counts as a click
    pub left_deadline_ms: u64,

    /// How long a RIGHT press waits for LEFT before it counts as a click
    pub right_deadline_ms: u64,

    /// Explicit source device node; skips discovery
    pub device: Option<String>,

    /// Case-insensitive name fragments used to discover the trackpoint
    pub device_names: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let timings = Timings::default();
        Self {
            left_deadline_ms: timings.left_deadline.as_millis() as u64,
            right_deadline_ms: timings.right_deadline.as_millis() as u64,
            device: None,
            device_names: vec![
                "trackpoint".to_string(),
                // HP EliteBook 850 G7
                "SYNA30B4:00 06CB:CE09".to_string(),
            ],
        }
    }
}

impl Settings {
    /// Default settings file path
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let config_dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(config_dir.join("trackpoint-midbutton").join("config.toml"))
    }

    /// Load settings from `path`, or the default location. A missing
    /// file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        let settings = Self::parse(&content).map_err(|source| SettingsError::Parse {
            path: path.clone(),
            source,
        })?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Validate the thresholds and convert them for the emulator.
    pub fn timings(&self) -> Result<Timings, SettingsError> {
        if self.left_deadline_ms == 0 {
            return Err(SettingsError::ZeroDeadline("left"));
        }
        if self.right_deadline_ms == 0 {
            return Err(SettingsError::ZeroDeadline("right"));
        }
        if self.right_deadline_ms >= self.left_deadline_ms {
            return Err(SettingsError::DeadlineOrder {
                left_ms: self.left_deadline_ms,
                right_ms: self.right_deadline_ms,
            });
        }
        Ok(Timings {
            left_deadline: Duration::from_millis(self.left_deadline_ms),
            right_deadline: Duration::from_millis(self.right_deadline_ms),
        })
    }
}
