//! Backend and device preferences.
//!
//! A [`Preference`] tells the [`AudioFactory`](crate::AudioFactory) which
//! backend family and devices to try. Every field is optional: missing or
//! empty means "pick automatically and fall back on failure".
//!
//! Preferences round-trip through TOML so applications can keep them in a
//! settings file:
//!
//! ```toml
//! implementation = "cpal"
//! playback_device = "USB Audio"
//! sample_rate = 48000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or saving preferences.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }
}

/// Which backend family and devices a session should use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preference {
    /// Backend family name; restricts creation to that family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,

    /// Capture device name, index, or partial name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_device: Option<String>,

    /// Playback device name, index, or partial name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_device: Option<String>,

    /// Rate to open at when neither role names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,

    /// Preferred block size in frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<usize>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl Preference {
    /// Preference for a specific backend family.
    pub fn for_implementation(name: impl Into<String>) -> Self {
        Self {
            implementation: Some(name.into()),
            ..Self::default()
        }
    }

    /// The requested family, if one was named.
    pub fn implementation(&self) -> Option<&str> {
        non_empty(self.implementation.as_ref())
    }

    /// The requested capture device, if one was named.
    pub fn record_device(&self) -> Option<&str> {
        non_empty(self.record_device.as_ref())
    }

    /// The requested playback device, if one was named.
    pub fn playback_device(&self) -> Option<&str> {
        non_empty(self.playback_device.as_ref())
    }

    /// Load preferences from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load preferences from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save preferences to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        tracing::debug!(path = %path.display(), "saved audio preferences");
        Ok(())
    }

    /// Convert the preferences to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
