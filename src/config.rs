// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional configuration file that relpatch reads
//! at startup. Every setting has a sane default, so a missing configuration
//! file is not an error.

use crate::path::DEFAULT_PUBLISH_DIR;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Patch generator configuration layout.
///
/// # General Layout
///
/// Only one section exists: settings. It names the shared directory that
/// generated patches get published into, and the scratch directory that
/// release archives get extracted into.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GeneratorConfig {
    /// Settings for the patch generator.
    #[serde(default)]
    pub settings: GeneratorSettings,
}

impl GeneratorConfig {
    /// Load configuration from file.
    ///
    /// Falls back to default configuration if the file does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    /// - Return [`ConfigError::ShellExpansion`] if publish directory cannot be
    ///   expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }
}

impl FromStr for GeneratorConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: GeneratorConfig =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on publish directory field.
        config.settings.publish_dir = PathBuf::from(
            shellexpand::full(config.settings.publish_dir.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(config)
    }
}

impl Display for GeneratorConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Patch generator settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorSettings {
    /// Shared directory to hard link generated patches into.
    pub publish_dir: PathBuf,

    /// Scratch directory name, relative to the release directory.
    pub scratch_dir: PathBuf,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            publish_dir: PathBuf::from(DEFAULT_PUBLISH_DIR),
            scratch_dir: PathBuf::from("archives.tmp"),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file exists, but cannot be read.
    #[error("failed to read configuration file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
