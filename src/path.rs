// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::{env, path::PathBuf};

/// Shared directory that generated patches are published into by default.
pub const DEFAULT_PUBLISH_DIR: &str = "/WWW/src";

/// Environment variable overriding the configuration file path.
pub const CONFIG_ENV: &str = "RELPATCH_CONFIG";

/// Determine absolute path to configuration file.
///
/// Uses [`CONFIG_ENV`] if set. Otherwise, uses XDG Base Directory path
/// `$XDG_CONFIG_HOME/relpatch/config.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoConfigDir`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    dirs::config_dir()
        .map(|path| path.join("relpatch").join("config.toml"))
        .ok_or(NoConfigDir)
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoConfigDir;

/// Friendly result alias :3
pub type Result<T, E = NoConfigDir> = std::result::Result<T, E>;
