// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release archive discovery.
//!
//! A release directory holds one tarball per released version of one or more
//! programs, named `<program>-<version>.tar.gz` or `<program>-<version>.tar.bz2`.
//! The part of the file name without the container suffix is called the
//! __stem__. A stem may be backed by both container formats at once, but it
//! is only ever listed once.

use crate::version::{program_name, version_of, VersionKey};

use glob::Pattern;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_dir,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Container format backing a release archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArchiveFormat {
    /// Gzip compressed tarball.
    Gzip,

    /// Bzip2 compressed tarball.
    Bzip2,
}

impl ArchiveFormat {
    /// All formats in order of preference.
    pub const ALL: [ArchiveFormat; 2] = [ArchiveFormat::Gzip, ArchiveFormat::Bzip2];

    /// File name suffix of format.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Gzip => ".tar.gz",
            Self::Bzip2 => ".tar.bz2",
        }
    }

    /// Determine format of archive from its file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.pattern().matches(name))
    }

    fn pattern(&self) -> Pattern {
        // INVARIANT: Suffixes contain no glob meta characters.
        Pattern::new(&format!("?*{}", self.suffix())).unwrap()
    }
}

/// Release archive found in a release directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    stem: String,
    format: ArchiveFormat,
}

impl ArchiveEntry {
    /// Construct new archive entry.
    pub fn new(stem: impl Into<String>, format: ArchiveFormat) -> Self {
        Self {
            stem: stem.into(),
            format,
        }
    }

    /// Parse archive entry from file name.
    ///
    /// Returns [`None`] if the file name is not a release archive.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let format = ArchiveFormat::from_file_name(name)?;
        let stem = name.strip_suffix(format.suffix())?;
        Some(Self::new(stem, format))
    }

    pub fn stem(&self) -> &str {
        self.stem.as_str()
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn program(&self) -> &str {
        program_name(&self.stem)
    }

    pub fn version(&self) -> &str {
        version_of(&self.stem)
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.stem, self.format.suffix())
    }

    pub fn version_key(&self) -> VersionKey {
        VersionKey::new(self.stem.as_str())
    }

    /// Locate file backing this entry inside release directory.
    ///
    /// Prefers the format recorded at scan time, but falls back to the other
    /// format if the archive was swapped out in the meantime.
    ///
    /// # Errors
    ///
    /// - Return [`ScanError::MissingArchive`] if neither format exists.
    pub fn locate(&self, dir: impl AsRef<Path>) -> Result<(PathBuf, ArchiveFormat)> {
        let preferred = std::iter::once(self.format)
            .chain(ArchiveFormat::ALL.into_iter().filter(|f| *f != self.format));
        for format in preferred {
            let path = dir
                .as_ref()
                .join(format!("{}{}", self.stem, format.suffix()));
            if path.is_file() {
                return Ok((path, format));
            }
        }

        Err(ScanError::MissingArchive {
            stem: self.stem.clone(),
            dir: dir.as_ref().to_path_buf(),
        })
    }
}

impl Display for ArchiveEntry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.stem())
    }
}

/// Scan release directory for release archives.
///
/// Only the top-level of the directory is scanned. Stems backed by both gzip
/// and bzip2 tarballs are listed once with the gzip tarball preferred. The
/// result is sorted by [`VersionKey`].
///
/// # Errors
///
/// - Return [`ScanError::OpenDir`] if directory cannot be opened.
/// - Return [`ScanError::ReadDir`] if a directory entry cannot be read.
#[instrument(skip(dir), level = "debug")]
pub fn scan_archives(dir: impl AsRef<Path>) -> Result<Vec<ArchiveEntry>> {
    let dir = dir.as_ref();
    let entries = read_dir(dir).map_err(|err| ScanError::OpenDir {
        source: err,
        dir: dir.to_path_buf(),
    })?;

    let mut found: BTreeMap<String, ArchiveFormat> = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|err| ScanError::ReadDir {
            source: err,
            dir: dir.to_path_buf(),
        })?;

        if !entry.path().is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(archive) = ArchiveEntry::from_file_name(&name.to_string_lossy()) else {
            continue;
        };

        debug!("found archive {:?}", archive.file_name());
        found
            .entry(archive.stem)
            .and_modify(|format| *format = (*format).min(archive.format))
            .or_insert(archive.format);
    }

    let mut archives = found
        .into_iter()
        .map(|(stem, format)| ArchiveEntry::new(stem, format))
        .collect::<Vec<_>>();
    archives.sort_by_cached_key(ArchiveEntry::version_key);

    Ok(archives)
}

/// Release archive scanning error types.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Release directory cannot be opened.
    #[error("failed to open release directory {:?}", dir.display())]
    OpenDir {
        #[source]
        source: std::io::Error,
        dir: PathBuf,
    },

    /// Entry of release directory cannot be read.
    #[error("failed to read entry of release directory {:?}", dir.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        dir: PathBuf,
    },

    /// Neither a gzip nor bzip2 tarball backs a stem.
    #[error("no .tar.gz or .tar.bz2 archive for {stem:?} in {:?}", dir.display())]
    MissingArchive { stem: String, dir: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = ScanError> = std::result::Result<T, E>;
