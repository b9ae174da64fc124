// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link deduplication of extracted trees.
//!
//! Release tarballs may store the same file more than once through hard
//! links or symlinks. A recursive diff follows those links, and reports the
//! same content once per link. Before diffing, every link whose target is
//! already known by its device and inode number is removed, so each
//! physical file shows up exactly once. Dangling symlinks go as well, since
//! diff has no content to compare for them.

use std::{
    collections::HashMap,
    fs::{metadata, remove_file},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// Device and inode number pair identifying a physical file.
pub type InodeKey = (u64, u64);

/// Index of physical files across extracted trees.
///
/// # Invariant
///
/// - The first path recorded for an inode key is never a duplicate.
#[derive(Debug, Default, Clone)]
pub struct InodeIndex {
    seen: HashMap<InodeKey, PathBuf>,
    duplicates: Vec<PathBuf>,
    dangling: Vec<PathBuf>,
}

impl InodeIndex {
    /// Construct new empty inode index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build inode index over a set of trees.
    ///
    /// Trees are walked in order without following links, and in file name
    /// order within each tree. Regular entries are indexed first. Hard links
    /// to an already indexed inode are marked as duplicates. Symlinks are
    /// checked afterwards, such that a symlink whose target resolves to an
    /// indexed inode is marked as duplicate too. Symlinks that resolve to
    /// nothing are marked as dangling.
    ///
    /// # Errors
    ///
    /// - Return [`InodeError::Walk`] if a tree cannot be traversed.
    #[instrument(skip(trees), level = "debug")]
    pub fn build(trees: impl IntoIterator<Item = impl AsRef<Path>>) -> Result<Self> {
        let mut index = Self::new();
        let mut symlinks = Vec::new();

        for tree in trees {
            let walker = WalkDir::new(tree.as_ref())
                .follow_links(false)
                .sort_by_file_name()
                .min_depth(1);
            for entry in walker {
                let entry = entry?;
                if entry.path_is_symlink() {
                    symlinks.push(entry.into_path());
                    continue;
                }

                let meta = entry.metadata()?;
                index.record((meta.dev(), meta.ino()), entry.into_path());
            }
        }

        for link in symlinks {
            let Ok(meta) = metadata(&link) else {
                debug!("{} is dangling", link.display());
                index.dangling.push(link);
                continue;
            };

            let key = (meta.dev(), meta.ino());
            if index.seen.contains_key(&key) {
                debug!("{} links to {}", link.display(), index.seen[&key].display());
                index.duplicates.push(link);
            }
        }

        Ok(index)
    }

    fn record(&mut self, key: InodeKey, path: PathBuf) {
        match self.seen.get(&key) {
            Some(first) => {
                debug!("{} is hard link of {}", path.display(), first.display());
                self.duplicates.push(path);
            }
            None => {
                self.seen.insert(key, path);
            }
        }
    }

    /// Path first recorded for inode key.
    pub fn lookup(&self, key: &InodeKey) -> Option<&Path> {
        self.seen.get(key).map(PathBuf::as_path)
    }

    /// Paths found to be links of an already indexed file.
    pub fn duplicates(&self) -> &[PathBuf] {
        self.duplicates.as_slice()
    }

    /// Symlinks pointing at nothing.
    pub fn dangling(&self) -> &[PathBuf] {
        self.dangling.as_slice()
    }

    /// Remove all duplicate and dangling link entries from disk.
    ///
    /// Returns the removed paths, duplicates first.
    ///
    /// # Errors
    ///
    /// - Return [`InodeError::Remove`] if a link cannot be removed.
    pub fn remove_links(self) -> Result<Vec<PathBuf>> {
        let mut removed = self.duplicates;
        removed.extend(self.dangling);
        for path in &removed {
            debug!("remove link {}", path.display());
            remove_file(path).map_err(|err| InodeError::Remove {
                source: err,
                path: path.clone(),
            })?;
        }

        Ok(removed)
    }
}

/// Remove link duplicates from a pair of extracted trees.
///
/// Shorthand for [`InodeIndex::build`] followed by
/// [`InodeIndex::remove_links`].
pub fn dedup_linked_entries(old: impl AsRef<Path>, new: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    InodeIndex::build([old.as_ref(), new.as_ref()])?.remove_links()
}

/// Inode indexing error types.
#[derive(Debug, thiserror::Error)]
pub enum InodeError {
    /// Extracted tree cannot be traversed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// Link entry cannot be removed.
    #[error("failed to remove link {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = InodeError> = std::result::Result<T, E>;
