// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch set generation.
//!
//! A __patch set__ is the series of incremental patches between successive
//! releases of a program. Given a release directory full of tarballs, every
//! adjacent pair of releases belonging to the same program gets its own
//! patch, so users can hop from one release to the next without fetching
//! a whole tarball again.
//!
//! # Pipeline
//!
//! Generation is one sequential pass: _scan → sort → pairwise diff → publish
//! → cleanup_. Release archives are scanned and sorted by
//! [`VersionKey`](crate::version::VersionKey). Consecutive archives of the
//! same program form a __program group__. For each adjacent pair in a group,
//! both archives are extracted into a scratch directory, link duplicates are
//! removed, and the trees are diffed. The diff is written compressed as both
//! `patch-<program>-<from>-<to>.gz` and `patch-<program>-<from>-<to>.bz2` into
//! the release directory. The bzip2 rendition is derived from the gzip
//! rendition rather than from the raw diff, which proves the gzip artifact
//! decompresses back to the exact diff.
//!
//! The extracted tree of the newer release is kept around, because it is the
//! older release of the next pair in the group.
//!
//! # Failure Model
//!
//! This is batch tooling, not a transactional system. Failing to scan the
//! release directory or to create the scratch directory aborts the run.
//! Failures while producing a single patch are logged and the run moves on
//! to the next pair. Partial artifacts of a failed pair may remain.

pub mod inode;
pub mod tool;

use crate::{
    archive::{scan_archives, ArchiveEntry},
    config::GeneratorSettings,
    pipeline::{
        inode::dedup_linked_entries,
        tool::{quote, ArchiveTool, Codec, ShellTool},
    },
};

use filetime::{set_file_times, FileTime};
use std::{
    fs::{hard_link, metadata, remove_dir_all, remove_file, set_permissions, Permissions},
    io::ErrorKind,
    os::unix::fs::{chown, MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Patch between two adjacent releases of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchArtifact {
    /// Name of patched program.
    pub program: String,

    /// Version the patch applies to.
    pub from_version: String,

    /// Version the patch leads up to.
    pub to_version: String,

    /// Path to gzip rendition of patch.
    pub gzip: PathBuf,

    /// Path to bzip2 rendition of patch.
    pub bzip2: PathBuf,
}

impl PatchArtifact {
    /// Construct new patch artifact between two releases in output directory.
    pub fn new(dir: impl AsRef<Path>, from: &ArchiveEntry, to: &ArchiveEntry) -> Self {
        let name = patch_name(to.program(), from.version(), to.version());
        Self {
            program: to.program().to_string(),
            from_version: from.version().to_string(),
            to_version: to.version().to_string(),
            gzip: dir
                .as_ref()
                .join(format!("{name}.{}", Codec::Gzip.extension())),
            bzip2: dir
                .as_ref()
                .join(format!("{name}.{}", Codec::Bzip2.extension())),
        }
    }

    /// Base name of patch without codec extension.
    pub fn name(&self) -> String {
        patch_name(&self.program, &self.from_version, &self.to_version)
    }

    /// Paths to all renditions of patch.
    pub fn paths(&self) -> [&Path; 2] {
        [self.gzip.as_path(), self.bzip2.as_path()]
    }
}

fn patch_name(program: &str, from: &str, to: &str) -> String {
    format!("patch-{program}-{from}-{to}")
}

/// State carried from one archive of the scan to the next.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineState {
    /// Archive visited last.
    pub previous_entry: Option<ArchiveEntry>,

    /// Program name of archive visited last.
    pub previous_program: Option<String>,

    /// Extracted tree of archive visited last, if still around.
    pub previous_extracted: Option<PathBuf>,
}

impl PipelineState {
    /// Start new program group at archive.
    pub fn start(entry: &ArchiveEntry) -> Self {
        Self {
            previous_entry: Some(entry.clone()),
            previous_program: Some(entry.program().to_string()),
            previous_extracted: None,
        }
    }

    /// Continue program group at archive whose tree is extracted.
    pub fn extracted(entry: &ArchiveEntry, tree: PathBuf) -> Self {
        Self {
            previous_extracted: Some(tree),
            ..Self::start(entry)
        }
    }

    /// Predecessor of archive within its program group, if any.
    fn predecessor(&self, entry: &ArchiveEntry) -> Option<&ArchiveEntry> {
        match (&self.previous_entry, &self.previous_program) {
            (Some(previous), Some(program)) if program == entry.program() => Some(previous),
            _ => None,
        }
    }
}

/// Patch set generator over a release directory.
#[derive(Debug)]
pub struct PatchGenerator<T = ShellTool>
where
    T: ArchiveTool,
{
    tool: T,
    archive_dir: PathBuf,
    settings: GeneratorSettings,
    target: Option<String>,
    publish: bool,
}

impl<T> PatchGenerator<T>
where
    T: ArchiveTool,
{
    /// Construct new patch generator.
    ///
    /// Generates every patch of the release directory, and publishes them by
    /// default.
    pub fn new(tool: T, archive_dir: impl Into<PathBuf>, settings: GeneratorSettings) -> Self {
        Self {
            tool,
            archive_dir: archive_dir.into(),
            settings,
            target: None,
            publish: true,
        }
    }

    /// Only generate the patch leading up to target archive stem.
    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target.filter(|target| !target.is_empty());
        self
    }

    /// Enable or disable hard linking patches into publish directory.
    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    /// Archive tooling in use.
    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// Path to scratch directory.
    pub fn scratch_dir(&self) -> PathBuf {
        self.archive_dir.join(&self.settings.scratch_dir)
    }

    /// Generate patch set.
    ///
    /// Returns every patch that was successfully produced, in scan order.
    ///
    /// # Errors
    ///
    /// - Return [`PipelineError::Scan`] if release directory cannot be
    ///   scanned.
    /// - Return [`PipelineError::Scratch`] if scratch directory cannot be
    ///   created.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self) -> Result<Vec<PatchArtifact>> {
        info!("scan release directory {:?}", self.archive_dir.display());
        let entries = scan_archives(&self.archive_dir)?;
        debug!("found {} release archives", entries.len());

        let scratch = self.create_scratch()?;
        let mut patches = Vec::new();
        let mut state = PipelineState::default();
        for entry in &entries {
            let (next, patch) = self.step(state, entry, &scratch);
            state = next;
            patches.extend(patch);
        }

        self.remove_tree(&scratch);

        Ok(patches)
    }

    /// Visit one archive of the scan.
    ///
    /// Produces a patch if the archive has a predecessor in its program
    /// group, and passes the updated state on to the next archive.
    pub fn step(
        &self,
        state: PipelineState,
        entry: &ArchiveEntry,
        scratch: &Path,
    ) -> (PipelineState, Option<PatchArtifact>) {
        let previous = state
            .predecessor(entry)
            .filter(|_| self.is_target(entry))
            .cloned();

        let Some(previous) = previous else {
            // INVARIANT: A retained tree is only useful within its group.
            if let Some(tree) = &state.previous_extracted {
                self.remove_tree(tree);
            }
            return (PipelineState::start(entry), None);
        };

        match self.diff_pair(&previous, entry, state.previous_extracted, scratch) {
            Ok((patch, tree)) => (PipelineState::extracted(entry, tree), Some(patch)),
            Err(error) => {
                error!("cannot make patch from {previous} to {entry}: {}", chain(&error));
                (PipelineState::start(entry), None)
            }
        }
    }

    fn is_target(&self, entry: &ArchiveEntry) -> bool {
        self.target
            .as_deref()
            .is_none_or(|target| target == entry.stem())
    }

    #[instrument(skip(self, retained, scratch), level = "debug")]
    fn diff_pair(
        &self,
        previous: &ArchiveEntry,
        entry: &ArchiveEntry,
        retained: Option<PathBuf>,
        scratch: &Path,
    ) -> Result<(PatchArtifact, PathBuf)> {
        let old_tree = match retained {
            Some(tree) => {
                debug!("reuse extracted tree {:?}", tree.display());
                tree
            }
            None => self.extract(previous, scratch)?,
        };
        let new_tree = self.extract(entry, scratch)?;

        let removed = dedup_linked_entries(&old_tree, &new_tree)?;
        if !removed.is_empty() {
            info!("removed {} duplicate links before diffing", removed.len());
        }

        let raw = self.tool.diff_trees(
            scratch,
            Path::new(previous.stem()),
            Path::new(entry.stem()),
        )?;
        if raw.is_empty() {
            warn!("{previous} and {entry} have identical content");
        }

        let patch = PatchArtifact::new(&self.archive_dir, previous, entry);
        self.tool.compress(&raw, Codec::Gzip, &patch.gzip)?;
        let restored = self.tool.decompress(&patch.gzip, Codec::Gzip)?;
        if restored != raw {
            return Err(PipelineError::Mismatch {
                path: patch.gzip.clone(),
            });
        }
        self.tool.compress(&restored, Codec::Bzip2, &patch.bzip2)?;

        let (source, _) = entry.locate(&self.archive_dir)?;
        self.propagate_provenance(&source, &patch);
        self.remove_tree(&old_tree);

        if self.publish {
            if let Err(error) = self.publish_patch(&patch) {
                error!("{}", chain(&error));
            }
        }

        Ok((patch, new_tree))
    }

    fn extract(&self, entry: &ArchiveEntry, scratch: &Path) -> Result<PathBuf> {
        let (archive, format) = entry.locate(&self.archive_dir)?;
        let dest = scratch.join(entry.stem());

        // INVARIANT: Never extract on top of a stale tree.
        if dest.exists() {
            self.remove_tree(&dest);
        }
        mkdirp::mkdirp(&dest).map_err(|err| PipelineError::Tree {
            source: err,
            path: dest.clone(),
        })?;

        self.tool.extract(&archive, format, &dest)?;
        Ok(dest)
    }

    fn create_scratch(&self) -> Result<PathBuf> {
        let scratch = self.scratch_dir();
        info!("mkdir -m 700 {}", quote(scratch.as_os_str()));

        let scratch_error = |err| PipelineError::Scratch {
            source: err,
            path: scratch.clone(),
        };
        mkdirp::mkdirp(&scratch).map_err(scratch_error)?;
        set_permissions(&scratch, Permissions::from_mode(0o700)).map_err(scratch_error)?;

        Ok(scratch)
    }

    fn remove_tree(&self, path: &Path) {
        info!("rm -rf {}", quote(path.as_os_str()));
        match remove_dir_all(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {:?}: {err}", path.display()),
        }
    }

    /// Give patch the timestamps and ownership of its source archive.
    ///
    /// Failure is not fatal, since the patch content is already complete.
    fn propagate_provenance(&self, source: &Path, patch: &PatchArtifact) {
        let meta = match metadata(source) {
            Ok(meta) => meta,
            Err(err) => {
                warn!("cannot stat {:?}: {err}", source.display());
                return;
            }
        };
        let atime = FileTime::from_last_access_time(&meta);
        let mtime = FileTime::from_last_modification_time(&meta);

        for path in patch.paths() {
            info!(
                "touch -r {} {}",
                quote(source.as_os_str()),
                quote(path.as_os_str())
            );
            if let Err(err) = set_file_times(path, atime, mtime) {
                warn!("cannot set times of {:?}: {err}", path.display());
            }

            info!(
                "chown --reference {} {}",
                quote(source.as_os_str()),
                quote(path.as_os_str())
            );
            if let Err(err) = chown(path, Some(meta.uid()), Some(meta.gid())) {
                warn!("cannot set ownership of {:?}: {err}", path.display());
            }
        }
    }

    fn publish_patch(&self, patch: &PatchArtifact) -> Result<()> {
        for path in patch.paths() {
            let Some(name) = path.file_name() else {
                continue;
            };
            let dest = self.settings.publish_dir.join(name);
            info!("ln -f {} {}", quote(path.as_os_str()), quote(dest.as_os_str()));

            let publish_error = |err| PipelineError::Publish {
                source: err,
                path: dest.clone(),
            };
            match remove_file(&dest) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(publish_error(err)),
            }
            hard_link(path, &dest).map_err(publish_error)?;
        }

        Ok(())
    }
}

/// Render error along with every underlying source, colon separated.
fn chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Patch generation error types.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Release directory cannot be scanned, or an archive went missing.
    #[error(transparent)]
    Scan(#[from] crate::archive::ScanError),

    /// Scratch directory cannot be created.
    #[error("failed to create scratch directory {:?}", path.display())]
    Scratch {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Extraction directory cannot be created.
    #[error("failed to create extraction directory {:?}", path.display())]
    Tree {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// External archive tool fails.
    #[error(transparent)]
    Tool(#[from] crate::pipeline::tool::ToolError),

    /// Link deduplication of extracted trees fails.
    #[error(transparent)]
    Inode(#[from] crate::pipeline::inode::InodeError),

    /// Compressed patch does not decompress back to the raw diff.
    #[error("patch {:?} does not decompress to its diff", path.display())]
    Mismatch { path: PathBuf },

    /// Patch cannot be hard linked into publish directory.
    #[error("failed to publish patch to {:?}", path.display())]
    Publish {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
