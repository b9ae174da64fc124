// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod config;
mod shell;

use anyhow::Result;
use relpatch::{
    archive::ArchiveFormat,
    config::GeneratorSettings,
    pipeline::{
        tool::{ArchiveTool, Codec, Result as ToolResult, ToolError},
        PatchGenerator,
    },
};
use std::{
    cell::RefCell,
    collections::BTreeSet,
    fs::{create_dir_all, read, read_dir, write},
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

pub(crate) const RELEASE_DIR: &str = "releases";
pub(crate) const PUBLISH_DIR: &str = "www";

/// Invocation recorded by [`RecordingTool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Extract(String),
    Diff(String, String),
    Compress(Codec, PathBuf),
    Decompress(Codec, PathBuf),
}

/// Archive tool that records invocations instead of running binaries.
///
/// "Extracting" an archive copies its raw bytes into a file named `CONTENT`,
/// and adds a symlink `LINK` pointing at it. Diffing lists every top-level
/// name whose content differs between both trees. Compression is the
/// identity.
#[derive(Debug, Default)]
pub(crate) struct RecordingTool {
    calls: RefCell<Vec<Call>>,
    fail_diff_into: Option<String>,
}

impl RecordingTool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail diffing of any pair leading up to target stem.
    pub(crate) fn failing_diff_into(stem: impl Into<String>) -> Self {
        Self {
            fail_diff_into: Some(stem.into()),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn extracted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Extract(stem) => Some(stem),
                _ => None,
            })
            .collect()
    }
}

impl ArchiveTool for RecordingTool {
    fn extract(&self, archive: &Path, _format: ArchiveFormat, dest: &Path) -> ToolResult<()> {
        let name = dest.file_name().unwrap().to_string_lossy().into_owned();
        self.calls.borrow_mut().push(Call::Extract(name));

        let content = read(archive).map_err(|err| spawn_error("tar", err))?;
        write(dest.join("CONTENT"), content).map_err(|err| spawn_error("tar", err))?;
        symlink("CONTENT", dest.join("LINK")).map_err(|err| spawn_error("tar", err))?;

        Ok(())
    }

    fn diff_trees(&self, workdir: &Path, old: &Path, new: &Path) -> ToolResult<Vec<u8>> {
        let old = old.to_string_lossy().into_owned();
        let new = new.to_string_lossy().into_owned();
        self.calls
            .borrow_mut()
            .push(Call::Diff(old.clone(), new.clone()));

        if self.fail_diff_into.as_deref() == Some(new.as_str()) {
            return Err(ToolError::Failed {
                command: format!("diff -NaHudr {old} {new}"),
                message: "exited with exit status: 2".into(),
            });
        }

        let mut names = BTreeSet::new();
        for tree in [&old, &new] {
            for entry in read_dir(workdir.join(tree)).map_err(|err| spawn_error("diff", err))? {
                let entry = entry.map_err(|err| spawn_error("diff", err))?;
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        let mut out = String::new();
        for name in names {
            let before = read(workdir.join(&old).join(&name)).unwrap_or_default();
            let after = read(workdir.join(&new).join(&name)).unwrap_or_default();
            if before != after {
                out.push_str(&format!("diff {old}/{name} {new}/{name}\n"));
            }
        }

        Ok(out.into_bytes())
    }

    fn compress(&self, data: &[u8], codec: Codec, dest: &Path) -> ToolResult<()> {
        self.calls
            .borrow_mut()
            .push(Call::Compress(codec, dest.to_path_buf()));
        write(dest, data).map_err(|err| spawn_error("compress", err))
    }

    fn decompress(&self, src: &Path, codec: Codec) -> ToolResult<Vec<u8>> {
        self.calls
            .borrow_mut()
            .push(Call::Decompress(codec, src.to_path_buf()));
        read(src).map_err(|err| spawn_error("decompress", err))
    }
}

fn spawn_error(command: &str, source: std::io::Error) -> ToolError {
    ToolError::Spawn {
        source,
        command: command.into(),
    }
}

/// Populate release directory with archives of given content.
pub(crate) fn release_dir<'a>(
    archives: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<PathBuf> {
    create_dir_all(RELEASE_DIR)?;
    create_dir_all(PUBLISH_DIR)?;
    for (name, content) in archives {
        write(Path::new(RELEASE_DIR).join(name), content)?;
    }

    Ok(PathBuf::from(RELEASE_DIR))
}

/// Construct patch generator over release directory with fake tooling.
pub(crate) fn generator(tool: RecordingTool) -> PatchGenerator<RecordingTool> {
    let settings = GeneratorSettings {
        publish_dir: PUBLISH_DIR.into(),
        scratch_dir: "archives.tmp".into(),
    };

    PatchGenerator::new(tool, RELEASE_DIR, settings)
}

/// Sorted listing of file names in directory.
pub(crate) fn list_dir(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    Ok(names)
}
