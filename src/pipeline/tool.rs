// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External archive tooling.
//!
//! Patch generation offloads the heavy lifting to the standard archive tools
//! found on any *nix box: tar, diff, gzip, and bzip2. Every call is made
//! through the [`ArchiveTool`] capability, so the pipeline itself never needs
//! to know how a tree gets unpacked or how a stream gets compressed.
//!
//! # Transcript
//!
//! [`ShellTool`] logs every command line right before it is run, quoted such
//! that it can be pasted back into a shell. The log of a run is thus a
//! replayable transcript of every shell-level action taken.

use crate::archive::ArchiveFormat;

use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{create_dir_all, read_dir, remove_dir, remove_dir_all, rename, File},
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};
use tracing::{debug, info, warn};

/// Stream compression codec for patch artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Gzip,
    Bzip2,
}

impl Codec {
    /// File name extension of compressed artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
        }
    }

    fn program(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
        }
    }
}

/// Capability to manipulate release archives and patch streams.
pub trait ArchiveTool {
    /// Unpack archive into destination directory.
    ///
    /// If the archive holds exactly one top-level directory, that directory
    /// is stripped, such that the content of `<program>-<version>/` lands
    /// directly in `dest`. Archives without such a root land as they are.
    fn extract(&self, archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<()>;

    /// Produce unified recursive diff between two trees.
    ///
    /// Both `old` and `new` are relative to `workdir`, and show up as such in
    /// the diff headers. Absent files are treated as empty.
    fn diff_trees(&self, workdir: &Path, old: &Path, new: &Path) -> Result<Vec<u8>>;

    /// Compress data at maximum level into destination file.
    fn compress(&self, data: &[u8], codec: Codec, dest: &Path) -> Result<()>;

    /// Decompress file back into raw data.
    fn decompress(&self, src: &Path, codec: Codec) -> Result<Vec<u8>>;
}

/// Archive tooling through standard *nix binaries.
#[derive(Debug, Default, Clone)]
pub struct ShellTool;

impl ShellTool {
    /// Construct new shell tool.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveTool for ShellTool {
    fn extract(&self, archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<()> {
        let flags = match format {
            ArchiveFormat::Gzip => "-xzf",
            ArchiveFormat::Bzip2 => "-xjf",
        };

        let mut staging = dest.as_os_str().to_owned();
        staging.push(".unpack");
        let staging = PathBuf::from(staging);
        make_dir(&staging)?;

        let mut cmd = Command::new("tar");
        cmd.arg(flags).arg(archive).arg("-C").arg(&staging);
        syscall(cmd, &[0])?;

        hoist_tree(&staging, dest)
    }

    fn diff_trees(&self, workdir: &Path, old: &Path, new: &Path) -> Result<Vec<u8>> {
        let mut cmd = Command::new("diff");
        cmd.current_dir(workdir).arg("-NaHudr").arg(old).arg(new);
        let line = CommandLine::new(&cmd).to_string();
        let output = run(cmd, &line)?;

        // INVARIANT: diff(1) exits with 2 on trouble, yet still reports every
        // file it managed to compare.
        if output.status.code() == Some(2) && !output.stdout.is_empty() {
            warn!("{line}: {}", chomp(&output.stderr));
            return Ok(output.stdout);
        }

        // INVARIANT: diff(1) exits with 1 when trees differ, that is no failure.
        check_status(&line, &output, &[0, 1])?;
        Ok(output.stdout)
    }

    fn compress(&self, data: &[u8], codec: Codec, dest: &Path) -> Result<()> {
        let mut cmd = Command::new(codec.program());
        cmd.arg("-9");
        let line = CommandLine::new(&cmd).redirect_out(dest).to_string();
        let file = File::create(dest).map_err(|err| ToolError::Spawn {
            source: err,
            command: line.clone(),
        })?;
        cmd.stdout(file);

        syscall_with_input(cmd, &line, data)?;
        let written = dest.metadata().map(|meta| meta.len()).unwrap_or(0);
        if written == 0 {
            return Err(ToolError::Failed {
                command: line,
                message: "no output produced".into(),
            });
        }

        Ok(())
    }

    fn decompress(&self, src: &Path, codec: Codec) -> Result<Vec<u8>> {
        let mut cmd = Command::new(codec.program());
        cmd.arg("-d");
        let line = format!("{} < {}", CommandLine::new(&cmd), quote(src.as_os_str()));
        let file = File::open(src).map_err(|err| ToolError::Spawn {
            source: err,
            command: line.clone(),
        })?;
        cmd.stdin(file);

        let output = run(cmd, &line)?;
        check_status(&line, &output, &[0])?;

        Ok(output.stdout)
    }
}

/// Shell-quoted rendition of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    line: String,
}

impl CommandLine {
    pub fn new(cmd: &Command) -> Self {
        let mut line = String::new();
        if let Some(dir) = cmd.get_current_dir() {
            line.push_str(&format!("cd {} && ", quote(dir.as_os_str())));
        }
        line.push_str(&quote(cmd.get_program()));
        for arg in cmd.get_args() {
            line.push(' ');
            line.push_str(&quote(arg));
        }

        Self { line }
    }

    pub fn redirect_out(mut self, dest: &Path) -> Self {
        self.line.push_str(" > ");
        self.line.push_str(&quote(dest.as_os_str()));
        self
    }
}

impl Display for CommandLine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.line)
    }
}

/// Quote argument for a POSIX shell.
///
/// Arguments made up of only safe characters are left bare.
pub fn quote(arg: impl AsRef<OsStr>) -> String {
    let arg = arg.as_ref().to_string_lossy();
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "-_.,/=+:@%".contains(c);
    if !arg.is_empty() && arg.chars().all(is_safe) {
        return arg.into_owned();
    }

    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Move unpacked archive content from staging directory into destination.
///
/// An archive holding exactly one top-level directory has that directory
/// stripped. Anything else lands in the destination as is.
fn hoist_tree(staging: &Path, dest: &Path) -> Result<()> {
    let unpack_error = |path: &Path| {
        let path = path.to_path_buf();
        move |err| ToolError::Unpack { source: err, path }
    };

    let mut entries = Vec::new();
    for entry in read_dir(staging).map_err(unpack_error(staging))? {
        entries.push(entry.map_err(unpack_error(staging))?);
    }

    let root = match entries.as_slice() {
        [single] if single.file_type().map_err(unpack_error(staging))?.is_dir() => {
            Some(single.path())
        }
        _ => None,
    };

    // INVARIANT: Destination must be empty, or rename(2) refuses to replace it.
    remove_dir(dest).map_err(unpack_error(dest))?;
    match root {
        Some(root) => {
            info!("mv {} {}", quote(root.as_os_str()), quote(dest.as_os_str()));
            rename(&root, dest).map_err(unpack_error(&root))?;
            info!("rmdir {}", quote(staging.as_os_str()));
            remove_dir(staging).map_err(unpack_error(staging))?;
        }
        None => {
            debug!("no single top-level directory in {:?}", staging.display());
            info!("mv {} {}", quote(staging.as_os_str()), quote(dest.as_os_str()));
            rename(staging, dest).map_err(unpack_error(staging))?;
        }
    }

    Ok(())
}

fn make_dir(path: &Path) -> Result<()> {
    info!("mkdir -p {}", quote(path.as_os_str()));
    if path.exists() {
        remove_dir_all(path).map_err(|err| ToolError::Unpack {
            source: err,
            path: path.to_path_buf(),
        })?;
    }
    create_dir_all(path).map_err(|err| ToolError::Unpack {
        source: err,
        path: path.to_path_buf(),
    })
}

fn run(mut cmd: Command, line: &str) -> Result<Output> {
    info!("{line}");
    cmd.output().map_err(|err| ToolError::Spawn {
        source: err,
        command: line.to_string(),
    })
}

fn syscall(cmd: Command, ok_codes: &[i32]) -> Result<Output> {
    let line = CommandLine::new(&cmd).to_string();
    let output = run(cmd, &line)?;
    check_status(&line, &output, ok_codes)?;

    Ok(output)
}

fn syscall_with_input(mut cmd: Command, line: &str, input: &[u8]) -> Result<()> {
    info!("{line}");
    let spawn_error = |err| ToolError::Spawn {
        source: err,
        command: line.to_string(),
    };
    let mut child = cmd
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    // INVARIANT: Close stdin before waiting so the compressor sees EOF.
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).map_err(spawn_error)?;
    }

    let output = child.wait_with_output().map_err(spawn_error)?;
    check_status(line, &output, &[0])
}

fn check_status(line: &str, output: &Output, ok_codes: &[i32]) -> Result<()> {
    let accepted = output
        .status
        .code()
        .is_some_and(|code| ok_codes.contains(&code));
    if accepted {
        return Ok(());
    }

    let stderr = chomp(&output.stderr);
    let message = if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        format!("exited with {}:\n{stderr}", output.status)
    };

    Err(ToolError::Failed {
        command: line.to_string(),
        message,
    })
}

fn chomp(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// External tool error types.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Command could not be spawned or fed.
    #[error("failed to run {command}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Unpacked archive content cannot be moved into place.
    #[error("failed to unpack into {:?}", path.display())]
    Unpack {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Command ran, but failed.
    #[error("command {command} failed: {message}")]
    Failed { command: String, message: String },
}

/// Friendly result alias :3
pub type Result<T, E = ToolError> = std::result::Result<T, E>;
