// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Incremental patch sets between successive release archives.
//!
//! Relpatch scans a directory of release tarballs, orders them by version,
//! and produces a compressed unified diff between every pair of adjacent
//! releases of the same program. See [`pipeline`] for the gory details.

pub mod archive;
pub mod config;
pub mod path;
pub mod pipeline;
pub mod version;

pub use archive::{scan_archives, ArchiveEntry, ArchiveFormat};
pub use config::{GeneratorConfig, GeneratorSettings};
pub use pipeline::{PatchArtifact, PatchGenerator, PipelineState};
pub use version::VersionKey;
