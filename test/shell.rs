// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{PUBLISH_DIR, RELEASE_DIR};

use anyhow::{ensure, Result};
use pretty_assertions::assert_eq;
use relpatch::{
    archive::ArchiveFormat,
    config::GeneratorSettings,
    pipeline::{
        tool::{ArchiveTool, Codec, ShellTool},
        PatchGenerator,
    },
};
use sealed_test::prelude::*;
use std::{
    fs::{create_dir_all, write},
    os::unix::fs::symlink,
    path::{Path, PathBuf},
    process::Command,
};

const STAGING_DIR: &str = "staging";

/// Lay out a release tree `staging/<stem>` holding a `main.c`.
fn release_tree(stem: &str, content: &str) -> Result<PathBuf> {
    let tree = Path::new(STAGING_DIR).join(stem);
    create_dir_all(&tree)?;
    write(tree.join("main.c"), content)?;

    Ok(tree)
}

/// Pack `members` of `dir` into release archive through tar(1).
fn tarball(archive: &str, dir: impl AsRef<Path>, members: &[&str]) -> Result<()> {
    create_dir_all(RELEASE_DIR)?;
    create_dir_all(PUBLISH_DIR)?;

    let status = Command::new("tar")
        .arg("-czf")
        .arg(Path::new(RELEASE_DIR).join(archive))
        .arg("-C")
        .arg(dir.as_ref())
        .args(members)
        .status()?;
    ensure!(status.success(), "tar failed to pack {archive}");

    Ok(())
}

fn shell_generator() -> PatchGenerator<ShellTool> {
    let settings = GeneratorSettings {
        publish_dir: PUBLISH_DIR.into(),
        scratch_dir: "archives.tmp".into(),
    };

    PatchGenerator::new(ShellTool::new(), RELEASE_DIR, settings).with_publish(false)
}

fn decompress_text(path: &Path, codec: Codec) -> Result<String> {
    let data = ShellTool::new().decompress(path, codec)?;
    Ok(String::from_utf8(data)?)
}

#[sealed_test]
fn bzip2_rendition_decompresses_to_raw_diff() -> Result<()> {
    release_tree("demo-1.0", "one\n")?;
    release_tree("demo-2.0", "two\n")?;
    tarball("demo-1.0.tar.gz", STAGING_DIR, &["demo-1.0"])?;
    tarball("demo-2.0.tar.gz", STAGING_DIR, &["demo-2.0"])?;

    let patches = shell_generator().run()?;
    assert_eq!(patches.len(), 1);
    let patch = &patches[0];

    let tool = ShellTool::new();
    create_dir_all("check/demo-1.0")?;
    create_dir_all("check/demo-2.0")?;
    tool.extract(
        &Path::new(RELEASE_DIR).join("demo-1.0.tar.gz"),
        ArchiveFormat::Gzip,
        Path::new("check/demo-1.0"),
    )?;
    tool.extract(
        &Path::new(RELEASE_DIR).join("demo-2.0.tar.gz"),
        ArchiveFormat::Gzip,
        Path::new("check/demo-2.0"),
    )?;
    let raw = tool.diff_trees(
        Path::new("check"),
        Path::new("demo-1.0"),
        Path::new("demo-2.0"),
    )?;

    assert_eq!(tool.decompress(&patch.bzip2, Codec::Bzip2)?, raw);
    assert_eq!(tool.decompress(&patch.gzip, Codec::Gzip)?, raw);

    let text = String::from_utf8(raw)?;
    assert!(text.contains("demo-1.0/main.c"));
    assert!(text.contains("-one"));
    assert!(text.contains("+two"));

    Ok(())
}

#[sealed_test]
fn dangling_symlinks_do_not_drop_patch() -> Result<()> {
    for (stem, content) in [("demo-1.0", "one\n"), ("demo-2.0", "two\n")] {
        let tree = release_tree(stem, content)?;
        symlink("nowhere", tree.join("dangling"))?;
        tarball(&format!("{stem}.tar.gz"), STAGING_DIR, &[stem])?;
    }

    let patches = shell_generator().run()?;
    assert_eq!(patches.len(), 1);

    let text = decompress_text(&patches[0].gzip, Codec::Gzip)?;
    assert!(text.contains("-one"));
    assert!(text.contains("+two"));
    assert!(!text.contains("dangling"));

    Ok(())
}

#[sealed_test]
fn archives_without_top_level_directory_keep_their_files() -> Result<()> {
    for (stem, content) in [("demo-1.0", "one\n"), ("demo-2.0", "two\n")] {
        let tree = release_tree(stem, content)?;
        tarball(&format!("{stem}.tar.gz"), tree, &["main.c"])?;
    }

    let patches = shell_generator().run()?;
    assert_eq!(patches.len(), 1);

    let text = decompress_text(&patches[0].bzip2, Codec::Bzip2)?;
    assert!(text.contains("demo-2.0/main.c"));
    assert!(text.contains("-one"));
    assert!(text.contains("+two"));

    Ok(())
}

#[sealed_test]
fn single_top_level_directory_is_stripped() -> Result<()> {
    let tree = release_tree("demo-1.0", "one\n")?;
    create_dir_all(tree.join("demo-1.0"))?;
    write(tree.join("demo-1.0").join("nested"), "nested\n")?;
    tarball("demo-1.0.tar.gz", STAGING_DIR, &["demo-1.0"])?;

    let dest = Path::new("unpacked");
    create_dir_all(dest)?;
    ShellTool::new().extract(
        &Path::new(RELEASE_DIR).join("demo-1.0.tar.gz"),
        ArchiveFormat::Gzip,
        dest,
    )?;

    assert!(dest.join("main.c").is_file());
    assert!(dest.join("demo-1.0").join("nested").is_file());
    assert!(!Path::new("unpacked.unpack").exists());

    Ok(())
}
