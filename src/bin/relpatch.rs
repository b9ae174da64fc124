// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use relpatch::{
    archive::ArchiveEntry,
    config::GeneratorConfig,
    path::default_config_path,
    pipeline::{tool::ShellTool, PatchGenerator},
};

use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Generate incremental patches between successive release archives.
#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "relpatch [target] [archive_dir] [no_publish]",
    version
)]
struct Cli {
    /// Only make the patch leading up to this release, e.g., "demo-2.0".
    #[arg(value_name = "target")]
    pub target: Option<String>,

    /// Directory holding release archives.
    #[arg(value_name = "archive_dir")]
    pub archive_dir: Option<PathBuf>,

    /// Any non-empty value disables publishing patches.
    #[arg(value_name = "no_publish")]
    pub no_publish: Option<String>,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config = GeneratorConfig::load(default_config_path()?)?;

        // INVARIANT: Accept full archive file name as target too.
        let target = self.target.map(|target| {
            ArchiveEntry::from_file_name(&target)
                .map(|entry| entry.stem().to_string())
                .unwrap_or(target)
        });
        let publish = self.no_publish.is_none_or(|flag| flag.is_empty());
        let archive_dir = self
            .archive_dir
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        let generator = PatchGenerator::new(ShellTool::new(), archive_dir, config.settings)
            .with_target(target)
            .with_publish(publish);
        let patches = generator.run()?;
        info!("made {} patches", patches.len());

        Ok(())
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}
