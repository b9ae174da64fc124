// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use pretty_assertions::assert_eq;
use relpatch::config::{self, GeneratorConfig};
use std::path::PathBuf;

#[test]
fn parse_config_through_library_alias() -> config::Result<()> {
    let result: GeneratorConfig = "[settings]\nscratch_dir = \"scratch\"\n".parse()?;
    assert_eq!(result.settings.scratch_dir, PathBuf::from("scratch"));

    Ok(())
}
