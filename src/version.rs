// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release version ordering.
//!
//! Release archives are named `<program>-<version>`, where the version is a
//! free-form mix of digits and punctuation, e.g., "1.9.12" or "2.0pre3".
//! Plain string comparison gets these wrong as soon as a numeric component
//! gains a digit, i.e., "prog-10" would sort before "prog-9". Thus, every
//! maximal run of ASCII digits is left-padded with zeros to a fixed width
//! before comparison, so numeric components compare by magnitude.
//!
//! # Patch Names
//!
//! Stems shaped like `patch-<program>-<from>-<to>` are keyed by
//! `<program>-<to>z` instead, so a patch sorts right after the release it
//! leads up to.

use regex::Regex;
use std::{
    cmp::Ordering,
    fmt::{Display, Formatter, Result as FmtResult},
    sync::LazyLock,
};

/// Width that every run of digits is padded to.
pub const PAD_WIDTH: usize = 9;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());
static PATCH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^patch-(.*)-[.0-9]*-([.0-9]*).*$").unwrap());
static VERSION_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-[0-9]").unwrap());

/// Sort key of an archive stem.
///
/// # Invariant
///
/// - Distinct stems never compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionKey {
    normalized: String,
    padded: String,
    raw: String,
}

impl VersionKey {
    /// Construct new version key from archive stem.
    pub fn new(stem: impl Into<String>) -> Self {
        let raw = stem.into();
        let normalized = PATCH_NAME.replace(&raw, "${1}-${2}z");

        Self {
            normalized: pad_digits(&normalized),
            padded: pad_digits(&raw),
            raw,
        }
    }

    /// Stem this key was derived from.
    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized
            .cmp(&other.normalized)
            .then_with(|| self.padded.cmp(&other.padded))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for VersionKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Left-pad every maximal run of ASCII digits with zeros.
///
/// Runs longer than [`PAD_WIDTH`] are left untouched.
pub fn pad_digits(text: &str) -> String {
    DIGITS
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{:0>width$}", &caps[0], width = PAD_WIDTH)
        })
        .into_owned()
}

/// Program name of an archive stem.
///
/// Everything from the first `-<digit>` onward is the version, so
/// "foo-bar-1.2" belongs to program "foo-bar".
pub fn program_name(stem: &str) -> &str {
    match VERSION_START.find(stem) {
        Some(found) => &stem[..found.start()],
        None => stem,
    }
}

/// Version part of an archive stem.
///
/// Empty if the stem carries no version at all.
pub fn version_of(stem: &str) -> &str {
    match VERSION_START.find(stem) {
        Some(found) => &stem[found.start() + 1..],
        None => "",
    }
}
