// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;

pub mod args;
pub mod completion;
pub mod drive;
pub mod nand;
pub mod savegame;
pub mod xvd;
pub mod xvi;

fn report_to_string(report: &impl Serialize) -> Result<String> {
    toml_edit::ser::to_string_pretty(report).context("Failed to serialize report")
}

/// Serialize a report as TOML and write it to `path` or stdout. Nothing else
/// may be printed to stdout by commands that produce reports.
fn write_report(path: Option<&Path>, report: &impl Serialize) -> Result<()> {
    let data = report_to_string(report)?;

    match path {
        Some(p) => fs::write(p, data).with_context(|| format!("Failed to write report: {p:?}"))?,
        None => print!("{data}"),
    }

    Ok(())
}

macro_rules! status {
    ($($arg:tt)*) => {
        println!("\x1b[1m[*] {}\x1b[0m", format!($($arg)*))
    }
}

macro_rules! warning {
    ($($arg:tt)*) => {
        println!("\x1b[1;31m[WARNING] {}\x1b[0m", format!($($arg)+))
    }
}

pub(crate) use status;
pub(crate) use warning;
