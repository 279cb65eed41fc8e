// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{format::xvi::XviHeader, stream::FromReader};

fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let reader = File::open(&cli.input)
        .map(BufReader::new)
        .with_context(|| format!("Failed to open for reading: {:?}", cli.input))?;
    let header = XviHeader::from_reader(reader)
        .with_context(|| format!("Failed to read XVI header: {:?}", cli.input))?;

    print!("{header}");

    Ok(())
}

pub fn xvi_main(cli: &XviCli) -> Result<()> {
    match &cli.command {
        XviCommand::Info(c) => info_subcommand(c),
    }
}

/// Show the identifiers stored in an XVI file.
#[derive(Debug, Parser)]
struct InfoCli {
    /// Path to input XVI.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum XviCommand {
    Info(InfoCli),
}

/// Inspect the XVI sidecar files stored next to XVDs on external drives.
#[derive(Debug, Parser)]
pub struct XviCli {
    #[command(subcommand)]
    command: XviCommand,
}
