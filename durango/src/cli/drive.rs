// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs::OpenOptions, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::format::drivemode;

fn mode_subcommand(cli: &ModeCli) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(cli.toggle)
        .open(&cli.input)
        .with_context(|| format!("Failed to open drive: {:?}", cli.input))?;

    let mode = drivemode::read_mode(&mut file)
        .with_context(|| format!("Failed to read drive mode: {:?}", cli.input))?;

    if cli.toggle {
        let new_mode = drivemode::toggle_mode(&mut file)
            .with_context(|| format!("Failed to toggle drive mode: {:?}", cli.input))?;

        println!("{mode} -> {new_mode}");
    } else {
        println!("{mode}");
    }

    Ok(())
}

pub fn drive_main(cli: &DriveCli) -> Result<()> {
    match &cli.command {
        DriveCommand::Mode(c) => mode_subcommand(c),
    }
}

/// Show or switch whether an external drive is set up for the console or a PC.
///
/// Toggling rewrites the two byte signature at the end of the first sector.
/// Drives with an unrecognized signature are never written to.
#[derive(Debug, Parser)]
struct ModeCli {
    /// Path to drive device or disk image.
    #[arg(short, long, value_name = "DEVICE", value_parser)]
    input: PathBuf,

    /// Switch to the other mode.
    #[arg(long)]
    toggle: bool,
}

#[derive(Debug, Subcommand)]
enum DriveCommand {
    Mode(ModeCli),
}

/// Inspect or modify external storage drives.
#[derive(Debug, Parser)]
pub struct DriveCli {
    #[command(subcommand)]
    command: DriveCommand,
}
