// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsStr,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    cli::{self, status, warning},
    format::xvd::XvdHeader,
    stream::{FileLen, FromReader},
};

/// Name of the file that records the last console a drive was used with.
const LAST_CONSOLE: &str = "LastConsole";

fn read_header(path: &Path) -> Result<XvdHeader> {
    let reader = File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("Failed to open for reading: {path:?}"))?;
    let header = XvdHeader::from_reader(reader)
        .with_context(|| format!("Failed to read XVD header: {path:?}"))?;

    Ok(header)
}

fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let header = read_header(&cli.input)?;

    if cli.debug {
        println!("{header:#?}");
    } else {
        print!("{header}");
    }

    Ok(())
}

fn extract_subcommand(cli: &ExtractCli, cancel_signal: &AtomicBool) -> Result<()> {
    let file = File::open(&cli.input)
        .with_context(|| format!("Failed to open for reading: {:?}", cli.input))?;
    let header = XvdHeader::from_reader(BufReader::new(&file))
        .with_context(|| format!("Failed to read XVD header: {:?}", cli.input))?;
    let file_size = file
        .file_len()
        .with_context(|| format!("Failed to get file size: {:?}", cli.input))?;

    let targets = [
        ("embedded XVD", header.embedded_xvd_region(), &cli.embedded_xvd),
        ("user data", header.user_data_region(), &cli.user_data),
    ];

    for (name, region, output) in targets {
        let Some(output) = output else {
            continue;
        };
        let Some(region) = region else {
            warning!("XVD does not contain {name}");
            continue;
        };

        if !region.fits_within(file_size) {
            bail!("The {name} region {region:?} exceeds the file size: {file_size:#x}");
        }

        status!("Extracting {name} to {output:?}");

        let mut writer = File::create(output)
            .map(BufWriter::new)
            .with_context(|| format!("Failed to open for writing: {output:?}"))?;

        region
            .copy_to(&file, &mut writer, cancel_signal)
            .with_context(|| format!("Failed to copy {name} to: {output:?}"))?;

        writer
            .flush()
            .with_context(|| format!("Failed to flush {name}: {output:?}"))?;
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct ScanEntry {
    path: String,
    product_id: String,
    content_id: String,
    content_type: u32,
    content_type_name: String,
    category: &'static str,
}

#[derive(Debug, Default, Serialize)]
struct ScanReport {
    xvd: Vec<ScanEntry>,
}

fn scan_subcommand(cli: &ScanCli) -> Result<()> {
    let mut paths = vec![];

    for entry in fs::read_dir(&cli.directory)
        .with_context(|| format!("Failed to read directory: {:?}", cli.directory))?
    {
        let entry = entry
            .with_context(|| format!("Failed to read directory entry: {:?}", cli.directory))?;
        let path = entry.path();

        if !path.is_file()
            || path.extension() == Some(OsStr::new("xvi"))
            || path.file_name() == Some(OsStr::new(LAST_CONSOLE))
        {
            continue;
        }

        paths.push(path);
    }

    paths.sort();

    let mut report = ScanReport::default();

    for path in paths {
        // A single bad file should not prevent the rest from being listed.
        let header = match read_header(&path) {
            Ok(h) => h,
            Err(e) => {
                warn!("Skipping {path:?}: {e:#}");
                continue;
            }
        };

        let content_type = header.content_type();
        info!("{path:?}: {content_type}");

        report.xvd.push(ScanEntry {
            path: path.to_string_lossy().into_owned(),
            product_id: header.product_id.to_string(),
            content_id: header.content_id.to_string(),
            content_type: header.content_type,
            content_type_name: content_type.to_string(),
            category: content_type.category().as_str(),
        });
    }

    cli::write_report(cli.output.as_deref(), &report)
}

pub fn xvd_main(cli: &XvdCli, cancel_signal: &AtomicBool) -> Result<()> {
    match &cli.command {
        XvdCommand::Info(c) => info_subcommand(c),
        XvdCommand::Extract(c) => extract_subcommand(c, cancel_signal),
        XvdCommand::Scan(c) => scan_subcommand(c),
    }
}

/// Show the contents of an XVD header.
#[derive(Debug, Parser)]
struct InfoCli {
    /// Path to input XVD.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Show every field, including opaque data.
    #[arg(long)]
    debug: bool,
}

/// Extract regions from an XVD.
///
/// The data is copied as-is. Encrypted content is not decrypted.
#[derive(Debug, Parser)]
#[command(group = ArgGroup::new("outputs").required(true).multiple(true))]
struct ExtractCli {
    /// Path to input XVD.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Path to output embedded XVD.
    #[arg(long, value_name = "FILE", value_parser, group = "outputs")]
    embedded_xvd: Option<PathBuf>,

    /// Path to output user data.
    #[arg(long, value_name = "FILE", value_parser, group = "outputs")]
    user_data: Option<PathBuf>,
}

/// List the XVDs in a directory.
///
/// `.xvi` files and `LastConsole` are skipped. Files that cannot be parsed are
/// reported and skipped.
#[derive(Debug, Parser)]
struct ScanCli {
    /// Path to directory containing XVDs.
    #[arg(short, long, value_name = "DIR", value_parser)]
    directory: PathBuf,

    /// Path to output TOML report. Defaults to stdout.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum XvdCommand {
    Info(InfoCli),
    Extract(ExtractCli),
    Scan(ScanCli),
}

/// Inspect Xbox virtual disk (XVD) files.
#[derive(Debug, Parser)]
pub struct XvdCli {
    #[command(subcommand)]
    command: XvdCommand,
}
