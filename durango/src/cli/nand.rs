// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, bail};
use cap_std::{ambient_authority, fs::Dir};
use clap::{Parser, Subcommand};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::{
    cli::{status, warning},
    format::{
        nand::{LocatedTable, NandImage},
        updatecfg::UpdateConfig,
        xbfs::{self, XBFS_FILENAMES, XbfsTable},
    },
    stream::{self, ReadAt},
};

fn open_image(path: &Path) -> Result<(File, NandImage)> {
    let file =
        File::open(path).with_context(|| format!("Failed to open for reading: {path:?}"))?;
    let image = NandImage::parse(&file)
        .with_context(|| format!("Failed to parse NAND image: {path:?}"))?;

    Ok((file, image))
}

fn select_table(image: &NandImage, sequence: Option<u8>) -> Result<&LocatedTable> {
    let located = match sequence {
        Some(s) => match image.table_by_sequence(s) {
            Some(t) => t,
            None => bail!("No XBFS table with sequence {s}"),
        },
        None => image.latest_table(),
    };

    if !located.table.hash_valid {
        warning!(
            "XBFS table at {:#x} has an invalid hash",
            located.offset,
        );
    }

    Ok(located)
}

fn display_table(located: &LocatedTable) {
    let table = &located.table;

    println!("Header offset:    {:#x}", located.offset);
    println!("Format version:   {}", table.format_version);
    println!("Sequence version: {}", table.sequence_version);
    println!("Layout version:   {}", table.layout_version);
    println!("GUID:             {}", table.guid);
    println!("Hash:             {}", hex::encode(table.hash));
    println!("Hash valid:       {}", table.hash_valid);
    println!();

    for (name, entry) in table.files() {
        let region = entry.byte_region();
        println!(
            "off: {:#010x}, size: {:#010x}, file: {name}",
            region.offset, region.length,
        );
    }
}

fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let (_, image) = open_image(&cli.input)?;
    let located = select_table(&image, cli.sequence)?;

    print!("{}", image.summary());
    println!(
        "Sequences:   {:?} (latest: {})",
        image.sequences().collect::<Vec<_>>(),
        image.latest_sequence(),
    );
    println!();

    display_table(located);

    Ok(())
}

fn extract_subcommand(cli: &ExtractCli, cancel_signal: &AtomicBool) -> Result<()> {
    let (file, image) = open_image(&cli.input)?;
    let located = select_table(&image, cli.sequence)?;
    let table = &located.table;

    let names = if cli.file.is_empty() {
        table.files().map(|(n, _)| n).collect::<BTreeSet<_>>()
    } else {
        let mut names = BTreeSet::new();

        for name in &cli.file {
            let Some(slot) = xbfs::slot_for_filename(name) else {
                bail!("Unknown XBFS file: {name:?}");
            };
            names.insert(XBFS_FILENAMES[slot]);
        }

        names
    };

    let authority = ambient_authority();
    Dir::create_ambient_dir_all(&cli.directory, authority)
        .with_context(|| format!("Failed to create directory: {:?}", cli.directory))?;
    let directory = Dir::open_ambient_dir(&cli.directory, authority)
        .with_context(|| format!("Failed to open directory: {:?}", cli.directory))?;

    status!(
        "Extracting {} files from XBFS table with sequence {}",
        names.len(),
        table.sequence_version,
    );

    let failures = extract_files(&file, &image, table, &names, &directory, cancel_signal);
    stream::check_cancel(cancel_signal)?;

    for (name, e) in &failures {
        warning!("Failed to extract {name}: {e:#}");
    }

    if !failures.is_empty() {
        bail!(
            "Failed to extract {} of {} files",
            failures.len(),
            names.len(),
        );
    }

    Ok(())
}

fn extract_file(
    source: impl ReadAt,
    image: &NandImage,
    table: &XbfsTable,
    name: &str,
    directory: &Dir,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let mut writer = directory
        .create(name)
        .map(|f| BufWriter::new(f.into_std()))
        .with_context(|| format!("Failed to open for writing: {name:?}"))?;

    image
        .extract_file(source, table, name, &mut writer, cancel_signal)
        .with_context(|| format!("Failed to extract file: {name:?}"))?;

    writer
        .flush()
        .with_context(|| format!("Failed to flush file: {name:?}"))?;

    Ok(())
}

/// Extract every file in `names` into `directory`. A failure only affects the
/// file it occurred in. The failed files are returned in name order.
fn extract_files<'a>(
    source: impl ReadAt + Sync,
    image: &NandImage,
    table: &XbfsTable,
    names: &BTreeSet<&'a str>,
    directory: &Dir,
    cancel_signal: &AtomicBool,
) -> Vec<(&'a str, anyhow::Error)> {
    names
        .par_iter()
        .filter_map(|&name| {
            if table.entry_for_filename(name).is_none() {
                warning!("Skipping file that is not present: {name}");
                return None;
            }

            extract_file(&source, image, table, name, directory, cancel_signal)
                .err()
                .map(|e| (name, e))
        })
        .collect()
}

fn update_config_subcommand(cli: &UpdateConfigCli) -> Result<()> {
    let (file, image) = open_image(&cli.input)?;
    let located = select_table(&image, cli.sequence)?;

    let data = image
        .read_file(&file, &located.table, "update.cfg")
        .context("Failed to read update config")?;
    let config = UpdateConfig::parse(&data).context("Failed to parse update config")?;

    print!("{config}");

    Ok(())
}

pub fn nand_main(cli: &NandCli, cancel_signal: &AtomicBool) -> Result<()> {
    match &cli.command {
        NandCommand::Info(c) => info_subcommand(c),
        NandCommand::Extract(c) => extract_subcommand(c, cancel_signal),
        NandCommand::UpdateConfig(c) => update_config_subcommand(c),
    }
}

/// Show block usage and the file table of a NAND dump.
#[derive(Debug, Parser)]
struct InfoCli {
    /// Path to input NAND dump.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Sequence version of the XBFS table to show.
    ///
    /// Defaults to the latest table.
    #[arg(short, long, value_name = "SEQ")]
    sequence: Option<u8>,
}

/// Extract files from a NAND dump.
#[derive(Debug, Parser)]
struct ExtractCli {
    /// Path to input NAND dump.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Output directory for extracted files.
    #[arg(short, long, value_name = "DIR", value_parser)]
    directory: PathBuf,

    /// Sequence version of the XBFS table to extract from.
    ///
    /// Defaults to the latest table.
    #[arg(short, long, value_name = "SEQ")]
    sequence: Option<u8>,

    /// Only extract the specified file.
    ///
    /// This can be specified multiple times. All present files are extracted
    /// if this is not specified.
    #[arg(short, long, value_name = "NAME")]
    file: Vec<String>,
}

/// Show the contents of `update.cfg` from a NAND dump.
#[derive(Debug, Parser)]
struct UpdateConfigCli {
    /// Path to input NAND dump.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Sequence version of the XBFS table to read from.
    ///
    /// Defaults to the latest table.
    #[arg(short, long, value_name = "SEQ")]
    sequence: Option<u8>,
}

#[derive(Debug, Subcommand)]
enum NandCommand {
    Info(InfoCli),
    Extract(ExtractCli),
    UpdateConfig(UpdateConfigCli),
}

/// Inspect and extract raw NAND flash dumps.
#[derive(Debug, Parser)]
pub struct NandCli {
    #[command(subcommand)]
    command: NandCommand,
}
