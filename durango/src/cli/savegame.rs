// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    cli,
    format::savegame::{
        self, CONTAINERS_INDEX, ContainerBlob, ContainerIdxEntry, ContainerIndex,
    },
    stream::FromReader,
};

#[derive(Debug, Serialize)]
struct SaveReport {
    filename: String,
    filename_alt: String,
    text: String,
    save_type: String,
    blob_number: u8,
    filesize: u32,
    modified: String,
    file_guid: String,
    blob_path: String,
    data_path: String,
}

#[derive(Debug, Default, Serialize)]
struct TitleReport {
    name: String,
    aum_id: String,
    id: String,
    index_type: u32,
    /// Saves keyed by owner and then folder GUID.
    xuid: BTreeMap<String, BTreeMap<String, SaveReport>>,
}

#[derive(Debug, Default, Serialize)]
struct SavegameReport {
    /// Keyed by title GUID.
    title: BTreeMap<String, TitleReport>,
}

/// If `path` is itself a savegame folder, return just that. Otherwise, return
/// every child directory that is a savegame folder.
fn find_folders(path: &Path) -> Result<Vec<PathBuf>> {
    if path.join(CONTAINERS_INDEX).is_file() {
        return Ok(vec![path.to_owned()]);
    }

    let mut folders = vec![];

    for entry in
        fs::read_dir(path).with_context(|| format!("Failed to read directory: {path:?}"))?
    {
        let entry =
            entry.with_context(|| format!("Failed to read directory entry: {path:?}"))?;
        let child = entry.path();

        if child.is_dir() && child.join(CONTAINERS_INDEX).is_file() {
            folders.push(child);
        }
    }

    folders.sort();

    Ok(folders)
}

fn read_index(path: &Path) -> Result<ContainerIndex> {
    let reader = File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("Failed to open for reading: {path:?}"))?;
    let index = ContainerIndex::from_reader(reader)
        .with_context(|| format!("Failed to read container index: {path:?}"))?;

    Ok(index)
}

/// Returns [`None`] if the blob does not exist.
fn read_blob(folder: &Path, entry: &ContainerIdxEntry) -> Result<Option<ContainerBlob>> {
    let path = folder.join(entry.blob_path());

    let data = match fs::read(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read blob: {path:?}")),
    };
    let blob = ContainerBlob::parse(&data)
        .with_context(|| format!("Failed to parse blob: {path:?}"))?;

    Ok(Some(blob))
}

fn save_report(entry: &ContainerIdxEntry, blob: &ContainerBlob) -> SaveReport {
    SaveReport {
        filename: entry.filename.clone(),
        filename_alt: entry.filename_alt.clone(),
        text: entry.text.clone(),
        save_type: entry.save_type.to_string(),
        blob_number: entry.blob_number,
        filesize: entry.filesize,
        modified: entry.filetime.to_string(),
        file_guid: blob.file_guid.to_string(),
        blob_path: entry.blob_path().to_string_lossy().into_owned(),
        data_path: entry.data_path(blob).to_string_lossy().into_owned(),
    }
}

/// Add the saves of one folder to the report. Nothing is added if the folder
/// name or index cannot be parsed. Saves with unreadable blobs are skipped.
fn add_folder(folder: &Path, report: &mut SavegameReport) -> Result<()> {
    let folder_name = folder
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid folder name: {folder:?}"))?;
    let key = savegame::parse_folder_key(folder_name)?;
    let index = read_index(&folder.join(CONTAINERS_INDEX))?;

    debug!(
        "Parsing {:?} ({}, xuid: {}, guid: {}) with {} files",
        index.name,
        index.aum_id,
        key.xuid,
        key.title_guid,
        index.files.len(),
    );

    let mut saves = BTreeMap::new();

    for entry in index.entries_with_data() {
        let blob = match read_blob(folder, entry) {
            Ok(Some(b)) => b,
            Ok(None) => {
                warn!(
                    "Blob for {:?} does not exist: {:?}",
                    entry.filename,
                    entry.blob_path(),
                );
                continue;
            }
            Err(e) => {
                warn!("Skipping save {:?}: {e:#}", entry.filename);
                continue;
            }
        };

        saves.insert(entry.folder_guid.to_string(), save_report(entry, &blob));
    }

    // The first folder seen for a title provides its metadata.
    let title = report
        .title
        .entry(key.title_guid)
        .or_insert_with(|| TitleReport {
            name: index.name.clone(),
            aum_id: index.aum_id.clone(),
            id: index.id.clone(),
            index_type: index.index_type,
            xuid: BTreeMap::new(),
        });

    title.xuid.entry(key.xuid).or_default().extend(saves);

    Ok(())
}

fn build_report(path: &Path) -> Result<SavegameReport> {
    let folders = find_folders(path)?;
    let mut report = SavegameReport::default();

    info!("Found {} savegame folders", folders.len());

    for folder in folders {
        // Bad folders are skipped so that the rest can still be listed.
        if let Err(e) = add_folder(&folder, &mut report) {
            warn!("Skipping {folder:?}: {e:#}");
        }
    }

    Ok(report)
}

fn list_subcommand(cli: &ListCli) -> Result<()> {
    let report = build_report(&cli.path)?;

    cli::write_report(cli.output.as_deref(), &report)
}

pub fn savegame_main(cli: &SavegameCli) -> Result<()> {
    match &cli.command {
        SavegameCommand::List(c) => list_subcommand(c),
    }
}

/// List the saves in one or more savegame folders.
///
/// The output is a TOML report grouped by title GUID.
#[derive(Debug, Parser)]
struct ListCli {
    /// Path to a savegame folder or a directory containing savegame folders.
    #[arg(short, long, value_name = "DIR", value_parser)]
    path: PathBuf,

    /// Path to output TOML report. Defaults to stdout.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum SavegameCommand {
    List(ListCli),
}

/// Inspect savegame containers from external drives.
#[derive(Debug, Parser)]
pub struct SavegameCli {
    #[command(subcommand)]
    command: SavegameCommand,
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::{
        format::{
            primitive::FileTime,
            savegame::{BLOB_MAGIC, BLOB_SIZE, SaveType, guid_file_name},
        },
        stream::ToWriter,
    };

    use super::*;

    const TITLE_GUID: &str = "5A1F8C5E-7F61-4F7A-9E6C-2C1C8D9A0B11";

    fn entry(name: &str, folder_guid: u128) -> ContainerIdxEntry {
        ContainerIdxEntry {
            filename: name.to_owned(),
            filename_alt: format!("{name}_alt"),
            text: String::new(),
            blob_number: 1,
            save_type: SaveType::User,
            folder_guid: Uuid::from_u128(folder_guid),
            filetime: FileTime(132_500_000_000_000_000),
            reserved: 0,
            filesize: 0x100,
            reserved2: 0,
        }
    }

    fn write_folder(
        root: &Path,
        folder_name: &str,
        title_name: &str,
        blobs: &[(&str, u128, Vec<u8>)],
    ) -> PathBuf {
        let folder = root.join(folder_name);
        fs::create_dir(&folder).unwrap();

        let index = ContainerIndex {
            index_type: 0xe,
            name: title_name.to_owned(),
            aum_id: "Title_8wekyb3d8bbwe!Game".to_owned(),
            filetime: FileTime(0),
            reserved: 0,
            id: String::new(),
            files: blobs.iter().map(|(n, g, _)| entry(n, *g)).collect(),
        };
        index
            .to_writer(File::create(folder.join(CONTAINERS_INDEX)).unwrap())
            .unwrap();

        for (_, guid, data) in blobs {
            let dir = folder.join(guid_file_name(&Uuid::from_u128(*guid)));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("container.1"), data).unwrap();
        }

        folder
    }

    fn valid_blob(file_guid: u128) -> Vec<u8> {
        let mut data = vec![0u8; BLOB_SIZE];
        data[8..16].copy_from_slice(BLOB_MAGIC);
        data[152..168].copy_from_slice(&Uuid::from_u128(file_guid).to_bytes_le());
        data
    }

    #[test]
    fn truncated_blob_skips_only_that_save() {
        let temp_dir = tempfile::tempdir().unwrap();
        let folder = write_folder(
            temp_dir.path(),
            &format!("u_1234_{TITLE_GUID}"),
            "Title",
            &[("bad", 1, vec![0u8; 10]), ("good", 2, valid_blob(0xabc))],
        );

        let mut report = SavegameReport::default();
        add_folder(&folder, &mut report).unwrap();

        let saves = &report.title[TITLE_GUID].xuid["1234"];
        assert_eq!(saves.len(), 1);

        let save = &saves[&Uuid::from_u128(2).to_string()];
        assert_eq!(save.filename, "good");
        assert_eq!(save.filename_alt, "good_alt");
        assert_eq!(save.file_guid, Uuid::from_u128(0xabc).to_string());
    }

    #[test]
    fn bad_index_leaves_report_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let folder = temp_dir.path().join(format!("m_{TITLE_GUID}"));
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join(CONTAINERS_INDEX), [1, 0, 0]).unwrap();

        let mut report = SavegameReport::default();
        assert!(add_folder(&folder, &mut report).is_err());
        assert!(report.title.is_empty());
    }

    #[test]
    fn first_folder_provides_title_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_folder(
            temp_dir.path(),
            &format!("u_1_{TITLE_GUID}"),
            "First",
            &[("a", 1, valid_blob(1))],
        );
        write_folder(
            temp_dir.path(),
            &format!("u_2_{TITLE_GUID}"),
            "Second",
            &[("b", 2, valid_blob(2))],
        );

        let report = build_report(temp_dir.path()).unwrap();
        let title = &report.title[TITLE_GUID];

        assert_eq!(title.name, "First");
        assert_eq!(title.xuid.len(), 2);
    }

    #[test]
    fn report_output_is_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_folder(
            temp_dir.path(),
            &format!("m_{TITLE_GUID}"),
            "Title",
            &[("a", 1, valid_blob(1))],
        );

        let empty_dir = tempfile::tempdir().unwrap();

        for path in [temp_dir.path(), empty_dir.path()] {
            let report = build_report(path).unwrap();
            let data = cli::report_to_string(&report).unwrap();

            data.parse::<toml_edit::DocumentMut>().unwrap();
            assert!(!data.contains("[*]"));
        }
    }
}
