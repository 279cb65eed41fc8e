// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Savegame containers as stored on external drives. Each savegame folder is
//! named after the owner and title, and contains a `containers.index` file
//! listing the individual saves. Every save has a directory named after its
//! folder GUID that holds a `container.<N>` blob pointing at the actual data
//! file.

use std::{
    fmt,
    io::{self, Read, Write},
    mem,
    path::PathBuf,
    string::FromUtf16Error,
};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use zerocopy::{FromBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::primitive::{self, FileTime, RawGuid, SliceReader, WritePrimitiveExt},
    stream::{FromReader, ToWriter},
};

pub const CONTAINERS_INDEX: &str = "containers.index";

/// Magic value for [`ContainerBlob::magic`]. This is `Blob` in UTF-16LE.
pub const BLOB_MAGIC: &[u8; 8] = b"B\0l\0o\0b\0";

pub const BLOB_SIZE: usize = 168;

/// Smallest possible encoded index entry, where every string is empty.
const MIN_ENTRY_SIZE: u64 = 3 * 4 + 1 + 4 + 16 + 8 + 8 + 4 + 4;

/// Upper bound on the size of `containers.index` accepted by [`FromReader`].
const MAX_INDEX_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown savegame type in folder name: {0:?}")]
    UnknownSaveType(String),
    #[error("Malformed savegame folder name: {0:?}")]
    MalformedFolderName(String),
    #[error("Truncated input for {field}: need {needed} bytes, but only {available} remain")]
    TruncatedInput {
        field: &'static str,
        needed: u64,
        available: u64,
    },
    #[error("Invalid UTF-16 data in {0}")]
    InvalidUtf16(&'static str, #[source] FromUtf16Error),
    #[error("String is too long for a u32 length prefix: {0}")]
    StringTooLong(&'static str),
    #[error("Too many index entries: {0}")]
    TooManyEntries(usize),
    #[error("Failed to read savegame data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write savegame data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

impl From<primitive::Error> for Error {
    fn from(e: primitive::Error) -> Self {
        match e {
            primitive::Error::TruncatedInput {
                field,
                needed,
                available,
            } => Self::TruncatedInput {
                field,
                needed,
                available,
            },
            primitive::Error::InvalidUtf16(field, e) => Self::InvalidUtf16(field, e),
            primitive::Error::StringTooLong(field) => Self::StringTooLong(field),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Owner and title of a savegame folder, derived from its name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SavegameFolderKey {
    /// Xbox user ID. This is `0` for machine-wide saves.
    pub xuid: String,
    /// Title GUID as written in the folder name. This is not validated.
    pub title_guid: String,
}

impl SavegameFolderKey {
    pub fn is_machine(&self) -> bool {
        self.xuid == "0"
    }
}

/// Split a folder name of the form `m_<GUID>` (machine) or `u_<xuid>_<GUID>`
/// (user) into its components.
pub fn parse_folder_key(name: &str) -> Result<SavegameFolderKey> {
    let tokens = name.split('_').collect::<Vec<_>>();

    match tokens.as_slice() {
        ["m", guid] => Ok(SavegameFolderKey {
            xuid: "0".to_owned(),
            title_guid: (*guid).to_owned(),
        }),
        ["u", xuid, guid] => Ok(SavegameFolderKey {
            xuid: (*xuid).to_owned(),
            title_guid: (*guid).to_owned(),
        }),
        ["m" | "u", ..] => Err(Error::MalformedFolderName(name.to_owned())),
        _ => Err(Error::UnknownSaveType(name.to_owned())),
    }
}

/// Directory or file name used for GUID-named savegame items.
pub fn guid_file_name(guid: &Uuid) -> String {
    format!("{{{guid:X}}}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SaveType {
    User,
    Machine,
    Unknown(u32),
}

impl From<u32> for SaveType {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::User,
            5 => Self::Machine,
            v => Self::Unknown(v),
        }
    }
}

impl SaveType {
    pub fn to_raw(self) -> u32 {
        match self {
            Self::User => 1,
            Self::Machine => 5,
            Self::Unknown(v) => v,
        }
    }
}

impl fmt::Display for SaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Machine => f.write_str("machine"),
            Self::Unknown(v) => write!(f, "unknown ({v:#x})"),
        }
    }
}

/// A single save listed in `containers.index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerIdxEntry {
    pub filename: String,
    pub filename_alt: String,
    pub text: String,
    /// Suffix of the `container.<N>` blob in the folder GUID directory.
    pub blob_number: u8,
    pub save_type: SaveType,
    pub folder_guid: Uuid,
    pub filetime: FileTime,
    pub reserved: u64,
    /// Size of the save data. A size of 0 means no blob exists on disk.
    pub filesize: u32,
    pub reserved2: u32,
}

impl ContainerIdxEntry {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        Ok(Self {
            filename: reader.read_utf16("entry filename")?,
            filename_alt: reader.read_utf16("entry filename_alt")?,
            text: reader.read_utf16("entry text")?,
            blob_number: reader.read_u8("entry blob_number")?,
            save_type: reader.read_u32("entry save_type")?.into(),
            folder_guid: reader.read_guid("entry folder_guid")?,
            filetime: reader.read_filetime("entry filetime")?,
            reserved: reader.read_u64("entry reserved")?,
            filesize: reader.read_u32("entry filesize")?,
            reserved2: reader.read_u32("entry reserved2")?,
        })
    }

    pub fn has_data(&self) -> bool {
        self.filesize != 0
    }

    /// Path of the blob relative to the savegame folder.
    pub fn blob_path(&self) -> PathBuf {
        let mut path = PathBuf::from(guid_file_name(&self.folder_guid));
        path.push(format!("container.{}", self.blob_number));
        path
    }

    /// Path of the data file referenced by `blob`, relative to the savegame
    /// folder.
    pub fn data_path(&self, blob: &ContainerBlob) -> PathBuf {
        let mut path = PathBuf::from(guid_file_name(&self.folder_guid));
        path.push(guid_file_name(&blob.file_guid));
        path
    }
}

/// Decoded `containers.index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerIndex {
    pub index_type: u32,
    pub name: String,
    pub aum_id: String,
    pub filetime: FileTime,
    pub reserved: u32,
    pub id: String,
    /// The on-disk file count always equals the length of this list.
    pub files: Vec<ContainerIdxEntry>,
}

impl ContainerIndex {
    /// Decode an index. The declared file count is checked against the
    /// remaining input before any entries are read.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(data);

        let index_type = reader.read_u32("index type")?;
        let file_count = reader.read_u32("index file_count")?;
        let name = reader.read_utf16("index name")?;
        let aum_id = reader.read_utf16("index aum_id")?;
        let filetime = reader.read_filetime("index filetime")?;
        let reserved = reader.read_u32("index reserved")?;
        let id = reader.read_utf16("index id")?;

        reader.ensure("index entries", u64::from(file_count) * MIN_ENTRY_SIZE)?;

        let files = (0..file_count)
            .map(|_| ContainerIdxEntry::parse(&mut reader))
            .collect::<Result<Vec<_>>>()?;

        if reader.remaining() != 0 {
            debug!("Ignoring {} trailing bytes in index", reader.remaining());
        }

        debug!("Parsed index {name:?} ({aum_id}) with {file_count} entries");

        Ok(Self {
            index_type,
            name,
            aum_id,
            filetime,
            reserved,
            id,
            files,
        })
    }

    /// Entries that have a blob on disk.
    pub fn entries_with_data(&self) -> impl Iterator<Item = &ContainerIdxEntry> {
        self.files.iter().filter(|e| e.has_data())
    }
}

/// Shorthand for [`ContainerIndex::parse`].
pub fn parse_index(data: &[u8]) -> Result<ContainerIndex> {
    ContainerIndex::parse(data)
}

impl<R: Read> FromReader<R> for ContainerIndex {
    type Error = Error;

    fn from_reader(reader: R) -> Result<Self> {
        let mut data = vec![];
        reader
            .take(MAX_INDEX_SIZE)
            .read_to_end(&mut data)
            .map_err(|e| Error::DataRead("index", e))?;

        Self::parse(&data)
    }
}

impl<W: Write> ToWriter<W> for ContainerIndex {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        let file_count =
            u32::try_from(self.files.len()).map_err(|_| Error::TooManyEntries(self.files.len()))?;

        let mut buf = vec![];
        buf.write_u32_le(self.index_type)
            .and_then(|_| buf.write_u32_le(file_count))
            .map_err(|e| Error::DataWrite("index header", e))?;
        buf.extend(primitive::encode_utf16("index name", &self.name)?);
        buf.extend(primitive::encode_utf16("index aum_id", &self.aum_id)?);
        buf.write_filetime(self.filetime)
            .and_then(|_| buf.write_u32_le(self.reserved))
            .map_err(|e| Error::DataWrite("index header", e))?;
        buf.extend(primitive::encode_utf16("index id", &self.id)?);

        for entry in &self.files {
            buf.extend(primitive::encode_utf16("entry filename", &entry.filename)?);
            buf.extend(primitive::encode_utf16("entry filename_alt", &entry.filename_alt)?);
            buf.extend(primitive::encode_utf16("entry text", &entry.text)?);
            buf.write_u8(entry.blob_number)
                .and_then(|_| buf.write_u32_le(entry.save_type.to_raw()))
                .and_then(|_| buf.write_guid(&entry.folder_guid))
                .and_then(|_| buf.write_filetime(entry.filetime))
                .and_then(|_| buf.write_u64_le(entry.reserved))
                .and_then(|_| buf.write_u32_le(entry.filesize))
                .and_then(|_| buf.write_u32_le(entry.reserved2))
                .map_err(|e| Error::DataWrite("entry", e))?;
        }

        writer
            .write_all(&buf)
            .map_err(|e| Error::DataWrite("index", e))
    }
}

/// Raw on-disk layout for a `container.<N>` blob.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawContainerBlob {
    reserved1: little_endian::U32,
    reserved2: little_endian::U32,
    /// Magic value. This should be equal to [`BLOB_MAGIC`].
    magic: [u8; 8],
    payload: [u8; 0x88],
    file_guid: RawGuid,
}

const _: () = assert!(mem::size_of::<RawContainerBlob>() == BLOB_SIZE);

/// Header of a `container.<N>` file. The magic is not validated during
/// parsing. Use [`Self::has_valid_magic`] to check it.
#[derive(Clone, PartialEq, Eq)]
pub struct ContainerBlob {
    pub reserved1: u32,
    pub reserved2: u32,
    pub magic: [u8; 8],
    pub payload: [u8; 0x88],
    /// Name of the data file in the folder GUID directory.
    pub file_guid: Uuid,
}

impl fmt::Debug for ContainerBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBlob")
            .field("reserved1", &self.reserved1)
            .field("reserved2", &self.reserved2)
            .field("magic", &self.magic.as_bstr())
            .field("payload", &hex::encode(self.payload))
            .field("file_guid", &self.file_guid)
            .finish()
    }
}

impl ContainerBlob {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (raw, _) =
            RawContainerBlob::read_from_prefix(data).map_err(|_| Error::TruncatedInput {
                field: "blob",
                needed: BLOB_SIZE as u64,
                available: data.len() as u64,
            })?;

        let blob = Self {
            reserved1: raw.reserved1.get(),
            reserved2: raw.reserved2.get(),
            magic: raw.magic,
            payload: raw.payload,
            file_guid: raw.file_guid.get(),
        };

        if !blob.has_valid_magic() {
            warn!("Unexpected blob magic: {:?}", blob.magic.as_bstr());
        }

        Ok(blob)
    }

    pub fn has_valid_magic(&self) -> bool {
        &self.magic == BLOB_MAGIC
    }
}

/// Shorthand for [`ContainerBlob::parse`].
pub fn parse_blob(data: &[u8]) -> Result<ContainerBlob> {
    ContainerBlob::parse(data)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample_entry(filesize: u32) -> ContainerIdxEntry {
        ContainerIdxEntry {
            filename: "Slot1".to_owned(),
            filename_alt: String::new(),
            text: "Profile".to_owned(),
            blob_number: 3,
            save_type: SaveType::User,
            folder_guid: Uuid::from_u128(0x1a2b3c4d_5e6f_7a80_90a1_b2c3d4e5f607),
            filetime: FileTime(131_000_000_000_000_007),
            reserved: 0,
            filesize,
            reserved2: 0,
        }
    }

    #[test]
    fn folder_keys() {
        assert_eq!(
            parse_folder_key("m_1A2B3C4D-0000-0000-0000-000000000000").unwrap(),
            SavegameFolderKey {
                xuid: "0".to_owned(),
                title_guid: "1A2B3C4D-0000-0000-0000-000000000000".to_owned(),
            },
        );

        let key = parse_folder_key("u_001234_1A2B3C4D").unwrap();
        assert_eq!(key.xuid, "001234");
        assert_eq!(key.title_guid, "1A2B3C4D");
        assert!(!key.is_machine());

        assert_matches!(parse_folder_key("x_foo"), Err(Error::UnknownSaveType(_)));
        assert_matches!(parse_folder_key("foo"), Err(Error::UnknownSaveType(_)));
        assert_matches!(parse_folder_key("u_1234"), Err(Error::MalformedFolderName(_)));
        assert_matches!(parse_folder_key("m_a_b"), Err(Error::MalformedFolderName(_)));
    }

    #[test]
    fn save_types() {
        assert_eq!(SaveType::from(1), SaveType::User);
        assert_eq!(SaveType::from(5), SaveType::Machine);
        assert_eq!(SaveType::from(2), SaveType::Unknown(2));
        assert_eq!(SaveType::Unknown(2).to_raw(), 2);
    }

    #[test]
    fn entry_paths() {
        let entry = sample_entry(1);
        let blob = ContainerBlob {
            reserved1: 0,
            reserved2: 0,
            magic: *BLOB_MAGIC,
            payload: [0; 0x88],
            file_guid: Uuid::from_u128(0xabcdef),
        };

        assert_eq!(
            entry.blob_path(),
            PathBuf::from("{1A2B3C4D-5E6F-7A80-90A1-B2C3D4E5F607}").join("container.3"),
        );
        assert_eq!(
            entry.data_path(&blob),
            PathBuf::from("{1A2B3C4D-5E6F-7A80-90A1-B2C3D4E5F607}")
                .join("{00000000-0000-0000-0000-000000ABCDEF}"),
        );
    }

    #[test]
    fn blob_magic_not_enforced() {
        let mut data = [0u8; BLOB_SIZE];
        data[8..16].copy_from_slice(b"Nope\0\0\0\0");
        data[152] = 0x01;

        let blob = ContainerBlob::parse(&data).unwrap();
        assert!(!blob.has_valid_magic());
        assert_eq!(blob.file_guid, Uuid::from_u128(1 << 96));

        data[8..16].copy_from_slice(BLOB_MAGIC);
        assert!(ContainerBlob::parse(&data).unwrap().has_valid_magic());

        assert_matches!(
            parse_blob(&data[..BLOB_SIZE - 1]),
            Err(Error::TruncatedInput {
                needed: 168,
                available: 167,
                ..
            })
        );
    }

    #[test]
    fn index_entries_with_data() {
        let index = ContainerIndex {
            index_type: 0xe,
            name: "Title".to_owned(),
            aum_id: "Title_8wekyb3d8bbwe!App".to_owned(),
            filetime: FileTime(0),
            reserved: 1,
            id: "id".to_owned(),
            files: vec![sample_entry(0), sample_entry(10), sample_entry(0)],
        };

        assert_eq!(index.entries_with_data().count(), 1);

        let mut data = vec![];
        index.to_writer(&mut data).unwrap();
        assert_eq!(parse_index(&data).unwrap(), index);
    }

    #[test]
    fn index_file_count_bounds() {
        let mut data = vec![];
        data.extend(0u32.to_le_bytes());
        data.extend(u32::MAX.to_le_bytes());
        data.extend([0u8; 4 * 2 + 8 + 4 + 4]);

        assert_matches!(
            parse_index(&data),
            Err(Error::TruncatedInput {
                field: "index entries",
                available: 0,
                ..
            })
        );
    }
}
