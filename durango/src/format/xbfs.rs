// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Xbox Boot File System table. A 1024-byte header lists the fixed set of
//! firmware files stored on the NAND along with their locations in 4 KiB
//! blocks.

use std::{
    fmt,
    io::{self, Read, Write},
    mem,
    ops::Range,
};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::primitive::RawGuid,
    stream::{ByteRegion, FromReader, ReadFixedSizeExt, ToWriter},
};

/// Magic value for [`RawXbfsHeader::magic`]. This is `XBFS` reversed.
pub const XBFS_MAGIC: &[u8; 4] = b"SFBX";

pub const XBFS_HEADER_SIZE: usize = 1024;

const XBFS_HASH_SIZE: usize = 32;

/// Number of bytes covered by [`RawXbfsHeader::hash`].
const XBFS_HASHED_SIZE: usize = XBFS_HEADER_SIZE - XBFS_HASH_SIZE;

/// Unit for [`FileEntry::block_offset`] and [`FileEntry::block_count`].
pub const XBFS_BLOCK_SIZE: u64 = 0x1000;

pub const XBFS_FILE_COUNT: usize = 25;

/// Names of the files described by each slot of the file table.
pub const XBFS_FILENAMES: [&str; XBFS_FILE_COUNT] = [
    // 1st stage SMC bootloader (slot A).
    "1smcbl_a.bin",
    "header.bin",
    "devkit.ini",
    "mtedata.cfg",
    "certkeys.bin",
    "smcerr.log",
    // SystemOS.
    "system.xvd",
    "$sosrst.xvd",
    "download.xvd",
    // Signed configs.
    "smc_s.cfg",
    "sp_s.cfg",
    "os_s.cfg",
    // Decrypted configs.
    "smc_d.cfg",
    "sp_d.cfg",
    "os_d.cfg",
    "smcfw.bin",
    "boot.bin",
    // HostOS.
    "host.xvd",
    "settings.xvd",
    // 1st stage SMC bootloader (slot B).
    "1smcbl_b.bin",
    "bootanim.dat",
    "sostmpl.xvd",
    "update.cfg",
    "sosinit.xvd",
    "hwinit.cfg",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Truncated XBFS header: need {needed} bytes, but have {available}")]
    TruncatedInput { needed: usize, available: usize },
    #[error("Not an XBFS header: {:?}", .0.as_bstr())]
    NotXbfs([u8; 4]),
    #[error("Failed to read XBFS data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write XBFS data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Slot index of a known filename.
pub fn slot_for_filename(name: &str) -> Option<usize> {
    XBFS_FILENAMES.iter().position(|n| *n == name)
}

/// Raw on-disk layout for a file table entry.
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawFileEntry {
    block_offset: little_endian::U32,
    block_count: little_endian::U32,
    unknown: little_endian::U64,
}

/// Raw on-disk layout for the XBFS header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawXbfsHeader {
    /// Magic value. This should be equal to [`XBFS_MAGIC`].
    magic: [u8; 4],
    format_version: u8,
    sequence_version: u8,
    layout_version: little_endian::U16,
    reserved: [little_endian::U64; 3],
    files: [RawFileEntry; XBFS_FILE_COUNT],
    padding: [u8; 544],
    guid: RawGuid,
    /// SHA-256 digest of all preceding bytes.
    hash: [u8; XBFS_HASH_SIZE],
}

const _: () = assert!(mem::size_of::<RawXbfsHeader>() == XBFS_HEADER_SIZE);
const _: () = assert!(mem::offset_of!(RawXbfsHeader, files) == 0x20);
const _: () = assert!(mem::offset_of!(RawXbfsHeader, guid) == 0x3d0);
const _: () = assert!(mem::offset_of!(RawXbfsHeader, hash) == XBFS_HASHED_SIZE);

/// Location of a file. Both fields are in units of [`XBFS_BLOCK_SIZE`]. A
/// block count of 0 means that the file is not present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileEntry {
    pub block_offset: u32,
    pub block_count: u32,
    pub unknown: u64,
}

impl FileEntry {
    pub fn is_present(&self) -> bool {
        self.block_count != 0
    }

    /// Half-open range of blocks occupied by the file.
    pub fn block_range(&self) -> Range<u64> {
        let start = u64::from(self.block_offset);
        start..start + u64::from(self.block_count)
    }

    /// Byte location of the file within the flash image.
    pub fn byte_region(&self) -> ByteRegion {
        ByteRegion::new(
            u64::from(self.block_offset) * XBFS_BLOCK_SIZE,
            u64::from(self.block_count) * XBFS_BLOCK_SIZE,
        )
    }
}

impl From<&RawFileEntry> for FileEntry {
    fn from(raw: &RawFileEntry) -> Self {
        Self {
            block_offset: raw.block_offset.get(),
            block_count: raw.block_count.get(),
            unknown: raw.unknown.get(),
        }
    }
}

impl From<&FileEntry> for RawFileEntry {
    fn from(entry: &FileEntry) -> Self {
        Self {
            block_offset: entry.block_offset.into(),
            block_count: entry.block_count.into(),
            unknown: entry.unknown.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct XbfsTable {
    pub format_version: u8,
    /// Incremented every time the table is rewritten. Wraps from 255 to 0.
    pub sequence_version: u8,
    pub layout_version: u16,
    pub reserved: [u64; 3],
    pub files: [FileEntry; XBFS_FILE_COUNT],
    pub padding: [u8; 544],
    pub guid: Uuid,
    pub hash: [u8; XBFS_HASH_SIZE],
    /// Whether [`Self::hash`] matched the header contents when parsed. A
    /// mismatch does not prevent the table from being used.
    pub hash_valid: bool,
}

impl fmt::Debug for XbfsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XbfsTable")
            .field("format_version", &self.format_version)
            .field("sequence_version", &self.sequence_version)
            .field("layout_version", &self.layout_version)
            .field("reserved", &self.reserved)
            .field("files", &self.files)
            .field("padding", &hex::encode(self.padding))
            .field("guid", &self.guid)
            .field("hash", &hex::encode(self.hash))
            .field("hash_valid", &self.hash_valid)
            .finish()
    }
}

impl XbfsTable {
    /// Parse a header from the first [`XBFS_HEADER_SIZE`] bytes of `data`.
    /// [`Error::NotXbfs`] is returned if the magic does not match so that
    /// callers can move on to the next candidate location.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (raw, _) =
            RawXbfsHeader::read_from_prefix(data).map_err(|_| Error::TruncatedInput {
                needed: XBFS_HEADER_SIZE,
                available: data.len(),
            })?;

        if &raw.magic != XBFS_MAGIC {
            return Err(Error::NotXbfs(raw.magic));
        }

        let hash_valid = raw.hash == sha256(&raw.as_bytes()[..XBFS_HASHED_SIZE]);
        if !hash_valid {
            warn!(
                "XBFS table with sequence {} has an invalid hash",
                raw.sequence_version,
            );
        }

        Ok(Self {
            format_version: raw.format_version,
            sequence_version: raw.sequence_version,
            layout_version: raw.layout_version.get(),
            reserved: raw.reserved.map(|r| r.get()),
            files: raw.files.each_ref().map(FileEntry::from),
            padding: raw.padding,
            guid: raw.guid.get(),
            hash: raw.hash,
            hash_valid,
        })
    }

    fn to_raw(&self) -> RawXbfsHeader {
        RawXbfsHeader {
            magic: *XBFS_MAGIC,
            format_version: self.format_version,
            sequence_version: self.sequence_version,
            layout_version: self.layout_version.into(),
            reserved: self.reserved.map(little_endian::U64::new),
            files: self.files.each_ref().map(RawFileEntry::from),
            padding: self.padding,
            guid: self.guid.into(),
            hash: self.hash,
        }
    }

    /// Compute the digest that [`Self::hash`] should contain.
    pub fn compute_hash(&self) -> [u8; XBFS_HASH_SIZE] {
        sha256(&self.to_raw().as_bytes()[..XBFS_HASHED_SIZE])
    }

    /// Recompute [`Self::hash`] after the table has been modified.
    pub fn update_hash(&mut self) {
        self.hash = self.compute_hash();
        self.hash_valid = true;
    }

    /// Look up a file by name. [`None`] is returned both for names that are
    /// not part of the file table and for files that are not present.
    pub fn entry_for_filename(&self, name: &str) -> Option<&FileEntry> {
        slot_for_filename(name)
            .map(|i| &self.files[i])
            .filter(|e| e.is_present())
    }

    /// Files that are present, in slot order.
    pub fn files(&self) -> impl Iterator<Item = (&'static str, &FileEntry)> {
        XBFS_FILENAMES
            .iter()
            .zip(&self.files)
            .filter(|(_, e)| e.is_present())
            .map(|(n, e)| (*n, e))
    }
}

impl<R: Read> FromReader<R> for XbfsTable {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let data = reader
            .read_vec_up_to(XBFS_HEADER_SIZE)
            .map_err(|e| Error::DataRead("header", e))?;

        Self::parse(&data)
    }
}

impl<W: Write> ToWriter<W> for XbfsTable {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer
            .write_all(self.to_raw().as_bytes())
            .map_err(|e| Error::DataWrite("header", e))
    }
}

fn sha256(data: &[u8]) -> [u8; XBFS_HASH_SIZE] {
    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    let mut result = [0u8; XBFS_HASH_SIZE];
    result.copy_from_slice(digest.as_ref());
    result
}
