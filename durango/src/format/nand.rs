// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Write},
    ops::Range,
    sync::atomic::AtomicBool,
};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::debug;

use crate::{
    format::xbfs::{self, XBFS_BLOCK_SIZE, XBFS_HEADER_SIZE, XbfsTable},
    stream::{ByteRegion, ReadAt},
};

/// Size of a dump of the logical flash contents.
pub const FLASH_SIZE_LOGICAL: u64 = 0x13bc00000;
/// Size of a dump of the physical flash chip.
pub const FLASH_SIZE_PHYSICAL: u64 = 0x13c000000;

/// Locations where an XBFS table may be stored.
pub const XBFS_HEADER_OFFSETS: [u64; 3] = [0x10000, 0x810000, 0x820000];

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Invalid flash size: {0:#x} (expected {FLASH_SIZE_LOGICAL:#x} or {FLASH_SIZE_PHYSICAL:#x})"
    )]
    InvalidSize(u64),
    #[error("No valid XBFS table found")]
    NoValidTable,
    #[error("File is not present: {0:?}")]
    NotPresent(String),
    #[error("File {0:?} lies outside of the flash image: {1:?}")]
    OutOfBounds(String, ByteRegion),
    #[error("XBFS table at {0:#x} is invalid")]
    Xbfs(u64, #[source] xbfs::Error),
    #[error("Failed to read NAND data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to read file: {0:?}")]
    FileRead(String, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpType {
    RawLogical,
    RawPhysical,
}

impl DumpType {
    pub fn from_size(size: u64) -> Result<Self> {
        match size {
            FLASH_SIZE_LOGICAL => Ok(Self::RawLogical),
            FLASH_SIZE_PHYSICAL => Ok(Self::RawPhysical),
            s => Err(Error::InvalidSize(s)),
        }
    }

    pub fn size(self) -> u64 {
        match self {
            Self::RawLogical => FLASH_SIZE_LOGICAL,
            Self::RawPhysical => FLASH_SIZE_PHYSICAL,
        }
    }
}

impl fmt::Display for DumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawLogical => f.write_str("raw logical"),
            Self::RawPhysical => f.write_str("raw physical"),
        }
    }
}

/// An XBFS table and the offset it was found at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatedTable {
    pub offset: u64,
    pub table: XbfsTable,
}

/// Pick the newest sequence version. The counter is a single byte, so if both
/// 0 and 255 are present, 0 is treated as having wrapped around and is the
/// newest.
pub fn latest_sequence(sequences: impl IntoIterator<Item = u8>) -> Option<u8> {
    let mut has_zero = false;
    let mut max = None;

    for seq in sequences {
        has_zero |= seq == 0;
        max = max.max(Some(seq));
    }

    match max {
        Some(u8::MAX) if has_zero => Some(0),
        m => m,
    }
}

/// Count the blocks covered by the union of `ranges`.
fn union_len(mut ranges: Vec<Range<u64>>) -> u64 {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_unstable_by_key(|r| r.start);

    let mut total = 0;
    let mut current: Option<Range<u64>> = None;

    for range in ranges {
        current = match current {
            Some(c) if range.start <= c.end => Some(c.start..c.end.max(range.end)),
            Some(c) => {
                total += c.end - c.start;
                Some(range)
            }
            None => Some(range),
        };
    }

    if let Some(c) = current {
        total += c.end - c.start;
    }

    total
}

/// Block usage statistics for a flash image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NandSummary {
    pub dump_type: DumpType,
    pub size: u64,
    pub total_blocks: u64,
    pub used_blocks: u64,
    pub free_blocks: u64,
}

impl fmt::Display for NandSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MIB: u64 = 1024 * 1024;

        writeln!(f, "Dump type:   {}", self.dump_type)?;
        writeln!(f, "Block count: {:#x}", self.total_blocks)?;
        writeln!(f, "Total size:  {:#x} ({} MiB)", self.size, self.size / MIB)?;
        writeln!(
            f,
            "Blocks used: {:#x} ({} MiB)",
            self.used_blocks,
            self.used_blocks * XBFS_BLOCK_SIZE / MIB,
        )?;
        writeln!(
            f,
            "Blocks free: {:#x} ({} MiB)",
            self.free_blocks,
            self.free_blocks * XBFS_BLOCK_SIZE / MIB,
        )
    }
}

/// A parsed NAND dump. The backing source is not retained. Operations that
/// read file data take the source as a parameter.
#[derive(Clone, Debug)]
pub struct NandImage {
    dump_type: DumpType,
    /// Never empty.
    tables: Vec<LocatedTable>,
}

impl NandImage {
    /// Validate the size of `source` and load every XBFS table found at the
    /// known header offsets. Offsets without a table are skipped.
    pub fn parse(source: impl ReadAt) -> Result<Self> {
        let size = source
            .file_len()
            .map_err(|e| Error::DataRead("image size", e))?;
        let dump_type = DumpType::from_size(size)?;

        debug!("Flash image is {dump_type} ({size:#x} bytes)");

        let mut tables = vec![];

        for offset in XBFS_HEADER_OFFSETS {
            let mut buf = [0u8; XBFS_HEADER_SIZE];
            source
                .read_exact_at(&mut buf, offset)
                .map_err(|e| Error::DataRead("XBFS header", e))?;

            match XbfsTable::parse(&buf) {
                Ok(table) => {
                    debug!(
                        "Found XBFS table at {offset:#x} with sequence {}",
                        table.sequence_version,
                    );
                    tables.push(LocatedTable { offset, table });
                }
                Err(xbfs::Error::NotXbfs(magic)) => {
                    debug!("No XBFS table at {offset:#x}: {:?}", magic.as_bstr());
                }
                Err(e) => return Err(Error::Xbfs(offset, e)),
            }
        }

        if tables.is_empty() {
            return Err(Error::NoValidTable);
        }

        Ok(Self { dump_type, tables })
    }

    pub fn dump_type(&self) -> DumpType {
        self.dump_type
    }

    pub fn size(&self) -> u64 {
        self.dump_type.size()
    }

    pub fn total_blocks(&self) -> u64 {
        self.size() / XBFS_BLOCK_SIZE
    }

    /// All tables in the order of their location in the image.
    pub fn tables(&self) -> &[LocatedTable] {
        &self.tables
    }

    pub fn sequences(&self) -> impl Iterator<Item = u8> + '_ {
        self.tables.iter().map(|t| t.table.sequence_version)
    }

    pub fn latest_sequence(&self) -> u8 {
        // The list of tables is never empty.
        latest_sequence(self.sequences()).unwrap_or_default()
    }

    /// Find the first table with the specified sequence version.
    pub fn table_by_sequence(&self, sequence: u8) -> Option<&LocatedTable> {
        self.tables
            .iter()
            .find(|t| t.table.sequence_version == sequence)
    }

    pub fn latest_table(&self) -> &LocatedTable {
        self.table_by_sequence(self.latest_sequence())
            .unwrap_or(&self.tables[0])
    }

    /// Number of blocks referenced by any file in any table. Blocks shared by
    /// multiple tables are only counted once.
    pub fn used_block_count(&self) -> u64 {
        let ranges = self
            .tables
            .iter()
            .flat_map(|t| t.table.files.iter())
            .map(|e| e.block_range())
            .collect();

        union_len(ranges)
    }

    pub fn free_block_count(&self) -> u64 {
        self.total_blocks().saturating_sub(self.used_block_count())
    }

    pub fn summary(&self) -> NandSummary {
        let used_blocks = self.used_block_count();

        NandSummary {
            dump_type: self.dump_type,
            size: self.size(),
            total_blocks: self.total_blocks(),
            used_blocks,
            free_blocks: self.total_blocks().saturating_sub(used_blocks),
        }
    }

    fn file_region(&self, table: &XbfsTable, name: &str) -> Result<ByteRegion> {
        let entry = table
            .entry_for_filename(name)
            .ok_or_else(|| Error::NotPresent(name.to_owned()))?;
        let region = entry.byte_region();

        if !region.fits_within(self.size()) {
            return Err(Error::OutOfBounds(name.to_owned(), region));
        }

        Ok(region)
    }

    /// Read the entire contents of a file into memory.
    pub fn read_file(
        &self,
        source: impl ReadAt,
        table: &XbfsTable,
        name: &str,
    ) -> Result<Vec<u8>> {
        let region = self.file_region(table, name)?;

        region
            .read(source)
            .map_err(|e| Error::FileRead(name.to_owned(), e))
    }

    /// Stream the contents of a file to `writer`.
    pub fn extract_file(
        &self,
        source: impl ReadAt,
        table: &XbfsTable,
        name: &str,
        writer: impl Write,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        let region = self.file_region(table, name)?;

        region
            .copy_to(source, writer, cancel_signal)
            .map_err(|e| Error::FileRead(name.to_owned(), e))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uuid::Uuid;

    use crate::format::xbfs::{FileEntry, XBFS_FILE_COUNT};

    use super::*;

    fn table(sequence_version: u8, ranges: &[(usize, u32, u32)]) -> LocatedTable {
        let mut files = [FileEntry::default(); XBFS_FILE_COUNT];
        for &(slot, block_offset, block_count) in ranges {
            files[slot] = FileEntry {
                block_offset,
                block_count,
                unknown: 0,
            };
        }

        let mut table = XbfsTable {
            format_version: 1,
            sequence_version,
            layout_version: 3,
            reserved: [0; 3],
            files,
            padding: [0; 544],
            guid: Uuid::nil(),
            hash: [0; 32],
            hash_valid: false,
        };
        table.update_hash();

        LocatedTable {
            offset: XBFS_HEADER_OFFSETS[0],
            table,
        }
    }

    #[test]
    fn sequence_wraparound() {
        assert_eq!(latest_sequence([0, 255]), Some(0));
        assert_eq!(latest_sequence([0, 1, 255]), Some(0));
        assert_eq!(latest_sequence([255, 2, 1, 0]), Some(0));
        assert_eq!(latest_sequence([5, 9, 200]), Some(200));
        assert_eq!(latest_sequence([254, 255]), Some(255));
        assert_eq!(latest_sequence([0]), Some(0));
        assert_eq!(latest_sequence([0u8; 0]), None);
    }

    #[test]
    fn dump_types() {
        assert_eq!(
            DumpType::from_size(0x13bc00000).unwrap(),
            DumpType::RawLogical,
        );
        assert_eq!(
            DumpType::from_size(0x13c000000).unwrap(),
            DumpType::RawPhysical,
        );
        assert_matches!(
            DumpType::from_size(0x13c000001),
            Err(Error::InvalidSize(0x13c000001))
        );
    }

    #[test]
    fn block_union() {
        assert_eq!(union_len(vec![]), 0);
        assert_eq!(union_len(vec![100..110, 100..110, 200..205]), 15);
        assert_eq!(union_len(vec![0..10, 5..15, 15..20, 30..30]), 20);
        assert_eq!(union_len(vec![50..60, 0..100]), 100);
    }

    #[test]
    fn usage_across_tables() {
        let image = NandImage {
            dump_type: DumpType::RawLogical,
            tables: vec![
                table(1, &[(0, 100, 10), (1, 200, 5)]),
                table(2, &[(0, 100, 10)]),
            ],
        };

        assert_eq!(image.used_block_count(), 15);
        assert_eq!(image.total_blocks(), 0x13bc00);
        assert_eq!(image.free_block_count(), 0x13bc00 - 15);

        let summary = image.summary();
        assert_eq!(summary.used_blocks, 15);
        assert_eq!(summary.free_blocks, image.free_block_count());
    }

    #[test]
    fn latest_table_selection() {
        let image = NandImage {
            dump_type: DumpType::RawPhysical,
            tables: vec![table(255, &[]), table(0, &[]), table(254, &[])],
        };

        assert_eq!(image.latest_sequence(), 0);
        assert_eq!(image.latest_table().table.sequence_version, 0);
        assert!(image.table_by_sequence(254).is_some());
        assert!(image.table_by_sequence(3).is_none());
        assert_eq!(image.sequences().collect::<Vec<_>>(), [255, 0, 254]);
    }
}
