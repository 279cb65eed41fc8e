// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{io, sync::atomic::AtomicBool};

use assert_matches::assert_matches;
use durango::{
    format::{
        nand::{DumpType, Error, FLASH_SIZE_LOGICAL, FLASH_SIZE_PHYSICAL, NandImage},
        xbfs::{FileEntry, XBFS_BLOCK_SIZE, XBFS_FILE_COUNT, XbfsTable, slot_for_filename},
    },
    stream::{FileLen, ReadAt, ToWriter},
};
use uuid::Uuid;

/// A mostly-empty flash image where only a few regions contain data.
struct SparseImage {
    size: u64,
    chunks: Vec<(u64, Vec<u8>)>,
}

impl SparseImage {
    fn new(size: u64) -> Self {
        Self {
            size,
            chunks: vec![],
        }
    }

    fn write(&mut self, offset: u64, data: Vec<u8>) {
        self.chunks.push((offset, data));
    }

    fn write_table(&mut self, offset: u64, table: &XbfsTable) {
        let mut data = vec![];
        table.to_writer(&mut data).unwrap();
        self.write(offset, data);
    }
}

impl FileLen for SparseImage {
    fn file_len(&self) -> io::Result<u64> {
        Ok(self.size)
    }
}

impl ReadAt for SparseImage {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }

        let n = buf.len().min((self.size - offset) as usize);
        let buf = &mut buf[..n];
        buf.fill(0);

        let end = offset + n as u64;

        for (chunk_offset, data) in &self.chunks {
            let chunk_end = chunk_offset + data.len() as u64;
            let start = offset.max(*chunk_offset);
            let stop = end.min(chunk_end);

            if start < stop {
                buf[(start - offset) as usize..(stop - offset) as usize].copy_from_slice(
                    &data[(start - chunk_offset) as usize..(stop - chunk_offset) as usize],
                );
            }
        }

        Ok(n)
    }
}

fn table(sequence_version: u8, files: &[(&str, u32, u32)]) -> XbfsTable {
    let mut entries = [FileEntry::default(); XBFS_FILE_COUNT];
    for &(name, block_offset, block_count) in files {
        entries[slot_for_filename(name).unwrap()] = FileEntry {
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
        files: entries,
        padding: [0; 544],
        guid: Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef),
        hash: [0; 32],
        hash_valid: false,
    };
    table.update_hash();
    table
}

fn pattern(len: u64, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Two tables with an empty slot in between. The newer one relocates
/// `update.cfg` and adds `system.xvd`.
fn sample_image() -> SparseImage {
    let mut image = SparseImage::new(FLASH_SIZE_LOGICAL);
    image.write_table(0x10000, &table(3, &[("update.cfg", 0x900, 1)]));
    image.write_table(
        0x820000,
        &table(4, &[("update.cfg", 0x901, 2), ("system.xvd", 0x1000, 10)]),
    );
    image.write(0x900 * XBFS_BLOCK_SIZE, pattern(XBFS_BLOCK_SIZE, 1));
    image.write(0x901 * XBFS_BLOCK_SIZE, pattern(2 * XBFS_BLOCK_SIZE, 2));
    image
}

#[test]
fn load_tables() {
    let source = sample_image();
    let image = NandImage::parse(&source).unwrap();

    assert_eq!(image.dump_type(), DumpType::RawLogical);
    assert_eq!(image.total_blocks(), FLASH_SIZE_LOGICAL / XBFS_BLOCK_SIZE);
    assert_eq!(
        image.tables().iter().map(|t| t.offset).collect::<Vec<_>>(),
        [0x10000, 0x820000],
    );
    assert_eq!(image.sequences().collect::<Vec<_>>(), [3, 4]);
    assert_eq!(image.latest_sequence(), 4);
    assert_eq!(image.latest_table().offset, 0x820000);
    assert_eq!(image.table_by_sequence(3).unwrap().offset, 0x10000);
    assert!(image.table_by_sequence(5).is_none());
    assert!(image.tables().iter().all(|t| t.table.hash_valid));
}

#[test]
fn block_usage() {
    let source = sample_image();
    let image = NandImage::parse(&source).unwrap();

    assert_eq!(image.used_block_count(), 13);
    assert_eq!(image.free_block_count(), image.total_blocks() - 13);

    let summary = image.summary();
    assert_eq!(summary.used_blocks, 13);
    assert_eq!(summary.used_blocks + summary.free_blocks, summary.total_blocks);
}

#[test]
fn read_and_extract_files() {
    let source = sample_image();
    let image = NandImage::parse(&source).unwrap();
    let cancel_signal = AtomicBool::new(false);

    let old = &image.table_by_sequence(3).unwrap().table;
    let new = &image.latest_table().table;

    assert_eq!(
        image.read_file(&source, old, "update.cfg").unwrap(),
        pattern(XBFS_BLOCK_SIZE, 1),
    );
    assert_eq!(
        image.read_file(&source, new, "update.cfg").unwrap(),
        pattern(2 * XBFS_BLOCK_SIZE, 2),
    );

    let mut extracted = vec![];
    image
        .extract_file(&source, new, "update.cfg", &mut extracted, &cancel_signal)
        .unwrap();
    assert_eq!(extracted, pattern(2 * XBFS_BLOCK_SIZE, 2));

    // Unwritten regions read back as zeros.
    let system = image.read_file(&source, new, "system.xvd").unwrap();
    assert_eq!(system.len() as u64, 10 * XBFS_BLOCK_SIZE);
    assert!(system.iter().all(|b| *b == 0));
}

#[test]
fn missing_files() {
    let source = sample_image();
    let image = NandImage::parse(&source).unwrap();
    let table = &image.latest_table().table;

    assert_matches!(
        image.read_file(&source, table, "host.xvd"),
        Err(Error::NotPresent(n)) if n == "host.xvd"
    );
    assert_matches!(
        image.read_file(&source, table, "nonexistent.bin"),
        Err(Error::NotPresent(_))
    );
}

#[test]
fn file_outside_image() {
    let mut source = SparseImage::new(FLASH_SIZE_LOGICAL);
    let total_blocks = (FLASH_SIZE_LOGICAL / XBFS_BLOCK_SIZE) as u32;
    source.write_table(0x10000, &table(1, &[("boot.bin", total_blocks - 1, 2)]));

    let image = NandImage::parse(&source).unwrap();
    let table = &image.latest_table().table;

    assert_matches!(
        image.read_file(&source, table, "boot.bin"),
        Err(Error::OutOfBounds(n, _)) if n == "boot.bin"
    );
}

#[test]
fn cancel_extraction() {
    let source = sample_image();
    let image = NandImage::parse(&source).unwrap();
    let cancel_signal = AtomicBool::new(true);

    let result = image.extract_file(
        &source,
        &image.latest_table().table,
        "update.cfg",
        io::sink(),
        &cancel_signal,
    );

    assert_matches!(
        result,
        Err(Error::FileRead(_, e)) if e.kind() == io::ErrorKind::Interrupted
    );
}

#[test]
fn tampered_hash() {
    let mut source = SparseImage::new(FLASH_SIZE_PHYSICAL);
    let mut tampered = table(7, &[("boot.bin", 0x20, 1)]);
    tampered.layout_version += 1;
    source.write_table(0x810000, &tampered);

    let image = NandImage::parse(&source).unwrap();

    assert_eq!(image.dump_type(), DumpType::RawPhysical);
    assert_eq!(image.tables().len(), 1);
    assert!(!image.latest_table().table.hash_valid);
    assert_eq!(image.latest_sequence(), 7);
}

#[test]
fn sequence_wraparound() {
    let mut source = SparseImage::new(FLASH_SIZE_LOGICAL);
    source.write_table(0x10000, &table(255, &[]));
    source.write_table(0x810000, &table(0, &[]));
    source.write_table(0x820000, &table(254, &[]));

    let image = NandImage::parse(&source).unwrap();

    assert_eq!(image.latest_sequence(), 0);
    assert_eq!(image.latest_table().offset, 0x810000);
    assert_eq!(image.used_block_count(), 0);
}

#[test]
fn invalid_images() {
    assert_matches!(
        NandImage::parse(vec![0u8; 1024]),
        Err(Error::InvalidSize(1024))
    );
    assert_matches!(
        NandImage::parse(SparseImage::new(FLASH_SIZE_LOGICAL - XBFS_BLOCK_SIZE)),
        Err(Error::InvalidSize(_))
    );
    assert_matches!(
        NandImage::parse(SparseImage::new(FLASH_SIZE_LOGICAL)),
        Err(Error::NoValidTable)
    );
}
