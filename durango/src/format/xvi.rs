// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Write},
    mem,
};

use bstr::ByteSlice;
use thiserror::Error;
use uuid::Uuid;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::primitive::RawGuid,
    stream::{FromReader, ReadFixedSizeExt, ToWriter},
};

/// Magic value for [`RawXviHeader::magic`].
pub const XVI_MAGIC: &[u8; 8] = b"crdi-xvc";

pub const XVI_HEADER_SIZE: usize = 0x270;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Truncated XVI header: need {needed} bytes, but have {available}")]
    TruncatedInput { needed: usize, available: usize },
    #[error("Invalid XVI magic: {:?}", .0.as_bstr())]
    InvalidMagic([u8; 8]),
    #[error("Failed to read XVI data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write XVI data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the header of an `.xvi` sidecar file.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawXviHeader {
    /// Magic value. This should be equal to [`XVI_MAGIC`].
    magic: [u8; 8],
    unknown1: [u8; 0x238],
    content_id: RawGuid,
    vdu_id: RawGuid,
    unknown4: little_endian::U64,
    unknown5: little_endian::U32,
    unknown6: little_endian::U32,
}

const _: () = assert!(mem::size_of::<RawXviHeader>() == XVI_HEADER_SIZE);

/// Header of the `.xvi` file stored next to an XVD on external drives. Only
/// the two identifiers are understood.
#[derive(Clone, PartialEq, Eq)]
pub struct XviHeader {
    pub unknown1: [u8; 0x238],
    pub content_id: Uuid,
    pub vdu_id: Uuid,
    pub unknown4: u64,
    pub unknown5: u32,
    pub unknown6: u32,
}

impl fmt::Debug for XviHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XviHeader")
            .field("unknown1", &hex::encode(self.unknown1))
            .field("content_id", &self.content_id)
            .field("vdu_id", &self.vdu_id)
            .field("unknown4", &self.unknown4)
            .field("unknown5", &self.unknown5)
            .field("unknown6", &self.unknown6)
            .finish()
    }
}

impl fmt::Display for XviHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Content ID: {}", self.content_id)?;
        writeln!(f, "VDU ID:     {}", self.vdu_id)
    }
}

impl XviHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (raw, _) =
            RawXviHeader::read_from_prefix(data).map_err(|_| Error::TruncatedInput {
                needed: XVI_HEADER_SIZE,
                available: data.len(),
            })?;

        if &raw.magic != XVI_MAGIC {
            return Err(Error::InvalidMagic(raw.magic));
        }

        Ok(Self {
            unknown1: raw.unknown1,
            content_id: raw.content_id.get(),
            vdu_id: raw.vdu_id.get(),
            unknown4: raw.unknown4.get(),
            unknown5: raw.unknown5.get(),
            unknown6: raw.unknown6.get(),
        })
    }

    fn to_raw(&self) -> RawXviHeader {
        RawXviHeader {
            magic: *XVI_MAGIC,
            unknown1: self.unknown1,
            content_id: self.content_id.into(),
            vdu_id: self.vdu_id.into(),
            unknown4: self.unknown4.into(),
            unknown5: self.unknown5.into(),
            unknown6: self.unknown6.into(),
        }
    }
}

impl<R: Read> FromReader<R> for XviHeader {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let data = reader
            .read_vec_up_to(XVI_HEADER_SIZE)
            .map_err(|e| Error::DataRead("header", e))?;

        Self::parse(&data)
    }
}

impl<W: Write> ToWriter<W> for XviHeader {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer
            .write_all(self.to_raw().as_bytes())
            .map_err(|e| Error::DataWrite("header", e))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn identifiers() {
        let mut data = vec![0u8; XVI_HEADER_SIZE];
        data[..8].copy_from_slice(XVI_MAGIC);
        data[0x240..0x244].copy_from_slice(&[0x4d, 0x3c, 0x2b, 0x1a]);
        data[0x250] = 0x01;
        data[0x268..0x26c].copy_from_slice(&7u32.to_le_bytes());

        let header = XviHeader::parse(&data).unwrap();
        assert_eq!(
            header.content_id.to_string(),
            "1a2b3c4d-0000-0000-0000-000000000000",
        );
        assert_eq!(
            header.vdu_id.to_string(),
            "00000001-0000-0000-0000-000000000000",
        );
        assert_eq!(header.unknown5, 7);

        let mut writer = Vec::new();
        header.to_writer(&mut writer).unwrap();
        assert_eq!(writer, data);
    }

    #[test]
    fn rejects_bad_input() {
        let data = vec![0u8; XVI_HEADER_SIZE];
        assert_matches!(XviHeader::parse(&data), Err(Error::InvalidMagic(_)));

        assert_matches!(
            XviHeader::parse(&data[..0x26f]),
            Err(Error::TruncatedInput {
                needed: XVI_HEADER_SIZE,
                available: 0x26f,
            })
        );
    }
}
