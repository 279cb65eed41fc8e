// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Building blocks shared by all of the on-disk structures: little-endian
//! scalars, mixed-endian GUIDs, Windows FILETIMEs, and length-prefixed UTF-16
//! strings.

use std::{
    fmt,
    io::{self, Write},
    string::FromUtf16Error,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use zerocopy::byteorder::little_endian;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Size of an on-disk GUID.
pub const GUID_SIZE: usize = 16;

/// FILETIME ticks (100ns) per second.
const TICKS_PER_SECOND: u64 = 10_000_000;
/// FILETIME ticks per microsecond.
const TICKS_PER_MICROSECOND: u64 = 10;
/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_DIFF: i64 = 11_644_473_600;

#[derive(Debug, Error)]
pub enum Error {
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
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk GUID. The first three groups are stored little-endian and the
/// final eight bytes are stored verbatim.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(transparent)]
pub struct RawGuid([u8; GUID_SIZE]);

impl fmt::Debug for RawGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.get(), f)
    }
}

impl RawGuid {
    pub fn get(&self) -> Uuid {
        decode_guid(&self.0)
    }

    pub fn set(&mut self, guid: Uuid) {
        self.0 = encode_guid(&guid);
    }
}

impl From<Uuid> for RawGuid {
    fn from(guid: Uuid) -> Self {
        Self(encode_guid(&guid))
    }
}

/// Decode a mixed-endian GUID into its canonical form.
pub fn decode_guid(data: &[u8; GUID_SIZE]) -> Uuid {
    Uuid::from_bytes_le(*data)
}

/// Exact inverse of [`decode_guid`].
pub fn encode_guid(guid: &Uuid) -> [u8; GUID_SIZE] {
    guid.to_bytes_le()
}

/// Windows FILETIME: number of 100ns intervals since 1601-01-01 UTC.
///
/// The raw tick count is kept so that structures containing a FILETIME
/// re-encode byte-for-byte. Conversions to and from [`DateTime`] operate at
/// microsecond precision: the sub-microsecond remainder (at most 900ns) of the
/// tick count is discarded by [`Self::to_utc`].
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileTime(pub u64);

impl fmt::Debug for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileTime({}, {:?})", self.0, self.to_utc())
    }
}

impl fmt::Display for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_utc().format("%Y-%m-%d %H:%M:%S%.6f UTC"))
    }
}

impl FileTime {
    /// Convert to a UTC timestamp, truncating to whole microseconds.
    pub fn to_utc(self) -> DateTime<Utc> {
        let secs = (self.0 / TICKS_PER_SECOND) as i64 - FILETIME_UNIX_DIFF;
        let micros = (self.0 % TICKS_PER_SECOND) / TICKS_PER_MICROSECOND;

        // The full u64 tick range covers roughly 58000 years, which is well
        // within what chrono can represent.
        DateTime::from_timestamp(secs, (micros * 1000) as u32)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Convert from a UTC timestamp, truncating to whole microseconds. Returns
    /// [`None`] if the instant cannot be represented as a FILETIME.
    pub fn from_utc(time: DateTime<Utc>) -> Option<Self> {
        let secs = time.timestamp().checked_add(FILETIME_UNIX_DIFF)?;
        let secs = u64::try_from(secs).ok()?;
        let micros = u64::from(time.timestamp_subsec_micros());

        secs.checked_mul(TICKS_PER_SECOND)?
            .checked_add(micros * TICKS_PER_MICROSECOND)
            .map(Self)
    }
}

/// Raw on-disk FILETIME.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(transparent)]
pub struct RawFileTime(little_endian::U64);

impl fmt::Debug for RawFileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.get(), f)
    }
}

impl RawFileTime {
    pub fn get(&self) -> FileTime {
        FileTime(self.0.get())
    }
}

impl From<FileTime> for RawFileTime {
    fn from(time: FileTime) -> Self {
        Self(time.0.into())
    }
}

/// Bounds-checked sequential decoder over an in-memory buffer. Every read
/// either consumes exactly the requested number of bytes or fails with
/// [`Error::TruncatedInput`] without advancing.
#[derive(Clone, Debug)]
pub struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail with [`Error::TruncatedInput`] if fewer than `needed` bytes
    /// remain. Nothing is consumed.
    pub fn ensure(&self, field: &'static str, needed: u64) -> Result<()> {
        let available = self.remaining() as u64;

        if needed > available {
            return Err(Error::TruncatedInput {
                field,
                needed,
                available,
            });
        }

        Ok(())
    }

    pub fn read_bytes(&mut self, field: &'static str, size: usize) -> Result<&'a [u8]> {
        self.ensure(field, size as u64)?;

        let data = &self.buf[self.pos..][..size];
        self.pos += size;

        Ok(data)
    }

    pub fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let mut result = [0u8; N];
        result.copy_from_slice(self.read_bytes(field, N)?);
        Ok(result)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        self.read_array::<1>(field).map(|b| b[0])
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        self.read_array(field).map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64> {
        self.read_array(field).map(u64::from_le_bytes)
    }

    pub fn read_guid(&mut self, field: &'static str) -> Result<Uuid> {
        self.read_array(field).map(|b| decode_guid(&b))
    }

    pub fn read_filetime(&mut self, field: &'static str) -> Result<FileTime> {
        self.read_u64(field).map(FileTime)
    }

    /// Read a string prefixed by its length in UTF-16 code units. The length
    /// is validated against the remaining input before anything is
    /// allocated.
    pub fn read_utf16(&mut self, field: &'static str) -> Result<String> {
        let start = self.pos;
        let units = self.read_u32(field)?;
        let size = u64::from(units) * 2;

        if let Err(e) = self.ensure(field, size) {
            self.pos = start;
            return Err(e);
        }

        let data = self.read_bytes(field, size as usize)?;
        let code_units = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect::<Vec<_>>();

        String::from_utf16(&code_units).map_err(|e| {
            self.pos = start;
            Error::InvalidUtf16(field, e)
        })
    }
}

/// Encode a string with a u32 prefix holding the number of UTF-16 code units.
pub fn encode_utf16(field: &'static str, value: &str) -> Result<Vec<u8>> {
    let code_units = value.encode_utf16().collect::<Vec<_>>();
    let len = u32::try_from(code_units.len()).map_err(|_| Error::StringTooLong(field))?;

    let mut result = Vec::with_capacity(4 + code_units.len() * 2);
    result.extend_from_slice(&len.to_le_bytes());
    for unit in code_units {
        result.extend_from_slice(&unit.to_le_bytes());
    }

    Ok(result)
}

/// Extensions for writers to emit the primitive encodings.
pub trait WritePrimitiveExt {
    fn write_u8(&mut self, value: u8) -> io::Result<()>;

    fn write_u32_le(&mut self, value: u32) -> io::Result<()>;

    fn write_u64_le(&mut self, value: u64) -> io::Result<()>;

    fn write_guid(&mut self, guid: &Uuid) -> io::Result<()>;

    fn write_filetime(&mut self, time: FileTime) -> io::Result<()> {
        self.write_u64_le(time.0)
    }
}

impl<W: Write> WritePrimitiveExt for W {
    fn write_u8(&mut self, value: u8) -> io::Result<()> {
        self.write_all(&[value])
    }

    fn write_u32_le(&mut self, value: u32) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u64_le(&mut self, value: u64) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_guid(&mut self, guid: &Uuid) -> io::Result<()> {
        self.write_all(&encode_guid(guid))
    }
}
