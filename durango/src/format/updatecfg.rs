// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, mem};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::debug;
use zerocopy::{FromBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Magic value for [`RawHeader::magic`]. This is `UCFG` read as a big-endian
/// integer, so the bytes on disk are `GFCU`.
pub const UPDATE_CFG_MAGIC: u32 = u32::from_be_bytes(*b"UCFG");

pub const UPDATE_CFG_HEADER_SIZE: usize = 50;

pub const UPDATE_CFG_FILE_COUNT: usize = 19;

const BUILD_INFO_ID_SHORT: u8 = 5;
const BUILD_INFO_ID_LONG: u8 = 12;

const BUILD_INFO_SHORT_SIZE: usize = 178;
const BUILD_INFO_LONG_SIZES: [usize; 3] = [176, 176, 134];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Truncated update config: need {needed} bytes for {field}, but have {available}")]
    TruncatedInput {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("Invalid update config magic: {0:#010x}")]
    InvalidMagic(u32),
    #[error("Unknown build info identifier: {0}")]
    UnknownBuildInfo(u8),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the update config header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    unknown1: little_endian::U16,
    unknown2: u8,
    unknown3: u8,
    unknown4: little_endian::U32,
    hash: [u8; 32],
    /// Magic value. This should be equal to [`UPDATE_CFG_MAGIC`].
    magic: little_endian::U32,
    total_length: little_endian::U32,
    unknown5: u8,
    /// Selects the layout of the build info that follows.
    identifier: u8,
}

/// Raw on-disk layout for a file entry.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawFileEntry {
    unknown1: little_endian::U32,
    unknown2: little_endian::U64,
    filename: [u8; 64],
}

const _: () = assert!(mem::size_of::<RawHeader>() == UPDATE_CFG_HEADER_SIZE);
const _: () = assert!(mem::size_of::<RawFileEntry>() == 76);

/// Decode a NUL-padded UTF-8 string field.
fn padded_str(data: &[u8]) -> String {
    data.trim_end_with(|c| c == '\0').to_str_lossy().into_owned()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildInfo {
    Short {
        build_id: String,
    },
    Long {
        build_id_before: String,
        build_id_after: String,
        build_string: String,
    },
}

impl BuildInfo {
    fn size(identifier: u8) -> Result<usize> {
        match identifier {
            BUILD_INFO_ID_SHORT => Ok(BUILD_INFO_SHORT_SIZE),
            BUILD_INFO_ID_LONG => Ok(BUILD_INFO_LONG_SIZES.iter().sum()),
            i => Err(Error::UnknownBuildInfo(i)),
        }
    }

    /// `data` must be exactly [`Self::size`] bytes.
    fn parse(identifier: u8, data: &[u8]) -> Result<Self> {
        if identifier == BUILD_INFO_ID_SHORT {
            return Ok(Self::Short {
                build_id: padded_str(data),
            });
        }

        let [a, b, _] = BUILD_INFO_LONG_SIZES;

        Ok(Self::Long {
            build_id_before: padded_str(&data[..a]),
            build_id_after: padded_str(&data[a..a + b]),
            build_string: padded_str(&data[a + b..]),
        })
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short { build_id } => writeln!(f, "Build ID:        {build_id}"),
            Self::Long {
                build_id_before,
                build_id_after,
                build_string,
            } => {
                writeln!(f, "Build ID before: {build_id_before}")?;
                writeln!(f, "Build ID after:  {build_id_after}")?;
                writeln!(f, "Build string:    {build_string}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateFileEntry {
    pub unknown1: u32,
    pub unknown2: u64,
    pub filename: String,
}

/// The `update.cfg` file from the flash filesystem.
#[derive(Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    pub unknown1: u16,
    pub unknown2: u8,
    pub unknown3: u8,
    pub unknown4: u32,
    pub hash: [u8; 32],
    pub total_length: u32,
    pub unknown5: u8,
    pub build_info: BuildInfo,
    pub files: Vec<UpdateFileEntry>,
}

impl fmt::Debug for UpdateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateConfig")
            .field("unknown1", &self.unknown1)
            .field("unknown2", &self.unknown2)
            .field("unknown3", &self.unknown3)
            .field("unknown4", &self.unknown4)
            .field("hash", &hex::encode(self.hash))
            .field("total_length", &self.total_length)
            .field("unknown5", &self.unknown5)
            .field("build_info", &self.build_info)
            .field("files", &self.files)
            .finish()
    }
}

impl fmt::Display for UpdateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hash:            {}", hex::encode(self.hash))?;
        writeln!(f, "Total length:    {:#x}", self.total_length)?;
        write!(f, "{}", self.build_info)?;

        for entry in self.files.iter().filter(|e| !e.filename.is_empty()) {
            writeln!(
                f,
                "File:            {} ({:#x}, {:#x})",
                entry.filename, entry.unknown1, entry.unknown2,
            )?;
        }

        Ok(())
    }
}

impl UpdateConfig {
    /// Decode an update config. Data beyond the length declared in the header
    /// is ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, _) =
            RawHeader::read_from_prefix(data).map_err(|_| Error::TruncatedInput {
                field: "header",
                needed: UPDATE_CFG_HEADER_SIZE,
                available: data.len(),
            })?;

        if header.magic.get() != UPDATE_CFG_MAGIC {
            return Err(Error::InvalidMagic(header.magic.get()));
        }

        let total_length = header.total_length.get();
        let data = &data[..data.len().min(total_length as usize)];
        let build_info_size = BuildInfo::size(header.identifier)?;

        let needed = UPDATE_CFG_HEADER_SIZE
            + build_info_size
            + UPDATE_CFG_FILE_COUNT * mem::size_of::<RawFileEntry>();
        if data.len() < needed {
            return Err(Error::TruncatedInput {
                field: "build info and file entries",
                needed,
                available: data.len(),
            });
        }

        let remain = &data[UPDATE_CFG_HEADER_SIZE..];
        let (build_info_data, remain) = remain.split_at(build_info_size);
        let build_info = BuildInfo::parse(header.identifier, build_info_data)?;

        let (raw_files, _) =
            <[RawFileEntry]>::ref_from_prefix_with_elems(remain, UPDATE_CFG_FILE_COUNT).map_err(
                |_| Error::TruncatedInput {
                    field: "file entries",
                    needed,
                    available: data.len(),
                },
            )?;

        let files = raw_files
            .iter()
            .map(|f| UpdateFileEntry {
                unknown1: f.unknown1.get(),
                unknown2: f.unknown2.get(),
                filename: padded_str(&f.filename),
            })
            .collect::<Vec<_>>();

        debug!("Parsed update config with build info: {build_info:?}");

        Ok(Self {
            unknown1: header.unknown1.get(),
            unknown2: header.unknown2,
            unknown3: header.unknown3,
            unknown4: header.unknown4.get(),
            hash: header.hash,
            total_length,
            unknown5: header.unknown5,
            build_info,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample(identifier: u8, build_info: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; UPDATE_CFG_HEADER_SIZE];
        data[0] = 7;
        data[40..44].copy_from_slice(b"GFCU");
        data[49] = identifier;
        data.extend_from_slice(build_info);

        for i in 0..UPDATE_CFG_FILE_COUNT {
            let mut entry = [0u8; 76];
            entry[..4].copy_from_slice(&(i as u32).to_le_bytes());
            if i == 1 {
                entry[12..22].copy_from_slice(b"system.xvd");
            }
            data.extend_from_slice(&entry);
        }

        let total_length = data.len() as u32;
        data[44..48].copy_from_slice(&total_length.to_le_bytes());
        // Garbage past the declared length.
        data.extend_from_slice(&[0xff; 16]);

        data
    }

    #[test]
    fn short_build_info() {
        let mut build_info = [0u8; 178];
        build_info[..6].copy_from_slice(b"10.0.1");

        let config = UpdateConfig::parse(&sample(5, &build_info)).unwrap();
        assert_eq!(config.unknown1, 7);
        assert_eq!(
            config.build_info,
            BuildInfo::Short {
                build_id: "10.0.1".to_owned(),
            },
        );
        assert_eq!(config.files.len(), UPDATE_CFG_FILE_COUNT);
        assert_eq!(config.files[1].filename, "system.xvd");
        assert_eq!(config.files[18].unknown1, 18);
    }

    #[test]
    fn only_trailing_nul_trimmed() {
        let mut build_info = [0u8; 178];
        build_info[..5].copy_from_slice(b"10\0.1");

        let config = UpdateConfig::parse(&sample(5, &build_info)).unwrap();
        assert_eq!(
            config.build_info,
            BuildInfo::Short {
                build_id: "10\0.1".to_owned(),
            },
        );
        assert_eq!(config.files[0].filename, "");
    }

    #[test]
    fn long_build_info() {
        let mut build_info = vec![0u8; 486];
        build_info[..1].copy_from_slice(b"a");
        build_info[176..178].copy_from_slice(b"bb");
        build_info[352..355].copy_from_slice(b"ccc");

        let config = UpdateConfig::parse(&sample(12, &build_info)).unwrap();
        assert_eq!(
            config.build_info,
            BuildInfo::Long {
                build_id_before: "a".to_owned(),
                build_id_after: "bb".to_owned(),
                build_string: "ccc".to_owned(),
            },
        );
    }

    #[test]
    fn bad_input() {
        let mut data = sample(5, &[0u8; 178]);
        data[49] = 6;
        assert_matches!(UpdateConfig::parse(&data), Err(Error::UnknownBuildInfo(6)));

        let mut data = sample(5, &[0u8; 178]);
        data[40..44].copy_from_slice(b"UCFG");
        assert_matches!(UpdateConfig::parse(&data), Err(Error::InvalidMagic(_)));

        // Declared length cuts off the file entries.
        let mut data = sample(5, &[0u8; 178]);
        data[44..48].copy_from_slice(&300u32.to_le_bytes());
        assert_matches!(
            UpdateConfig::parse(&data),
            Err(Error::TruncatedInput { available: 300, .. })
        );

        assert_matches!(
            UpdateConfig::parse(&data[..49]),
            Err(Error::TruncatedInput {
                field: "header",
                ..
            })
        );
    }
}
