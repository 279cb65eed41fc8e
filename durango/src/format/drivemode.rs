// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

//! External drive mode. The last two bytes of the first sector decide whether
//! a console or a PC accepts the drive.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom, Write},
};

use thiserror::Error;
use tracing::debug;

/// Offset of the mode signature within the drive.
pub const MODE_SIGNATURE_OFFSET: u64 = 0x1fe;

/// Signature for drives formatted for the console.
pub const MODE_SIGNATURE_XBOX: [u8; 2] = [0x99, 0xcc];

/// Standard MBR boot signature.
pub const MODE_SIGNATURE_PC: [u8; 2] = [0x55, 0xaa];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown drive mode signature: {:02X}{:02X}", .0[0], .0[1])]
    UnknownSignature([u8; 2]),
    #[error("Failed to read drive data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write drive data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveMode {
    Xbox,
    Pc,
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xbox => f.write_str("Xbox"),
            Self::Pc => f.write_str("PC"),
        }
    }
}

impl DriveMode {
    pub fn from_signature(signature: [u8; 2]) -> Result<Self> {
        match signature {
            MODE_SIGNATURE_XBOX => Ok(Self::Xbox),
            MODE_SIGNATURE_PC => Ok(Self::Pc),
            s => Err(Error::UnknownSignature(s)),
        }
    }

    pub fn signature(self) -> [u8; 2] {
        match self {
            Self::Xbox => MODE_SIGNATURE_XBOX,
            Self::Pc => MODE_SIGNATURE_PC,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Xbox => Self::Pc,
            Self::Pc => Self::Xbox,
        }
    }
}

/// Read the current mode of a drive.
pub fn read_mode(mut reader: impl Read + Seek) -> Result<DriveMode> {
    let mut signature = [0u8; 2];

    reader
        .seek(SeekFrom::Start(MODE_SIGNATURE_OFFSET))
        .and_then(|_| reader.read_exact(&mut signature))
        .map_err(|e| Error::DataRead("mode signature", e))?;

    DriveMode::from_signature(signature)
}

/// Write the signature for `mode`. The rest of the sector is left untouched.
pub fn write_mode(mut writer: impl Write + Seek, mode: DriveMode) -> Result<()> {
    writer
        .seek(SeekFrom::Start(MODE_SIGNATURE_OFFSET))
        .and_then(|_| writer.write_all(&mode.signature()))
        .and_then(|_| writer.flush())
        .map_err(|e| Error::DataWrite("mode signature", e))
}

/// Switch the drive to the other mode and return the new mode. Nothing is
/// written if the current signature is not recognized.
pub fn toggle_mode(mut file: impl Read + Write + Seek) -> Result<DriveMode> {
    let current = read_mode(&mut file)?;
    let new = current.toggled();

    debug!("Switching drive mode from {current} to {new}");

    write_mode(&mut file, new)?;

    Ok(new)
}
