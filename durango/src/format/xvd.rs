// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Write},
    mem,
};

use bitflags::bitflags;
use bstr::ByteSlice;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{
        padding,
        primitive::{FileTime, RawFileTime, RawGuid},
    },
    stream::{ByteRegion, FromReader, ReadFixedSizeExt, ToWriter},
};

/// Magic value for [`RawXvdHeader::magic`].
pub const XVD_MAGIC: &[u8; 8] = b"msft-xvd";

/// Offset of [`RawXvdHeader::magic`].
pub const XVD_MAGIC_OFFSET: usize = 0x200;

/// Size of the on-disk header, including the signature.
pub const XVD_HEADER_SIZE: usize = 0x1000;

/// Page size used for XVD region alignment.
pub const XVD_PAGE_SIZE: u64 = 0x1000;

/// The embedded XVD always starts after the header and two reserved pages.
pub const EMBEDDED_XVD_OFFSET: u64 = 3 * XVD_PAGE_SIZE;

/// Number of extension table entries in the header.
pub const XVD_EXT_ENTRY_COUNT: usize = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Truncated XVD header: need {needed} bytes, but have {available}")]
    TruncatedInput { needed: usize, available: usize },
    #[error("Invalid XVD magic: {:?}", .0.as_bstr())]
    InvalidMagic([u8; 8]),
    #[error("Failed to read XVD data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write XVD data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct VolumeFlags: u32 {
        const READ_ONLY = 1 << 0;
        /// Data blocks are stored in plaintext.
        const ENCRYPTION_DISABLED = 1 << 1;
        /// No hash tree is present.
        const DATA_INTEGRITY_DISABLED = 1 << 2;
        const LEGACY_SECTOR_SIZE = 1 << 3;
        const RESILIENCY_ENABLED = 1 << 4;
        const SRA_READ_ONLY = 1 << 5;
        const REGION_ID_IN_XTS = 1 << 6;
        const ERA_SPECIFIC = 1 << 7;

        const _ = !0;
    }
}

/// Whether the drive size is fixed at creation time or grows on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum XvdType {
    Fixed,
    Dynamic,
    Unknown(u32),
}

impl From<u32> for XvdType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Fixed,
            1 => Self::Dynamic,
            v => Self::Unknown(v),
        }
    }
}

impl XvdType {
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Fixed => 0,
            Self::Dynamic => 1,
            Self::Unknown(v) => v,
        }
    }
}

macro_rules! content_types {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// Classification of the data stored in an XVD.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum ContentType {
            $($variant,)+
            Unknown(u32),
        }

        impl From<u32> for ContentType {
            fn from(value: u32) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    v => Self::Unknown(v),
                }
            }
        }

        impl ContentType {
            pub fn to_raw(self) -> u32 {
                match self {
                    $(Self::$variant => $value,)+
                    Self::Unknown(v) => v,
                }
            }

            /// Symbolic name as shown by the console tooling.
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some($name),)+
                    Self::Unknown(_) => None,
                }
            }
        }
    };
}

content_types! {
    Data = 0x00 => "Data",
    Title = 0x01 => "Title",
    SystemOs = 0x02 => "SystemOS",
    EraOs = 0x03 => "EraOS",
    Scratch = 0x04 => "Scratch",
    ResetData = 0x05 => "ResetData",
    Application = 0x06 => "Application",
    HostOs = 0x07 => "HostOS",
    X360Stfs = 0x08 => "X360STFS",
    X360Fatx = 0x09 => "X360FATX",
    X360Gdfx = 0x0a => "X360GDFX",
    Updater = 0x0b => "Updater",
    OfflineUpdater = 0x0c => "OfflineUpdater",
    Template = 0x0d => "Template",
    MteHost = 0x0e => "MteHost",
    MteApp = 0x0f => "MteApp",
    MteTitle = 0x10 => "MteTitle",
    MteEraOs = 0x11 => "MteEraOS",
    EraTools = 0x12 => "EraTools",
    SystemTools = 0x13 => "SystemTools",
    SystemAux = 0x14 => "SystemAux",
    Codec = 0x16 => "Codec",
    Qaslt = 0x17 => "Qaslt",
    AppDlc = 0x18 => "AppDLC",
    TitleDlc = 0x19 => "TitleDLC",
    UniversalDlc = 0x1a => "UniversalDLC",
    SystemData = 0x1b => "SystemData",
    Test = 0x1c => "Test",
    Uwa = 0x21 => "UWA",
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Unknown({:#x})", self.to_raw()),
        }
    }
}

/// Coarse grouping of content types used when enumerating drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentCategory {
    App,
    Game,
    X360,
    System,
    Other,
}

impl ContentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Game => "game",
            Self::X360 => "x360",
            Self::System => "system",
            Self::Other => "other",
        }
    }
}

impl ContentType {
    /// Whether content of this type can carry XVC licensing metadata.
    pub fn is_xvc(self) -> bool {
        matches!(
            self,
            Self::Title
                | Self::Application
                | Self::MteApp
                | Self::MteTitle
                | Self::AppDlc
                | Self::TitleDlc
                | Self::UniversalDlc
        )
    }

    pub fn category(self) -> ContentCategory {
        match self {
            Self::Application | Self::AppDlc | Self::Uwa => ContentCategory::App,
            Self::Title | Self::TitleDlc => ContentCategory::Game,
            Self::X360Stfs | Self::X360Fatx | Self::X360Gdfx => ContentCategory::X360,
            Self::Data
            | Self::SystemOs
            | Self::EraOs
            | Self::Scratch
            | Self::ResetData
            | Self::HostOs
            | Self::Updater
            | Self::OfflineUpdater
            | Self::Template
            | Self::SystemTools
            | Self::SystemAux
            | Self::SystemData => ContentCategory::System,
            _ => ContentCategory::Other,
        }
    }
}

/// Map a raw content type value to its classification. This never fails.
pub fn classify_content_type(value: u32) -> ContentType {
    ContentType::from(value)
}

/// Raw on-disk layout for an extension table entry.
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawExtEntry {
    code: little_endian::U32,
    length: little_endian::U32,
    offset: little_endian::U64,
    data_length: little_endian::U32,
    reserved: little_endian::U32,
}

/// Raw on-disk layout for the XVD header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawXvdHeader {
    /// RSA signature over the rest of the header.
    signature: [u8; 0x200],
    /// Magic value. This should be equal to [`XVD_MAGIC`].
    magic: [u8; 8],
    volume_flags: little_endian::U32,
    format_version: little_endian::U32,
    creation_time: RawFileTime,
    drive_size: little_endian::U64,
    content_id: RawGuid,
    user_id: RawGuid,
    root_hash: [u8; 32],
    xvc_hash: [u8; 32],
    xvd_type: little_endian::U32,
    content_type: little_endian::U32,
    embedded_xvd_length: little_endian::U32,
    userdata_length: little_endian::U32,
    xvc_length: little_endian::U32,
    dynamic_header_length: little_endian::U32,
    block_size: little_endian::U32,
    ext_entries: [RawExtEntry; XVD_EXT_ENTRY_COUNT],
    capabilities: [u8; 16],
    pe_catalog_hash: [u8; 32],
    embedded_xvd_pduid: RawGuid,
    reserved_33c: [u8; 0x10],
    key_material: [u8; 32],
    user_data_hash: [u8; 32],
    sandbox_id: [u8; 16],
    product_id: RawGuid,
    build_id: RawGuid,
    package_version: little_endian::I64,
    pe_catalog_info: [u8; 0xa0],
    writeable_expiration_data: little_endian::U32,
    writeable_policy_flags: little_endian::U32,
    local_storage_size: little_endian::U32,
    reserved_470: [u8; 0x1c],
    sequence_number: little_endian::I64,
    required_systemversion: little_endian::U64,
    odk_keyslot_id: little_endian::U32,
    reserved_4a0: [u8; 0xb60],
}

const _: () = assert!(mem::size_of::<RawXvdHeader>() == XVD_HEADER_SIZE);
const _: () = assert!(mem::offset_of!(RawXvdHeader, magic) == XVD_MAGIC_OFFSET);
const _: () = assert!(mem::offset_of!(RawXvdHeader, drive_size) == 0x218);
const _: () = assert!(mem::offset_of!(RawXvdHeader, content_type) == 0x284);
const _: () = assert!(mem::offset_of!(RawXvdHeader, sequence_number) == 0x48c);

/// An entry of the extension table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtEntry {
    pub code: u32,
    pub length: u32,
    pub offset: u64,
    pub data_length: u32,
    pub reserved: u32,
}

impl From<&RawExtEntry> for ExtEntry {
    fn from(raw: &RawExtEntry) -> Self {
        Self {
            code: raw.code.get(),
            length: raw.length.get(),
            offset: raw.offset.get(),
            data_length: raw.data_length.get(),
            reserved: raw.reserved.get(),
        }
    }
}

impl From<&ExtEntry> for RawExtEntry {
    fn from(entry: &ExtEntry) -> Self {
        Self {
            code: entry.code.into(),
            length: entry.length.into(),
            offset: entry.offset.into(),
            data_length: entry.data_length.into(),
            reserved: entry.reserved.into(),
        }
    }
}

/// Decoded XVD header. Cryptographic fields are carried opaquely and reserved
/// regions are retained so that [`Self::to_bytes`] reproduces the original
/// header exactly.
#[derive(Clone, PartialEq, Eq)]
pub struct XvdHeader {
    pub signature: [u8; 0x200],
    pub volume_flags: VolumeFlags,
    pub format_version: u32,
    pub creation_time: FileTime,
    pub drive_size: u64,
    /// VDUID.
    pub content_id: Uuid,
    /// UDUID.
    pub user_id: Uuid,
    /// Top hash block hash.
    pub root_hash: [u8; 32],
    /// Hash of the original XVC data.
    pub xvc_hash: [u8; 32],
    pub xvd_type: XvdType,
    /// Raw content type. Use [`Self::content_type`] for the classification.
    pub content_type: u32,
    pub embedded_xvd_length: u32,
    pub userdata_length: u32,
    pub xvc_length: u32,
    pub dynamic_header_length: u32,
    pub block_size: u32,
    pub ext_entries: [ExtEntry; XVD_EXT_ENTRY_COUNT],
    pub capabilities: [u8; 16],
    pub pe_catalog_hash: [u8; 32],
    pub embedded_xvd_pduid: Uuid,
    pub reserved_33c: [u8; 0x10],
    pub key_material: [u8; 32],
    pub user_data_hash: [u8; 32],
    /// NUL-padded ASCII string.
    pub sandbox_id: [u8; 16],
    pub product_id: Uuid,
    /// PDUID.
    pub build_id: Uuid,
    pub package_version: i64,
    pub pe_catalog_info: [u8; 0xa0],
    pub writeable_expiration_data: u32,
    pub writeable_policy_flags: u32,
    pub local_storage_size: u32,
    pub reserved_470: [u8; 0x1c],
    pub sequence_number: i64,
    pub required_systemversion: u64,
    pub odk_keyslot_id: u32,
    pub reserved_4a0: [u8; 0xb60],
}

impl fmt::Debug for XvdHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XvdHeader")
            .field("signature", &hex::encode(self.signature))
            .field("volume_flags", &self.volume_flags)
            .field("format_version", &self.format_version)
            .field("creation_time", &self.creation_time)
            .field("drive_size", &self.drive_size)
            .field("content_id", &self.content_id)
            .field("user_id", &self.user_id)
            .field("root_hash", &hex::encode(self.root_hash))
            .field("xvc_hash", &hex::encode(self.xvc_hash))
            .field("xvd_type", &self.xvd_type)
            .field("content_type", &self.content_type())
            .field("embedded_xvd_length", &self.embedded_xvd_length)
            .field("userdata_length", &self.userdata_length)
            .field("xvc_length", &self.xvc_length)
            .field("dynamic_header_length", &self.dynamic_header_length)
            .field("block_size", &self.block_size)
            .field("ext_entries", &self.ext_entries)
            .field("capabilities", &hex::encode(self.capabilities))
            .field("pe_catalog_hash", &hex::encode(self.pe_catalog_hash))
            .field("embedded_xvd_pduid", &self.embedded_xvd_pduid)
            .field("reserved_33c", &hex::encode(self.reserved_33c))
            .field("key_material", &hex::encode(self.key_material))
            .field("user_data_hash", &hex::encode(self.user_data_hash))
            .field("sandbox_id", &self.sandbox_id.as_bstr())
            .field("product_id", &self.product_id)
            .field("build_id", &self.build_id)
            .field("package_version", &self.package_version)
            .field("pe_catalog_info", &hex::encode(self.pe_catalog_info))
            .field("writeable_expiration_data", &self.writeable_expiration_data)
            .field("writeable_policy_flags", &self.writeable_policy_flags)
            .field("local_storage_size", &self.local_storage_size)
            .field("reserved_470", &hex::encode(self.reserved_470))
            .field("sequence_number", &self.sequence_number)
            .field("required_systemversion", &self.required_systemversion)
            .field("odk_keyslot_id", &self.odk_keyslot_id)
            .field("reserved_4a0", &hex::encode(self.reserved_4a0))
            .finish()
    }
}

impl fmt::Display for XvdHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Content type:          {} ({:#x})", self.content_type(), self.content_type)?;
        writeln!(f, "XVD type:              {:?}", self.xvd_type)?;
        writeln!(f, "ODK keyslot ID:        {}", self.odk_keyslot_id)?;
        writeln!(f, "Volume flags:          {:?}", self.volume_flags)?;
        writeln!(f, "Encrypted:             {}", self.is_encrypted())?;
        writeln!(f, "Data integrity:        {}", self.is_data_integrity_enabled())?;
        writeln!(f, "Created:               {}", self.creation_time)?;
        writeln!(f, "Drive size:            {:#x}", self.drive_size)?;
        writeln!(f, "Format version:        {:#x}", self.format_version)?;
        writeln!(f, "Content ID (VDUID):    {}", self.content_id)?;
        writeln!(f, "User ID (UDUID):       {}", self.user_id)?;
        writeln!(f, "Embedded XVD PDUID:    {}", self.embedded_xvd_pduid)?;
        writeln!(f, "Embedded XVD length:   {:#x}", self.embedded_xvd_length)?;
        writeln!(f, "User data length:      {:#x}", self.userdata_length)?;
        writeln!(f, "XVC data length:       {:#x}", self.xvc_length)?;
        writeln!(f, "Dynamic header length: {:#x}", self.dynamic_header_length)?;
        writeln!(f, "Block size:            {:#x}", self.block_size)?;
        writeln!(f, "Top hash block hash:   {}", hex::encode(self.root_hash))?;
        writeln!(f, "Original XVC hash:     {}", hex::encode(self.xvc_hash))?;
        writeln!(f, "Sandbox ID:            {:?}", self.sandbox_id_bytes().as_bstr())?;
        writeln!(f, "Product ID:            {}", self.product_id)?;
        writeln!(f, "Build ID (PDUID):      {}", self.build_id)?;
        writeln!(f, "Package version:       {}", self.package_version)?;
        writeln!(f, "Required sys version:  {}", self.required_systemversion)?;
        writeln!(f, "Sequence number:       {}", self.sequence_number)?;

        for (i, entry) in self.ext_entries.iter().enumerate() {
            writeln!(
                f,
                "Ext entry #{i}:          code={:#x} length={:#x} offset={:#x} data_length={:#x}",
                entry.code, entry.length, entry.offset, entry.data_length,
            )?;
        }

        Ok(())
    }
}

impl TryFrom<&RawXvdHeader> for XvdHeader {
    type Error = Error;

    fn try_from(raw: &RawXvdHeader) -> Result<Self> {
        if &raw.magic != XVD_MAGIC {
            return Err(Error::InvalidMagic(raw.magic));
        }

        Ok(Self {
            signature: raw.signature,
            volume_flags: VolumeFlags::from_bits_retain(raw.volume_flags.get()),
            format_version: raw.format_version.get(),
            creation_time: raw.creation_time.get(),
            drive_size: raw.drive_size.get(),
            content_id: raw.content_id.get(),
            user_id: raw.user_id.get(),
            root_hash: raw.root_hash,
            xvc_hash: raw.xvc_hash,
            xvd_type: raw.xvd_type.get().into(),
            content_type: raw.content_type.get(),
            embedded_xvd_length: raw.embedded_xvd_length.get(),
            userdata_length: raw.userdata_length.get(),
            xvc_length: raw.xvc_length.get(),
            dynamic_header_length: raw.dynamic_header_length.get(),
            block_size: raw.block_size.get(),
            ext_entries: raw.ext_entries.each_ref().map(ExtEntry::from),
            capabilities: raw.capabilities,
            pe_catalog_hash: raw.pe_catalog_hash,
            embedded_xvd_pduid: raw.embedded_xvd_pduid.get(),
            reserved_33c: raw.reserved_33c,
            key_material: raw.key_material,
            user_data_hash: raw.user_data_hash,
            sandbox_id: raw.sandbox_id,
            product_id: raw.product_id.get(),
            build_id: raw.build_id.get(),
            package_version: raw.package_version.get(),
            pe_catalog_info: raw.pe_catalog_info,
            writeable_expiration_data: raw.writeable_expiration_data.get(),
            writeable_policy_flags: raw.writeable_policy_flags.get(),
            local_storage_size: raw.local_storage_size.get(),
            reserved_470: raw.reserved_470,
            sequence_number: raw.sequence_number.get(),
            required_systemversion: raw.required_systemversion.get(),
            odk_keyslot_id: raw.odk_keyslot_id.get(),
            reserved_4a0: raw.reserved_4a0,
        })
    }
}

impl From<&XvdHeader> for RawXvdHeader {
    fn from(header: &XvdHeader) -> Self {
        Self {
            signature: header.signature,
            magic: *XVD_MAGIC,
            volume_flags: header.volume_flags.bits().into(),
            format_version: header.format_version.into(),
            creation_time: header.creation_time.into(),
            drive_size: header.drive_size.into(),
            content_id: header.content_id.into(),
            user_id: header.user_id.into(),
            root_hash: header.root_hash,
            xvc_hash: header.xvc_hash,
            xvd_type: header.xvd_type.to_raw().into(),
            content_type: header.content_type.into(),
            embedded_xvd_length: header.embedded_xvd_length.into(),
            userdata_length: header.userdata_length.into(),
            xvc_length: header.xvc_length.into(),
            dynamic_header_length: header.dynamic_header_length.into(),
            block_size: header.block_size.into(),
            ext_entries: header.ext_entries.each_ref().map(RawExtEntry::from),
            capabilities: header.capabilities,
            pe_catalog_hash: header.pe_catalog_hash,
            embedded_xvd_pduid: header.embedded_xvd_pduid.into(),
            reserved_33c: header.reserved_33c,
            key_material: header.key_material,
            user_data_hash: header.user_data_hash,
            sandbox_id: header.sandbox_id,
            product_id: header.product_id.into(),
            build_id: header.build_id.into(),
            package_version: header.package_version.into(),
            pe_catalog_info: header.pe_catalog_info,
            writeable_expiration_data: header.writeable_expiration_data.into(),
            writeable_policy_flags: header.writeable_policy_flags.into(),
            local_storage_size: header.local_storage_size.into(),
            reserved_470: header.reserved_470,
            sequence_number: header.sequence_number.into(),
            required_systemversion: header.required_systemversion.into(),
            odk_keyslot_id: header.odk_keyslot_id.into(),
            reserved_4a0: header.reserved_4a0,
        }
    }
}

impl XvdHeader {
    /// Decode a header from the first [`XVD_HEADER_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (raw, _) =
            RawXvdHeader::read_from_prefix(data).map_err(|_| Error::TruncatedInput {
                needed: XVD_HEADER_SIZE,
                available: data.len(),
            })?;

        let header = Self::try_from(&raw)?;

        debug!(
            "Parsed XVD header: content type {}, product ID {}",
            header.content_type(),
            header.product_id,
        );

        Ok(header)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        RawXvdHeader::from(self).as_bytes().to_vec()
    }

    pub fn content_type(&self) -> ContentType {
        classify_content_type(self.content_type)
    }

    pub fn is_xvc_container(&self) -> bool {
        self.content_type().is_xvc()
    }

    pub fn is_encrypted(&self) -> bool {
        !self.volume_flags.contains(VolumeFlags::ENCRYPTION_DISABLED)
    }

    pub fn is_data_integrity_enabled(&self) -> bool {
        !self.volume_flags.contains(VolumeFlags::DATA_INTEGRITY_DISABLED)
    }

    /// Sandbox ID without the trailing NUL padding.
    pub fn sandbox_id_bytes(&self) -> &[u8] {
        self.sandbox_id.trim_end_with(|c| c == '\0')
    }

    /// Location of the embedded XVD, if there is one.
    pub fn embedded_xvd_region(&self) -> Option<ByteRegion> {
        if self.embedded_xvd_length == 0 {
            return None;
        }

        Some(ByteRegion::new(
            EMBEDDED_XVD_OFFSET,
            self.embedded_xvd_length.into(),
        ))
    }

    /// User data immediately follows the page-aligned embedded XVD.
    pub fn user_data_offset(&self) -> u64 {
        let embedded_len = u64::from(self.embedded_xvd_length);

        // A u32 length rounded to a 4 KiB page cannot overflow a u64.
        EMBEDDED_XVD_OFFSET + embedded_len + padding::calc(embedded_len, XVD_PAGE_SIZE)
    }

    /// Location of the user data, if there is any.
    pub fn user_data_region(&self) -> Option<ByteRegion> {
        if self.userdata_length == 0 {
            return None;
        }

        Some(ByteRegion::new(
            self.user_data_offset(),
            self.userdata_length.into(),
        ))
    }
}

impl<R: Read> FromReader<R> for XvdHeader {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let data = reader
            .read_vec_up_to(XVD_HEADER_SIZE)
            .map_err(|e| Error::DataRead("header", e))?;

        Self::parse(&data)
    }
}

impl<W: Write> ToWriter<W> for XvdHeader {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer
            .write_all(RawXvdHeader::from(self).as_bytes())
            .map_err(|e| Error::DataWrite("header", e))
    }
}
