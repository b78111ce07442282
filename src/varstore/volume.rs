//! Firmware volume envelope for the NVRAM variable list
//!
//! The BIOS flash region with NV variables is a PI firmware volume holding a
//! single FFS file whose contents are the NVAR record list.
//!
//! # On-disk layout
//!
//! ```text
//! +--------------------------------------------+ offset 0x0000
//! |  EFI_FIRMWARE_VOLUME_HEADER                |  FileSystemGuid = FFSv2
//! +--------------------------------------------+ ExtHeaderOffset
//! |  EFI_FIRMWARE_VOLUME_EXT_HEADER  (20 bytes)|  FvName = NVRAM volume
//! +--------------------------------------------+ (8-byte aligned)
//! |  EFI_FFS_FILE_HEADER             (24 bytes)|  Name = NVRAM file system
//! +--------------------------------------------+
//! |  NVAR records ... GUID table               |  Size - 24 bytes
//! +--------------------------------------------+
//! ```
//!
//! Every check below runs against the image bounds before the field is read.
//! A mismatching GUID is a hard failure: the volume is not an NVRAM dump.

use std::ops::Range;
use std::path::Path;

use r_efi::efi::Guid;

use super::buffer::{align_up, BoundedBuffer};
use super::{nvar, FormatError, Result, Variables};

/// EFI_FIRMWARE_FILE_SYSTEM2_GUID: {8c8ce578-8a3d-4f1c-9935-896185c32dd3}
pub const FFS_FILE_SYSTEM2_GUID: Guid = Guid::from_fields(
    0x8c8ce578,
    0x8a3d,
    0x4f1c,
    0x99,
    0x35,
    &[0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3],
);

/// NVRAM volume name: {fa4974fc-af1d-4e5d-bdc5-dacd6d27baec}
pub const NVRAM_VOLUME_GUID: Guid = Guid::from_fields(
    0xfa4974fc,
    0xaf1d,
    0x4e5d,
    0xbd,
    0xc5,
    &[0xda, 0xcd, 0x6d, 0x27, 0xba, 0xec],
);

/// NVRAM FFS file name: {cef5b9a3-476d-497f-9fdc-e98143e0422c}
pub const NVRAM_FFS_GUID: Guid = Guid::from_fields(
    0xcef5b9a3,
    0x476d,
    0x497f,
    0x9f,
    0xdc,
    &[0xe9, 0x81, 0x43, 0xe0, 0x42, 0x2c],
);

/// Firmware volume header length (with a single block map entry)
pub const FV_HEADER_SIZE: usize = 0x40;

/// Extended volume header length
pub const EXT_HEADER_SIZE: usize = 0x14;

/// FFS file header length
pub const FFS_HEADER_SIZE: usize = 0x18;

/// FFS files are 8-byte aligned inside the volume
const FFS_ALIGNMENT: usize = 8;

// Field offsets
const FV_FILE_SYSTEM_GUID: usize = 0x10;
const FV_EXT_HEADER_OFFSET: usize = 0x34;
const EXT_FV_NAME: usize = 0x00;
const EXT_SIZE: usize = 0x10;
const FFS_NAME: usize = 0x00;
const FFS_SIZE: usize = 0x14;

fn guid_matches(buf: &BoundedBuffer<'_>, offset: usize, guid: &Guid) -> bool {
    buf.read_guid(offset)
        .is_some_and(|on_disk| on_disk == *guid.as_bytes())
}

/// Locate the NVAR list inside a firmware volume.
///
/// Returns the byte range of the list within `image`.
pub fn unpack_volume(image: &[u8]) -> core::result::Result<Range<usize>, FormatError> {
    let buf = BoundedBuffer::new(image);

    // Unpack volume

    if !buf.is_valid(0, FV_HEADER_SIZE) {
        return Err(FormatError::InvalidVolumeHeader);
    }
    if !guid_matches(&buf, FV_FILE_SYSTEM_GUID, &FFS_FILE_SYSTEM2_GUID) {
        return Err(FormatError::UnsupportedFileSystem);
    }
    let ext_offset = buf
        .read_u16(FV_EXT_HEADER_OFFSET)
        .ok_or(FormatError::InvalidVolumeHeader)? as usize;
    if ext_offset == 0 {
        return Err(FormatError::ExtHeaderNotFound);
    }
    if !buf.is_valid(ext_offset, EXT_HEADER_SIZE) {
        return Err(FormatError::InvalidExtHeader);
    }
    if !guid_matches(&buf, ext_offset + EXT_FV_NAME, &NVRAM_VOLUME_GUID) {
        return Err(FormatError::UnsupportedVolume);
    }

    // Unpack file

    let ext_size = buf
        .read_u32(ext_offset + EXT_SIZE)
        .ok_or(FormatError::InvalidExtHeader)? as usize;
    let ffs_offset = ext_offset
        .checked_add(ext_size)
        .and_then(|end| align_up(end, FFS_ALIGNMENT))
        .ok_or(FormatError::FfsHeaderNotFound)?;
    if !buf.is_valid(ffs_offset, FFS_HEADER_SIZE) {
        return Err(FormatError::FfsHeaderNotFound);
    }
    if !guid_matches(&buf, ffs_offset + FFS_NAME, &NVRAM_FFS_GUID) {
        return Err(FormatError::UnsupportedNvramFileSystem);
    }

    // Unpack NVRAM data

    let nvram_start = ffs_offset + FFS_HEADER_SIZE;
    let nvram_size = buf
        .read_u24(ffs_offset + FFS_SIZE)
        .and_then(|size| (size as usize).checked_sub(FFS_HEADER_SIZE))
        .ok_or(FormatError::UnexpectedEndOfFile)?;
    if !buf.is_valid(nvram_start, nvram_size) {
        return Err(FormatError::UnexpectedEndOfFile);
    }

    log::debug!(
        "NVRAM file at {:#x}, {} bytes of variable data",
        ffs_offset,
        nvram_size
    );

    Ok(nvram_start..nvram_start + nvram_size)
}

/// Parse a firmware volume dump held in memory
pub fn parse_volume(image: &[u8]) -> core::result::Result<Variables, FormatError> {
    let range = unpack_volume(image)?;
    nvar::parse_nvram(&image[range])
}

/// Parse a firmware volume dump file.
///
/// File access errors are reported as system errors, everything else as a
/// format error.
pub fn parse_volume_file(path: &Path) -> Result<Variables> {
    let image = std::fs::read(path)?;
    let variables = parse_volume(&image)?;
    log::info!(
        "Parsed NVRAM volume {}: {} variables",
        path.display(),
        variables.len()
    );
    Ok(variables)
}
