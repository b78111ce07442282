//! NVAR variable list decoder
//!
//! The payload of the NVRAM FFS file is a sequence of NVAR records laid out
//! back to back. Each record starts with a 10-byte header:
//!
//! ```text
//! +0  Signature   "NVAR"
//! +4  Size        u16, total record size including this header
//! +6  Next        24-bit offset to the next node of the same variable
//! +9  Flags       u8
//! +10 GUID index  u8   (variable definitions only)
//! +11 Name        NUL-terminated ASCII
//!     Data        up to Size
//! ```
//!
//! When a variable is updated the firmware does not rewrite the record in
//! place. It links a new data-only record through the `Next` field of the
//! previous node, so the current value lives in the last node of the chain.
//!
//! Vendor GUIDs are not stored inline. The first body byte indexes a table of
//! 16-byte GUIDs stored backwards from the end of the buffer: index 0 is the
//! last 16 bytes, index 1 the 16 bytes before it, and so on.

use uuid::Uuid;

use super::buffer::{BoundedBuffer, GUID_SIZE};
use super::{FormatError, VariableKey, VariableValue, Variables};

/// NVAR record signature: "NVAR" in little-endian
pub const NVAR_SIGNATURE: u32 = u32::from_le_bytes(*b"NVAR");

/// Size of the NVAR record header
pub const NODE_HEADER_SIZE: usize = 10;

/// Next-link value terminating a value chain
pub const LAST_NODE: u32 = 0x00FF_FFFF;

/// Flag: variable is accessible at runtime
pub const FLAG_RUNTIME: u8 = 0x01;
/// Flag: record holds data of a previously defined variable
pub const FLAG_DATA_ONLY: u8 = 0x08;
/// Flag: hardware error record
pub const FLAG_HW_ERROR: u8 = 0x20;
/// Flag: authenticated write access
pub const FLAG_AUTH_WRITE: u8 = 0x40;
/// Flag: record is valid
pub const FLAG_VALID: u8 = 0x80;

/// Decoded NVAR record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeHeader {
    size: u16,
    next: u32,
    flags: u8,
}

impl NodeHeader {
    /// Read the header at `offset`.
    ///
    /// Returns `None` if the header does not fit or the signature does not
    /// match, both of which mark the end of the record list.
    fn read(buf: &BoundedBuffer<'_>, offset: usize) -> Option<Self> {
        if !buf.is_valid(offset, NODE_HEADER_SIZE) {
            return None;
        }
        if buf.read_u32(offset)? != NVAR_SIGNATURE {
            return None;
        }
        Some(Self {
            size: buf.read_u16(offset + 4)?,
            next: buf.read_u24(offset + 6)?,
            flags: buf.read_u8(offset + 9)?,
        })
    }

    /// Record defines a variable (as opposed to carrying chained data)
    fn is_definition(&self) -> bool {
        self.flags & FLAG_VALID != 0 && self.flags & FLAG_DATA_ONLY == 0
    }

    fn attributes(&self) -> u32 {
        let mut attr = r_efi::efi::VARIABLE_NON_VOLATILE | r_efi::efi::VARIABLE_BOOTSERVICE_ACCESS;

        if self.flags & FLAG_RUNTIME != 0 {
            attr |= r_efi::efi::VARIABLE_RUNTIME_ACCESS;
        }
        if self.flags & FLAG_HW_ERROR != 0 {
            attr |= r_efi::efi::VARIABLE_HARDWARE_ERROR_RECORD;
        }
        if self.flags & FLAG_AUTH_WRITE != 0 {
            attr |= r_efi::efi::VARIABLE_AUTHENTICATED_WRITE_ACCESS;
        }

        attr
    }
}

/// Parse an NVAR record list.
///
/// `data` is the whole list including the GUID table at its tail. Later
/// records overwrite earlier ones with the same key. Any malformed record
/// fails the whole decode.
pub fn parse_nvram(data: &[u8]) -> Result<Variables, FormatError> {
    if data.len() < NODE_HEADER_SIZE {
        return Err(FormatError::NotEnoughData);
    }

    let buf = BoundedBuffer::new(data);
    let mut variables = Variables::new();
    let mut offset = 0usize;

    while let Some(node) = NodeHeader::read(&buf, offset) {
        if (node.size as usize) < NODE_HEADER_SIZE {
            log::debug!("NVAR record at {:#x} has bad size {}", offset, node.size);
            return Err(FormatError::InvalidHeader);
        }

        if node.is_definition() {
            let (key, value) = read_variable(&buf, offset, &node)?;
            log::trace!("NVAR {:#x}: {} ({} bytes)", offset, key.name, value.data.len());
            variables.insert(key, value);
        }

        offset = match offset.checked_add(node.size as usize) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(variables)
}

/// Construct a variable from its definition record
fn read_variable(
    buf: &BoundedBuffer<'_>,
    offset: usize,
    node: &NodeHeader,
) -> Result<(VariableKey, VariableValue), FormatError> {
    let body_start = offset + NODE_HEADER_SIZE;
    let body_end = offset
        .checked_add(node.size as usize)
        .ok_or(FormatError::InvalidHeader)?;
    if body_start >= body_end || !buf.is_valid(offset, node.size as usize) {
        return Err(FormatError::InvalidHeader);
    }

    // vendor guid
    let guid_index = buf.read_u8(body_start).ok_or(FormatError::InvalidHeader)?;
    let guid = guid_at(buf, guid_index)?;

    // variable name
    let name_start = body_start + 1;
    let name_end = buf
        .find_nul(name_start, body_end)
        .ok_or(FormatError::NameTooLong)?;
    let name_bytes = buf
        .bytes(name_start, name_end - name_start)
        .ok_or(FormatError::NameTooLong)?;
    let name = String::from_utf8(name_bytes.to_vec()).map_err(|_| {
        log::debug!("NVAR {:#x}: variable name is not valid UTF-8", offset);
        FormatError::InvalidNameEncoding
    })?;

    // value data
    let (data_offset, data_node) = last_node(buf, offset, node).ok_or(FormatError::DataNotFound)?;
    let (data_start, data_end) = if data_offset == offset {
        (name_end + 1, body_end)
    } else {
        let end = data_offset
            .checked_add(data_node.size as usize)
            .ok_or(FormatError::DataOutOfRange)?;
        (data_offset + NODE_HEADER_SIZE, end)
    };
    if data_start >= data_end {
        return Err(FormatError::EmptyValue);
    }
    let data = buf
        .bytes(data_start, data_end - data_start)
        .ok_or(FormatError::DataOutOfRange)?;

    Ok((
        VariableKey { name, guid },
        VariableValue {
            attributes: node.attributes(),
            data: data.to_vec(),
        },
    ))
}

/// Follow the value chain starting at `offset`.
///
/// Returns the offset and header of the node holding the value, or `None` if
/// a hop is zero, leaves the buffer or lands on something that is not an NVAR
/// record. Hops are relative to the node that declares them.
fn last_node(
    buf: &BoundedBuffer<'_>,
    mut offset: usize,
    node: &NodeHeader,
) -> Option<(usize, NodeHeader)> {
    let mut node = *node;

    while node.next != LAST_NODE {
        if node.next == 0 {
            return None;
        }
        offset = offset.checked_add(node.next as usize)?;
        node = NodeHeader::read(buf, offset)?;
    }

    Some((offset, node))
}

/// Resolve a GUID index against the table at the end of the buffer
fn guid_at(buf: &BoundedBuffer<'_>, index: u8) -> Result<Uuid, FormatError> {
    let offset = (index as usize + 1)
        .checked_mul(GUID_SIZE)
        .and_then(|back| buf.len().checked_sub(back))
        .ok_or(FormatError::GuidNotFound)?;
    let raw = buf.read_guid(offset).ok_or(FormatError::GuidNotFound)?;

    // EFI_GUID stores the first three fields little-endian
    Ok(Uuid::from_bytes_le(raw))
}
