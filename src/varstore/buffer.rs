//! Bounded read-only view over an untrusted byte region
//!
//! Every structured read of a firmware image goes through this type. Positions
//! are plain offsets relative to the start of the view; a read is only
//! performed after `[offset, offset + length)` has been checked against the
//! view bounds with overflow-safe arithmetic.
//!
//! Readers return `Option` so that each caller can turn an out-of-range access
//! into the format error that describes its own decoding stage.

/// Size of an on-disk EFI_GUID in bytes
pub const GUID_SIZE: usize = 16;

/// Read-only window over a byte region with range-checked accessors
#[derive(Debug, Clone, Copy)]
pub struct BoundedBuffer<'a> {
    data: &'a [u8],
}

impl<'a> BoundedBuffer<'a> {
    /// Create a view over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Total size of the view in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the view is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check that `[offset, offset + length)` lies entirely inside the view
    pub fn is_valid(&self, offset: usize, length: usize) -> bool {
        offset
            .checked_add(length)
            .is_some_and(|end| end <= self.data.len())
    }

    /// Borrow `length` bytes starting at `offset`
    pub fn bytes(&self, offset: usize, length: usize) -> Option<&'a [u8]> {
        if !self.is_valid(offset, length) {
            return None;
        }
        Some(&self.data[offset..offset + length])
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.bytes(offset, 1).map(|b| b[0])
    }

    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        self.bytes(offset, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a packed 24-bit little-endian value (FFS sizes, NVAR next links)
    pub fn read_u24(&self, offset: usize) -> Option<u32> {
        self.bytes(offset, 3)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.bytes(offset, 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a raw on-disk GUID (mixed-endian EFI_GUID layout)
    pub fn read_guid(&self, offset: usize) -> Option<[u8; GUID_SIZE]> {
        let mut guid = [0u8; GUID_SIZE];
        guid.copy_from_slice(self.bytes(offset, GUID_SIZE)?);
        Some(guid)
    }

    /// Find the first NUL byte in `[start, end)`, returning its offset
    pub fn find_nul(&self, start: usize, end: usize) -> Option<usize> {
        let length = end.checked_sub(start)?;
        self.bytes(start, length)?
            .iter()
            .position(|&b| b == 0)
            .map(|pos| start + pos)
    }
}

/// Align a value up to the given alignment (must be a power of 2)
pub fn align_up(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}
