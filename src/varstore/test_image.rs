//! Synthetic firmware images for tests
//!
//! Builds NVAR record lists (with their trailing GUID table) and wraps them in
//! the firmware volume / FFS envelopes expected by `volume::unpack_volume`.

use uuid::Uuid;

use super::nvar::{FLAG_DATA_ONLY, FLAG_VALID, LAST_NODE, NODE_HEADER_SIZE, NVAR_SIGNATURE};
use super::volume::{
    EXT_HEADER_SIZE, FFS_FILE_SYSTEM2_GUID, FFS_HEADER_SIZE, FV_HEADER_SIZE, NVRAM_FFS_GUID,
    NVRAM_VOLUME_GUID,
};

/// Vendor GUID of NetworkStackVar: {d1405d16-7afc-4695-bb12-41459d3695a2}
pub const NETWORK_STACK_GUID: Uuid = Uuid::from_bytes([
    0xd1, 0x40, 0x5d, 0x16, 0x7a, 0xfc, 0x46, 0x95, 0xbb, 0x12, 0x41, 0x45, 0x9d, 0x36, 0x95, 0xa2,
]);

/// Offset of the extended header in built volumes
pub const EXT_HEADER_OFFSET: usize = 0x48;

/// Offset of the FFS file header in built volumes (8-byte aligned)
pub const FFS_OFFSET: usize = 0x60;

/// Builder for an NVAR record list
#[derive(Default)]
pub struct NvramBuilder {
    records: Vec<u8>,
    guids: Vec<Uuid>,
}

impl NvramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a raw record: header followed by `body`
    pub fn record(flags: u8, next: u32, body: &[u8]) -> Vec<u8> {
        let size = (NODE_HEADER_SIZE + body.len()) as u16;
        let mut record = Vec::with_capacity(size as usize);
        record.extend_from_slice(&NVAR_SIGNATURE.to_le_bytes());
        record.extend_from_slice(&size.to_le_bytes());
        record.extend_from_slice(&next.to_le_bytes()[..3]);
        record.push(flags);
        record.extend_from_slice(body);
        record
    }

    fn guid_index(&mut self, guid: Uuid) -> u8 {
        match self.guids.iter().position(|g| *g == guid) {
            Some(index) => index as u8,
            None => {
                self.guids.push(guid);
                (self.guids.len() - 1) as u8
            }
        }
    }

    fn definition_body(&mut self, name: &str, guid: Uuid, data: &[u8]) -> Vec<u8> {
        let mut body = vec![self.guid_index(guid)];
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(data);
        body
    }

    /// Append a variable whose value lives in its definition record
    pub fn variable(mut self, name: &str, guid: Uuid, flags: u8, data: &[u8]) -> Self {
        let body = self.definition_body(name, guid, data);
        self.records
            .extend_from_slice(&Self::record(flags, LAST_NODE, &body));
        self
    }

    /// Append a variable updated in place by the firmware.
    ///
    /// The definition record carries `segments[0]`, each following data-only
    /// record carries the next segment; the last segment is the current value.
    pub fn chained_variable(
        mut self,
        name: &str,
        guid: Uuid,
        flags: u8,
        segments: &[&[u8]],
    ) -> Self {
        let body = self.definition_body(name, guid, segments[0]);
        let mut chain = vec![(flags, body)];
        for segment in &segments[1..] {
            chain.push((FLAG_VALID | FLAG_DATA_ONLY, segment.to_vec()));
        }

        let last = chain.len() - 1;
        for (i, (flags, body)) in chain.into_iter().enumerate() {
            let next = if i == last {
                LAST_NODE
            } else {
                (NODE_HEADER_SIZE + body.len()) as u32
            };
            self.records
                .extend_from_slice(&Self::record(flags, next, &body));
        }
        self
    }

    /// Record list, free space, then the GUID table with index 0 last
    pub fn build(self) -> Vec<u8> {
        let mut nvram = self.records;
        nvram.extend_from_slice(&[0xFF; 16]);
        for guid in self.guids.iter().rev() {
            nvram.extend_from_slice(&guid.to_bytes_le());
        }
        nvram
    }
}

/// Wrap an NVAR list into FV header, extended header and FFS file header
pub fn build_volume(nvram: &[u8]) -> Vec<u8> {
    let payload_start = FFS_OFFSET + FFS_HEADER_SIZE;
    let mut image = vec![0u8; payload_start];

    // EFI_FIRMWARE_VOLUME_HEADER
    image[0x10..0x20].copy_from_slice(FFS_FILE_SYSTEM2_GUID.as_bytes());
    image[0x28..0x2C].copy_from_slice(b"_FVH");
    image[0x30..0x32].copy_from_slice(&(EXT_HEADER_OFFSET as u16).to_le_bytes());
    image[0x34..0x36].copy_from_slice(&(EXT_HEADER_OFFSET as u16).to_le_bytes());
    image[0x37] = 0x02;
    debug_assert!(FV_HEADER_SIZE <= EXT_HEADER_OFFSET);

    // EFI_FIRMWARE_VOLUME_EXT_HEADER
    let ext = EXT_HEADER_OFFSET;
    image[ext..ext + 16].copy_from_slice(NVRAM_VOLUME_GUID.as_bytes());
    image[ext + 16..ext + 20].copy_from_slice(&(EXT_HEADER_SIZE as u32).to_le_bytes());

    // EFI_FFS_FILE_HEADER
    let ffs = FFS_OFFSET;
    let file_size = (FFS_HEADER_SIZE + nvram.len()) as u32;
    image[ffs..ffs + 16].copy_from_slice(NVRAM_FFS_GUID.as_bytes());
    image[ffs + 0x14..ffs + 0x17].copy_from_slice(&file_size.to_le_bytes()[..3]);

    image.extend_from_slice(nvram);
    image.extend_from_slice(&[0xFF; 32]);
    image
}
