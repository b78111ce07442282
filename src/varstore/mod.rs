//! UEFI Variable Store
//!
//! This module holds the variable model shared by the NVRAM decoder and the
//! persisted store:
//!
//! - [`buffer`]: range-checked view over untrusted image bytes
//! - [`volume`]: firmware volume / FFS envelope unwrapping
//! - [`nvar`]: NVAR record list decoder
//! - [`snapshot`]: JSON snapshot codec
//! - [`storage`]: snapshot backends (file, memory)
//! - [`store`]: the variable store with CRUD and cross-version merge
//!
//! # Data flow
//!
//! ```text
//! firmware dump --> volume::unpack_volume --> nvar::parse_nvram --> Variables
//!                                                                     |
//!                      store::VariableStore (import / update) <-------+
//!                                |
//!                      storage::SnapshotBackend (JSON file)
//! ```

pub mod buffer;
pub mod nvar;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_image;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use uuid::Uuid;

pub use nvar::parse_nvram;
pub use snapshot::{load_variables, save_variables};
pub use storage::{FileBackend, SnapshotBackend};
pub use store::VariableStore;
pub use volume::{parse_volume, parse_volume_file};

/// Default path of the persisted variable snapshot
pub const DEFAULT_STORAGE_FILE: &str = "/var/lib/uefivar.json";

/// Name of the variable holding the firmware's default variable set
pub const STD_DEFAULTS_NAME: &str = "StdDefaults";

/// Vendor GUID of the StdDefaults variable: {4599d26f-1a11-49b8-b91f-858745cff824}
pub const STD_DEFAULTS_GUID: Uuid = Uuid::from_bytes([
    0x45, 0x99, 0xD2, 0x6F, 0x1A, 0x11, 0x49, 0xB8, 0xB9, 0x1F, 0x85, 0x87, 0x45, 0xCF, 0xF8, 0x24,
]);

/// Unique variable key
///
/// Keys are ordered GUID-major: raw GUID bytes first, then the name. This is
/// the order used when enumerating the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableKey {
    /// Variable name
    pub name: String,
    /// Vendor GUID (flat RFC 4122 byte order)
    pub guid: Uuid,
}

impl VariableKey {
    pub fn new(name: impl Into<String>, guid: Uuid) -> Self {
        Self {
            name: name.into(),
            guid,
        }
    }

    /// Key of the StdDefaults variable
    pub fn std_defaults() -> Self {
        Self::new(STD_DEFAULTS_NAME, STD_DEFAULTS_GUID)
    }
}

impl Ord for VariableKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.guid
            .as_bytes()
            .cmp(other.guid.as_bytes())
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for VariableKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Value of a UEFI variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableValue {
    /// UEFI attributes (EFI_VARIABLE_* flags)
    pub attributes: u32,
    /// Raw data
    pub data: Vec<u8>,
}

impl VariableValue {
    pub fn new(attributes: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            attributes,
            data: data.into(),
        }
    }
}

/// UEFI variables container
pub type Variables = BTreeMap<VariableKey, VariableValue>;

/// Malformed input: firmware image, NVAR list or persisted snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Image too small for a firmware volume header
    InvalidVolumeHeader,
    /// Volume is not an FFSv2 file system
    UnsupportedFileSystem,
    /// Volume has no extended header
    ExtHeaderNotFound,
    /// Extended header is out of range
    InvalidExtHeader,
    /// Volume name does not identify an NVRAM volume
    UnsupportedVolume,
    /// FFS file header is out of range
    FfsHeaderNotFound,
    /// FFS file name does not identify an NVRAM file system
    UnsupportedNvramFileSystem,
    /// NVRAM file extends past the end of the image
    UnexpectedEndOfFile,
    /// NVRAM buffer smaller than one record header
    NotEnoughData,
    /// Record header is inconsistent or out of range
    InvalidHeader,
    /// GUID index points outside the GUID table
    GuidNotFound,
    /// Variable name is not terminated inside its record
    NameTooLong,
    /// Variable name is not valid UTF-8
    InvalidNameEncoding,
    /// Value chain is broken or missing
    DataNotFound,
    /// Value record is out of range
    DataOutOfRange,
    /// Value record carries no data
    EmptyValue,
    /// StdDefaults variable missing or empty
    DefaultsNotFound,
    /// Snapshot is not valid JSON or misses a required field
    Snapshot(String),
    /// Snapshot contains an empty variable name
    InvalidName,
    /// Snapshot contains an unparsable GUID
    InvalidGuid,
    /// Snapshot contains malformed hex data
    InvalidData(&'static str),
}

impl core::fmt::Display for FormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidVolumeHeader => write!(f, "invalid volume header"),
            Self::UnsupportedFileSystem => write!(f, "unsupported firmware file system"),
            Self::ExtHeaderNotFound => write!(f, "extended header not found"),
            Self::InvalidExtHeader => write!(f, "invalid extended header"),
            Self::UnsupportedVolume => write!(f, "unsupported volume"),
            Self::FfsHeaderNotFound => write!(f, "FFS file header not found"),
            Self::UnsupportedNvramFileSystem => write!(f, "unsupported NVRAM file system"),
            Self::UnexpectedEndOfFile => write!(f, "unexpected end of NVRAM file"),
            Self::NotEnoughData => write!(f, "not enough data in NVRAM"),
            Self::InvalidHeader => write!(f, "invalid variable header"),
            Self::GuidNotFound => write!(f, "GUID not found"),
            Self::NameTooLong => write!(f, "variable name too long"),
            Self::InvalidNameEncoding => write!(f, "variable name is not valid UTF-8"),
            Self::DataNotFound => write!(f, "variable data not found"),
            Self::DataOutOfRange => write!(f, "variable data out of range"),
            Self::EmptyValue => write!(f, "value data is empty"),
            Self::DefaultsNotFound => write!(f, "{} not found", STD_DEFAULTS_NAME),
            Self::Snapshot(msg) => write!(f, "JSON: {}", msg),
            Self::InvalidName => write!(f, "JSON: invalid variable name"),
            Self::InvalidGuid => write!(f, "JSON: invalid variable GUID"),
            Self::InvalidData(reason) => write!(f, "JSON: invalid data: {}", reason),
        }
    }
}

impl std::error::Error for FormatError {}

/// Error types for variable store operations
#[derive(Debug)]
pub enum VarStoreError {
    /// Malformed firmware image or snapshot
    Format(FormatError),
    /// File open/read/write failure
    System(std::io::Error),
}

impl core::fmt::Display for VarStoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Format(e) => write!(f, "format error: {}", e),
            Self::System(e) => write!(f, "system error: {}", e),
        }
    }
}

impl std::error::Error for VarStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Format(e) => Some(e),
            Self::System(e) => Some(e),
        }
    }
}

impl From<FormatError> for VarStoreError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

impl From<std::io::Error> for VarStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::System(e)
    }
}

/// Result type for variable store operations
pub type Result<T> = core::result::Result<T, VarStoreError>;
