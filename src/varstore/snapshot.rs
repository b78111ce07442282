//! JSON snapshot of the variable store
//!
//! The whole store is persisted as one document:
//!
//! ```json
//! {
//!   "variables": [
//!     {
//!       "name": "NetworkStackVar",
//!       "guid": "D1405D16-7AFC-4695-BB12-41459D3695A2",
//!       "attr": 3,
//!       "data": "0101000100010000"
//!     }
//!   ]
//! }
//! ```
//!
//! Writes replace the file in place; a crash in the middle of a write can
//! leave a truncated snapshot behind.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FormatError, Result, VariableKey, VariableValue, Variables};

/// Root of the snapshot document
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    variables: Vec<SnapshotEntry>,
}

/// One persisted variable
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    name: String,
    guid: String,
    attr: u32,
    data: String,
}

impl SnapshotEntry {
    fn from_variable(key: &VariableKey, value: &VariableValue) -> Self {
        Self {
            name: key.name.clone(),
            guid: format!("{:X}", key.guid.hyphenated()),
            attr: value.attributes,
            data: bin_to_hex(&value.data),
        }
    }

    fn into_variable(self) -> core::result::Result<(VariableKey, VariableValue), FormatError> {
        if self.name.is_empty() {
            return Err(FormatError::InvalidName);
        }
        let guid = Uuid::parse_str(&self.guid).map_err(|_| FormatError::InvalidGuid)?;
        let data = hex_to_bin(&self.data)?;

        Ok((
            VariableKey {
                name: self.name,
                guid,
            },
            VariableValue {
                attributes: self.attr,
                data,
            },
        ))
    }
}

/// Convert binary data to an uppercase hex string without separators
pub fn bin_to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Convert a hex string to binary data.
///
/// Whitespace and dashes between byte pairs are skipped; each byte must be
/// given as two adjacent hex digits.
pub fn hex_to_bin(hex: &str) -> core::result::Result<Vec<u8>, FormatError> {
    if hex.is_empty() {
        return Err(FormatError::InvalidData("string is empty"));
    }

    let mut data = Vec::with_capacity(hex.len() / 2);
    let mut chars = hex.chars();

    loop {
        // Skip spaces and dashes
        let high = match chars.find(|c| !c.is_whitespace() && *c != '-') {
            Some(c) => c,
            None => break,
        };
        let low = chars
            .next()
            .ok_or(FormatError::InvalidData("odd number of digits"))?;

        let high = high
            .to_digit(16)
            .ok_or(FormatError::InvalidData("unacceptable character"))?;
        let low = low
            .to_digit(16)
            .ok_or(FormatError::InvalidData("unacceptable character"))?;
        data.push(((high << 4) | low) as u8);
    }

    if data.is_empty() {
        return Err(FormatError::InvalidData("no data"));
    }
    Ok(data)
}

/// Serialize variables into a snapshot document
pub fn to_json(variables: &Variables) -> core::result::Result<Vec<u8>, FormatError> {
    let snapshot = SnapshotFile {
        variables: variables
            .iter()
            .map(|(key, value)| SnapshotEntry::from_variable(key, value))
            .collect(),
    };
    serde_json::to_vec_pretty(&snapshot).map_err(|e| FormatError::Snapshot(e.to_string()))
}

/// Deserialize variables from a snapshot document.
///
/// If a key appears more than once, the first entry wins.
pub fn from_json(json: &[u8]) -> core::result::Result<Variables, FormatError> {
    let snapshot: SnapshotFile =
        serde_json::from_slice(json).map_err(|e| FormatError::Snapshot(e.to_string()))?;

    let mut variables = Variables::new();
    for entry in snapshot.variables {
        let (key, value) = entry.into_variable()?;
        variables.entry(key).or_insert(value);
    }
    Ok(variables)
}

/// Load variables from a JSON file
pub fn load_variables(path: &Path) -> Result<Variables> {
    let json = fs::read(path)?;
    Ok(from_json(&json)?)
}

/// Save variables to a JSON file, creating parent directories as needed
pub fn save_variables(variables: &Variables, path: &Path) -> Result<()> {
    let json = to_json(variables)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)?;
    Ok(())
}
