//! Variable service
//!
//! Caller-facing facade over [`VariableStore`]. Arguments arrive in wire form
//! (name string, raw 16-byte GUID) and every failure is reduced to a
//! [`Fault`] the transport can report. The store sits behind a lock held for
//! the full duration of each call, so concurrent callers never observe a
//! half-applied mutation.

use std::path::Path;

use spin::Mutex;
use uuid::Uuid;

use crate::varstore::buffer::GUID_SIZE;
use crate::varstore::{
    FileBackend, SnapshotBackend, VarStoreError, VariableKey, VariableStore, VariableValue,
};

/// Fault reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Malformed argument (GUID not 16 bytes)
    InvalidArgument,
    /// Store is empty
    NotAllowed,
    /// Variable not found
    ResourceNotFound,
    /// Decode, persistence or I/O failure
    InternalFailure,
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotAllowed => write!(f, "not allowed"),
            Self::ResourceNotFound => write!(f, "resource not found"),
            Self::InternalFailure => write!(f, "internal failure"),
        }
    }
}

impl std::error::Error for Fault {}

/// Result type for service calls
pub type Result<T> = core::result::Result<T, Fault>;

/// Thread-safe variable service
pub struct VariableService<B: SnapshotBackend = FileBackend> {
    store: Mutex<VariableStore<B>>,
}

impl<B: SnapshotBackend> VariableService<B> {
    pub fn new(store: VariableStore<B>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Get a variable's attributes and data
    pub fn get_variable(&self, name: &str, guid: &[u8]) -> Result<(u32, Vec<u8>)> {
        let store = self.store.lock();
        if store.is_empty() {
            return Err(Fault::NotAllowed);
        }
        let key = make_key(name, guid)?;
        store
            .get(&key)
            .map(|value| (value.attributes, value.data.clone()))
            .ok_or(Fault::ResourceNotFound)
    }

    /// Create or change a variable
    pub fn set_variable(
        &self,
        name: &str,
        guid: &[u8],
        attributes: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        let key = make_key(name, guid)?;
        self.store
            .lock()
            .set(key, VariableValue::new(attributes, data))
            .map_err(internal_failure)
    }

    /// Remove a variable
    pub fn remove_variable(&self, name: &str, guid: &[u8]) -> Result<()> {
        let key = make_key(name, guid)?;
        self.store.lock().remove(&key).map_err(internal_failure)
    }

    /// Get the name and GUID of the variable following the given one.
    ///
    /// An empty name requests the first variable.
    pub fn next_variable(&self, name: &str, guid: &[u8]) -> Result<(String, [u8; GUID_SIZE])> {
        let store = self.store.lock();
        if store.is_empty() {
            return Err(Fault::NotAllowed);
        }
        let key = make_key(name, guid)?;
        store
            .next(&key)
            .map(|next| (next.name.clone(), *next.guid.as_bytes()))
            .ok_or(Fault::ResourceNotFound)
    }

    /// Remove all variables
    pub fn reset(&self) -> Result<()> {
        self.store.lock().reset().map_err(internal_failure)
    }

    /// Adapt stored values to the firmware volume at `path`
    pub fn update_vars(&self, path: &Path) -> Result<()> {
        self.store
            .lock()
            .update_vars_file(path)
            .map_err(internal_failure)
    }

    /// Replace the store with the variables of the firmware volume at `path`
    pub fn import_vars(&self, path: &Path) -> Result<()> {
        self.store
            .lock()
            .import_vars_file(path)
            .map_err(internal_failure)
    }

    /// Snapshot of all variables in key order
    pub fn list(&self) -> Vec<(VariableKey, VariableValue)> {
        self.store
            .lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

fn make_key(name: &str, guid: &[u8]) -> Result<VariableKey> {
    let guid = Uuid::from_slice(guid).map_err(|_| {
        log::error!("Invalid GUID length: {} bytes", guid.len());
        Fault::InvalidArgument
    })?;
    Ok(VariableKey::new(name, guid))
}

fn internal_failure(e: VarStoreError) -> Fault {
    log::error!("Variable store operation failed: {}", e);
    Fault::InternalFailure
}
