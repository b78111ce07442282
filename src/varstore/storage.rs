//! Storage Backend Abstraction
//!
//! This module provides a trait for abstracting where the variable store
//! snapshot lives:
//! - A JSON file on disk (production)
//! - Memory-backed storage (for testing)
//!
//! # Architecture
//!
//! The `SnapshotBackend` trait provides a minimal interface:
//! - Load the last persisted snapshot, if any
//! - Replace the snapshot with a new one
//!
//! The store never writes partial snapshots: every save carries the complete
//! variable set.

use std::path::{Path, PathBuf};

use super::{snapshot, Result, Variables};

/// Snapshot backend trait
///
/// This trait abstracts snapshot persistence, allowing different backends
/// (file, memory) to be used interchangeably by the variable store.
pub trait SnapshotBackend: Send {
    /// Get the backend name (for logging)
    fn name(&self) -> &str;

    /// Load the persisted snapshot
    ///
    /// Returns `Ok(None)` if nothing has been persisted yet.
    ///
    /// # Errors
    /// - `Format` if the snapshot exists but is malformed
    /// - `System` if it cannot be read
    fn load(&mut self) -> Result<Option<Variables>>;

    /// Replace the persisted snapshot with `variables`
    ///
    /// # Errors
    /// - `System` if the snapshot cannot be written
    fn save(&mut self, variables: &Variables) -> Result<()>;
}

/// JSON file backend
pub struct FileBackend {
    path: PathBuf,
    name: String,
}

impl FileBackend {
    /// Create a backend persisting to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    /// Get the snapshot path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self) -> Result<Option<Variables>> {
        if !self.path.exists() {
            return Ok(None);
        }
        snapshot::load_variables(&self.path).map(Some)
    }

    fn save(&mut self, variables: &Variables) -> Result<()> {
        snapshot::save_variables(variables, &self.path)
    }
}

/// Memory-backed snapshot backend for testing
///
/// Keeps the serialized JSON document and counts how many times it was
/// written.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBackend {
    /// Serialized snapshot
    document: Option<Vec<u8>>,
    /// Number of completed saves
    writes: usize,
    /// Fail every save (simulates a read-only file system)
    fail_writes: bool,
}

#[cfg(test)]
impl MemoryBackend {
    /// Create an empty memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory backend holding an existing snapshot
    pub fn with_variables(variables: &Variables) -> Self {
        Self {
            document: Some(snapshot::to_json(variables).unwrap()),
            ..Self::default()
        }
    }

    /// Set write failure mode
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of completed saves
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Decode the persisted snapshot
    pub fn persisted(&self) -> Option<Variables> {
        self.document
            .as_ref()
            .map(|doc| snapshot::from_json(doc).unwrap())
    }
}

#[cfg(test)]
impl SnapshotBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&mut self) -> Result<Option<Variables>> {
        match &self.document {
            Some(doc) => Ok(Some(snapshot::from_json(doc)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, variables: &Variables) -> Result<()> {
        if self.fail_writes {
            return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into());
        }
        self.document = Some(snapshot::to_json(variables)?);
        self.writes += 1;
        Ok(())
    }
}
