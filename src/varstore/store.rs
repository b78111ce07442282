//! Persisted UEFI variable store
//!
//! The store keeps the complete variable set in memory and rewrites the
//! snapshot through its [`SnapshotBackend`] after every mutation. Single
//! variable changes are applied in place and rolled back if the snapshot
//! cannot be written; bulk changes are computed on a copy and only become
//! visible once the snapshot was written. Either way a failed operation
//! leaves both memory and disk as they were.
//!
//! Besides the usual CRUD operations the store reconciles itself against
//! firmware volume dumps:
//!
//! - [`VariableStore::update_vars`] adapts stored values to the layout of a
//!   newer firmware's defaults
//! - [`VariableStore::import_vars`] replaces the store with the contents of
//!   an older firmware's dump

use std::path::Path;

use super::storage::{FileBackend, SnapshotBackend};
use super::{nvar, volume};
use super::{FormatError, Result, VariableKey, VariableValue, Variables};

/// Log target for audit records
pub const AUDIT_TARGET: &str = "audit";

/// UEFI variable store
pub struct VariableStore<B: SnapshotBackend = FileBackend> {
    variables: Variables,
    backend: B,
}

impl<B: SnapshotBackend> VariableStore<B> {
    /// Open the store, loading the last snapshot if there is one.
    ///
    /// # Errors
    /// - `Format` if the snapshot is malformed
    /// - `System` if the snapshot cannot be read
    pub fn open(mut backend: B) -> Result<Self> {
        let variables = match backend.load()? {
            Some(variables) => {
                log::info!(
                    "UEFI settings loaded from {}: {} variables",
                    backend.name(),
                    variables.len()
                );
                variables
            }
            None => {
                log::warn!("UEFI storage is empty ({})", backend.name());
                Variables::new()
            }
        };

        Ok(Self { variables, backend })
    }

    /// Get the snapshot backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Check if the store holds no variables
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Number of stored variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Iterate over all variables in key order
    pub fn iter(&self) -> impl Iterator<Item = (&VariableKey, &VariableValue)> {
        self.variables.iter()
    }

    /// Get the whole variable set
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Get a variable
    pub fn get(&self, key: &VariableKey) -> Option<&VariableValue> {
        self.variables.get(key)
    }

    /// Create or change a variable.
    ///
    /// Setting a value identical to the stored one does nothing.
    pub fn set(&mut self, key: VariableKey, value: VariableValue) -> Result<()> {
        let action = match self.variables.get(&key) {
            None => "Create",
            Some(existing) if *existing == value => return Ok(()),
            Some(_) => "Change",
        };

        let previous = self.variables.insert(key.clone(), value);
        if let Err(e) = self.backend.save(&self.variables) {
            // roll back
            match previous {
                Some(previous) => self.variables.insert(key, previous),
                None => self.variables.remove(&key),
            };
            return Err(e);
        }

        audit_variable(action, &key);
        Ok(())
    }

    /// Remove a variable. Removing an absent variable is not an error.
    pub fn remove(&mut self, key: &VariableKey) -> Result<()> {
        let Some(previous) = self.variables.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.backend.save(&self.variables) {
            self.variables.insert(key.clone(), previous);
            return Err(e);
        }

        audit_variable("Remove", key);
        Ok(())
    }

    /// Get the key following `key`.
    ///
    /// An empty name requests the first key. Returns `None` past the last
    /// key, and for a key that is not in the store.
    pub fn next(&self, key: &VariableKey) -> Option<&VariableKey> {
        if key.name.is_empty() {
            return self.variables.keys().next();
        }
        if !self.variables.contains_key(key) {
            return None;
        }

        use core::ops::Bound::{Excluded, Unbounded};
        self.variables
            .range((Excluded(key), Unbounded))
            .next()
            .map(|(next, _)| next)
    }

    /// Remove all variables
    pub fn reset(&mut self) -> Result<()> {
        self.commit(Variables::new())?;
        log::info!(target: AUDIT_TARGET, "AUDIT: Reset UEFI settings");
        Ok(())
    }

    /// Adapt stored values to a newer firmware.
    ///
    /// `image` is the new firmware's NVRAM volume. For every stored variable
    /// that also has a default in the new image, the default's attributes are
    /// taken over and the data is resized to the default's length: new
    /// trailing bytes come from the default, obsolete ones are dropped, the
    /// existing prefix is kept. Variables are never added or removed.
    pub fn update_vars(&mut self, image: &[u8]) -> Result<()> {
        let image_vars = volume::parse_volume(image)?;
        let defaults = std_defaults(&image_vars)?;

        let mut candidate = self.variables.clone();
        for (key, default) in &defaults {
            let Some(stored) = candidate.get_mut(key) else {
                continue;
            };

            stored.attributes = default.attributes;
            let old_len = stored.data.len();
            let new_len = default.data.len();
            if new_len > old_len {
                stored.data.extend_from_slice(&default.data[old_len..]);
            } else if new_len < old_len {
                stored.data.truncate(new_len);
            }
            log::debug!("Updated {} ({} -> {} bytes)", key.name, old_len, new_len);
        }

        self.commit(candidate)?;
        log::info!(target: AUDIT_TARGET, "AUDIT: Update UEFI settings");
        Ok(())
    }

    /// Replace the store with the variables of an older firmware.
    ///
    /// The defaults found in `image` become the new store, then every other
    /// variable of the image is put on top of them.
    pub fn import_vars(&mut self, image: &[u8]) -> Result<()> {
        let image_vars = volume::parse_volume(image)?;
        let mut candidate = std_defaults(&image_vars)?;

        // only the exact StdDefaults key is dropped
        let sentinel = VariableKey::std_defaults();
        candidate.extend(
            image_vars
                .into_iter()
                .filter(|(key, _)| *key != sentinel),
        );

        self.commit(candidate)?;
        log::info!(target: AUDIT_TARGET, "AUDIT: Import UEFI settings");
        Ok(())
    }

    /// Read a volume file and run [`Self::update_vars`] on it
    pub fn update_vars_file(&mut self, path: &Path) -> Result<()> {
        let image = std::fs::read(path)?;
        self.update_vars(&image)
    }

    /// Read a volume file and run [`Self::import_vars`] on it
    pub fn import_vars_file(&mut self, path: &Path) -> Result<()> {
        let image = std::fs::read(path)?;
        self.import_vars(&image)
    }

    /// Persist `candidate` and make it the current variable set
    fn commit(&mut self, candidate: Variables) -> Result<()> {
        self.backend.save(&candidate)?;
        self.variables = candidate;
        Ok(())
    }
}

/// Decode the default variable set carried by the StdDefaults variable
pub fn std_defaults(variables: &Variables) -> core::result::Result<Variables, FormatError> {
    match variables.get(&VariableKey::std_defaults()) {
        Some(value) if !value.data.is_empty() => nvar::parse_nvram(&value.data),
        _ => Err(FormatError::DefaultsNotFound),
    }
}

fn audit_variable(action: &str, key: &VariableKey) {
    log::info!(
        target: AUDIT_TARGET,
        "AUDIT: {} UEFI setting {} (GUID {:X})",
        action,
        key.name,
        key.guid.hyphenated()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varstore::nvar::{FLAG_RUNTIME, FLAG_VALID};
    use crate::varstore::storage::MemoryBackend;
    use crate::varstore::test_image::{build_volume, NvramBuilder, NETWORK_STACK_GUID};
    use crate::varstore::{VarStoreError, STD_DEFAULTS_GUID, STD_DEFAULTS_NAME};
    use uuid::Uuid;

    const GUID1: Uuid = Uuid::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
    const GUID2: Uuid = Uuid::from_bytes([16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);

    /// Current NetworkStackVar value as recorded in a dump
    const NET_DATA: [u8; 8] = [0x01, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00];
    /// NetworkStackVar default shipped by the firmware
    const NET_DEFAULT: [u8; 8] = [0x01, 0x01, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01];

    fn net_key() -> VariableKey {
        VariableKey::new("NetworkStackVar", NETWORK_STACK_GUID)
    }

    fn empty_store() -> VariableStore<MemoryBackend> {
        VariableStore::open(MemoryBackend::new()).unwrap()
    }

    /// Firmware volume holding NetworkStackVar and Setup, with defaults for
    /// NetworkStackVar and Lang
    fn firmware_image() -> Vec<u8> {
        let defaults = NvramBuilder::new()
            .variable("NetworkStackVar", NETWORK_STACK_GUID, FLAG_VALID, &NET_DEFAULT)
            .variable("Lang", GUID2, FLAG_VALID | FLAG_RUNTIME, b"eng")
            .build();

        let nvram = NvramBuilder::new()
            .variable("NetworkStackVar", NETWORK_STACK_GUID, FLAG_VALID, &NET_DATA)
            .variable("Setup", GUID1, FLAG_VALID | FLAG_RUNTIME, &[0xAA, 0xBB])
            .variable(STD_DEFAULTS_NAME, STD_DEFAULTS_GUID, FLAG_VALID, &defaults)
            .build();

        build_volume(&nvram)
    }

    #[test]
    fn test_open_empty_and_existing() {
        let store = empty_store();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);

        let mut variables = Variables::new();
        variables.insert(VariableKey::new("A", GUID1), VariableValue::new(3, vec![1]));
        let store = VariableStore::open(MemoryBackend::with_variables(&variables)).unwrap();
        assert_eq!(store.variables(), &variables);
    }

    #[test]
    fn test_set_get() {
        let mut store = empty_store();
        let key = VariableKey::new("Var", GUID1);

        assert!(store.get(&key).is_none());
        store.set(key.clone(), VariableValue::new(7, vec![1, 2])).unwrap();
        assert_eq!(store.get(&key), Some(&VariableValue::new(7, vec![1, 2])));
        assert_eq!(store.backend().writes(), 1);

        // change attributes only
        store.set(key.clone(), VariableValue::new(3, vec![1, 2])).unwrap();
        assert_eq!(store.get(&key).unwrap().attributes, 3);
        assert_eq!(store.backend().writes(), 2);
        assert_eq!(store.backend().persisted().unwrap(), *store.variables());
    }

    #[test]
    fn test_identical_set_does_not_persist() {
        let mut store = empty_store();
        let key = VariableKey::new("Var", GUID1);

        store.set(key.clone(), VariableValue::new(7, vec![1, 2])).unwrap();
        store.set(key.clone(), VariableValue::new(7, vec![1, 2])).unwrap();
        assert_eq!(store.backend().writes(), 1);
    }

    #[test]
    fn test_remove() {
        let mut store = empty_store();
        let key = VariableKey::new("Var", GUID1);

        // absent key is a no-op
        store.remove(&key).unwrap();
        assert_eq!(store.backend().writes(), 0);

        store.set(key.clone(), VariableValue::new(7, vec![1])).unwrap();
        store.remove(&key).unwrap();
        assert!(store.get(&key).is_none());
        assert_eq!(store.backend().writes(), 2);
        assert!(store.backend().persisted().unwrap().is_empty());
    }

    #[test]
    fn test_next_enumerates_in_order() {
        let mut store = empty_store();
        let first = VariableKey::new("", GUID1);
        assert!(store.next(&first).is_none());

        for (name, guid) in [("Def", GUID2), ("Abc", GUID2), ("Xyz", GUID1)] {
            store
                .set(VariableKey::new(name, guid), VariableValue::new(7, vec![0]))
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = store.next(&first).cloned();
        while let Some(key) = cursor {
            cursor = store.next(&key).cloned();
            seen.push(key);
        }

        assert_eq!(
            seen,
            vec![
                VariableKey::new("Xyz", GUID1),
                VariableKey::new("Abc", GUID2),
                VariableKey::new("Def", GUID2),
            ]
        );
        let iterated: Vec<_> = store.iter().map(|(key, _)| key.clone()).collect();
        assert_eq!(seen, iterated);
    }

    #[test]
    fn test_next_unknown_key() {
        let mut store = empty_store();
        store
            .set(VariableKey::new("Abc", GUID1), VariableValue::new(7, vec![0]))
            .unwrap();

        // "Abb" would sort before "Abc" but is not stored
        assert!(store.next(&VariableKey::new("Abb", GUID1)).is_none());
    }

    #[test]
    fn test_reset() {
        let mut store = empty_store();
        store
            .set(VariableKey::new("A", GUID1), VariableValue::new(7, vec![0]))
            .unwrap();

        store.reset().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.backend().writes(), 2);
        assert!(store.backend().persisted().unwrap().is_empty());
    }

    #[test]
    fn test_failed_save_keeps_state() {
        let mut store = empty_store();
        let key = VariableKey::new("A", GUID1);
        store.set(key.clone(), VariableValue::new(7, vec![0])).unwrap();

        let mut backend = MemoryBackend::with_variables(store.variables());
        backend.set_fail_writes(true);
        let mut store = VariableStore::open(backend).unwrap();
        let before = store.variables().clone();

        assert!(store.set(key.clone(), VariableValue::new(7, vec![1])).is_err());
        assert!(store.remove(&key).is_err());
        assert!(store.reset().is_err());
        assert!(store.import_vars(&firmware_image()).is_err());
        assert_eq!(store.variables(), &before);
    }

    #[test]
    fn test_failed_save_rolls_back_single_change() {
        let mut backend = MemoryBackend::new();
        backend.set_fail_writes(true);
        let mut store = VariableStore::open(backend).unwrap();
        let key = VariableKey::new("A", GUID1);

        assert!(store.set(key.clone(), VariableValue::new(7, vec![0])).is_err());
        assert!(store.get(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_std_defaults() {
        let image_vars = volume::parse_volume(&firmware_image()).unwrap();
        let defaults = std_defaults(&image_vars).unwrap();
        assert_eq!(defaults.len(), 2);
        assert_eq!(defaults[&net_key()].data, NET_DEFAULT);

        let mut empty = Variables::new();
        assert_eq!(std_defaults(&empty), Err(FormatError::DefaultsNotFound));
        empty.insert(VariableKey::std_defaults(), VariableValue::new(3, vec![]));
        assert_eq!(std_defaults(&empty), Err(FormatError::DefaultsNotFound));
    }

    #[test]
    fn test_update_extends_value() {
        let mut store = empty_store();
        store
            .set(net_key(), VariableValue::new(7, vec![1, 2, 3]))
            .unwrap();
        store
            .set(VariableKey::new("Custom", GUID1), VariableValue::new(7, vec![9]))
            .unwrap();

        store.update_vars(&firmware_image()).unwrap();

        let net = store.get(&net_key()).unwrap();
        assert_eq!(net.data, [1, 2, 3, 1, 0, 1, 1, 1]);
        assert_eq!(net.attributes, 3);
        // untouched and not inserted
        assert_eq!(
            store.get(&VariableKey::new("Custom", GUID1)),
            Some(&VariableValue::new(7, vec![9]))
        );
        assert!(store.get(&VariableKey::new("Lang", GUID2)).is_none());
        assert_eq!(store.len(), 2);
        assert_eq!(store.backend().writes(), 3);
    }

    #[test]
    fn test_update_truncates_value() {
        let mut store = empty_store();
        let stored = [9u8, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0xFF];
        store
            .set(net_key(), VariableValue::new(3, stored.to_vec()))
            .unwrap();

        store.update_vars(&firmware_image()).unwrap();
        assert_eq!(store.get(&net_key()).unwrap().data, stored[..8]);
    }

    #[test]
    fn test_update_keeps_equal_length_value() {
        let mut store = empty_store();
        store
            .set(net_key(), VariableValue::new(7, NET_DATA.to_vec()))
            .unwrap();

        store.update_vars(&firmware_image()).unwrap();
        assert_eq!(store.get(&net_key()), Some(&VariableValue::new(3, NET_DATA.to_vec())));
    }

    #[test]
    fn test_update_without_defaults() {
        let mut store = empty_store();
        store
            .set(net_key(), VariableValue::new(7, vec![1, 2, 3]))
            .unwrap();
        let before = store.variables().clone();

        let image = build_volume(
            &NvramBuilder::new()
                .variable("NetworkStackVar", NETWORK_STACK_GUID, FLAG_VALID, &NET_DATA)
                .build(),
        );
        let err = store.update_vars(&image).unwrap_err();
        assert!(matches!(
            err,
            VarStoreError::Format(FormatError::DefaultsNotFound)
        ));
        assert_eq!(store.variables(), &before);
        assert_eq!(store.backend().writes(), 1);
    }

    #[test]
    fn test_update_rejects_bad_image() {
        let mut store = empty_store();
        assert!(matches!(
            store.update_vars(&[0u8; 16]),
            Err(VarStoreError::Format(FormatError::InvalidVolumeHeader))
        ));
        assert_eq!(store.backend().writes(), 0);
    }

    #[test]
    fn test_import_replaces_store() {
        let mut store = empty_store();
        store
            .set(VariableKey::new("Stale", GUID1), VariableValue::new(7, vec![1]))
            .unwrap();

        store.import_vars(&firmware_image()).unwrap();

        // 2 defaults + 2 recorded variables - 1 shared
        assert_eq!(store.len(), 3);
        assert!(store.get(&VariableKey::std_defaults()).is_none());
        assert!(store.get(&VariableKey::new("Stale", GUID1)).is_none());
        // recorded value wins over the default
        assert_eq!(store.get(&net_key()), Some(&VariableValue::new(3, NET_DATA.to_vec())));
        assert_eq!(
            store.get(&VariableKey::new("Lang", GUID2)),
            Some(&VariableValue::new(7, b"eng".to_vec()))
        );
        assert_eq!(
            store.get(&VariableKey::new("Setup", GUID1)),
            Some(&VariableValue::new(7, vec![0xAA, 0xBB]))
        );
        assert_eq!(store.backend().persisted().unwrap(), *store.variables());
    }

    #[test]
    fn test_import_bad_image_keeps_store() {
        let mut store = empty_store();
        store
            .set(net_key(), VariableValue::new(7, vec![1, 2, 3]))
            .unwrap();
        let before = store.variables().clone();

        assert!(matches!(
            store.import_vars(&[0u8; 16]),
            Err(VarStoreError::Format(FormatError::InvalidVolumeHeader))
        ));

        let mut image = firmware_image();
        image.truncate(image.len() - 64);
        assert!(store.import_vars(&image).is_err());

        let no_defaults = build_volume(
            &NvramBuilder::new()
                .variable("Setup", GUID1, FLAG_VALID, &[1])
                .build(),
        );
        assert!(matches!(
            store.import_vars(&no_defaults),
            Err(VarStoreError::Format(FormatError::DefaultsNotFound))
        ));

        assert_eq!(store.variables(), &before);
        assert_eq!(store.backend().writes(), 1);
    }

    #[test]
    fn test_import_keeps_same_name_under_other_guid() {
        let defaults = NvramBuilder::new()
            .variable("Lang", GUID2, FLAG_VALID, b"eng")
            .build();
        let nvram = NvramBuilder::new()
            .variable(STD_DEFAULTS_NAME, GUID1, FLAG_VALID, &[0x42])
            .variable(STD_DEFAULTS_NAME, STD_DEFAULTS_GUID, FLAG_VALID, &defaults)
            .build();

        let mut store = empty_store();
        store.import_vars(&build_volume(&nvram)).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get(&VariableKey::std_defaults()).is_none());
        assert_eq!(
            store.get(&VariableKey::new(STD_DEFAULTS_NAME, GUID1)),
            Some(&VariableValue::new(3, vec![0x42]))
        );
    }

    #[test]
    fn test_file_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");
        std::fs::write(&path, firmware_image()).unwrap();

        let mut store = empty_store();
        store.import_vars_file(&path).unwrap();
        assert_eq!(store.len(), 3);

        store
            .set(net_key(), VariableValue::new(7, vec![1, 2, 3]))
            .unwrap();
        store.update_vars_file(&path).unwrap();
        assert_eq!(store.get(&net_key()).unwrap().data, [1, 2, 3, 1, 0, 1, 1, 1]);

        let err = store
            .update_vars_file(&dir.path().join("missing.bin"))
            .unwrap_err();
        assert!(matches!(err, VarStoreError::System(_)));
    }
}
