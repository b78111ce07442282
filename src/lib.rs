//! uefivar - UEFI variable storage for a management controller
//!
//! This library keeps the UEFI variables of a host firmware on behalf of the
//! firmware itself. It decodes NVRAM volumes dumped from the firmware image
//! and keeps a persisted variable store that firmware upgrades can be merged
//! into.

pub mod logger;
pub mod service;
pub mod varstore;

pub use service::{Fault, VariableService};
pub use varstore::{VarStoreError, VariableKey, VariableStore, VariableValue, Variables};
