//! Runtime metadata model
//!
//! The ledger publishes a self-description of its modules: storage items with
//! their key hashers, callable methods with their arguments, and emitted events
//! with their fields. Everything downstream (storage keys, call encoding, event
//! decoding) is driven by this model rather than by hard-coded indices.
//!
//! [`Metadata::from_bytes`] converts the on-chain SCALE blob; the builder-style
//! constructors on [`ModuleMetadata`] assemble a schema by hand.

mod v14;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hashing::StorageHasher;
use crate::value::{FieldShape, TypeTable};

/// A storage item and the hashers applied to each of its keys
///
/// A plain value has no hashers; a map with N keys has N hashers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub hashers: Vec<StorageHasher>,
}

impl StorageEntry {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hashers: Vec::new(),
        }
    }

    pub fn map(name: impl Into<String>, hashers: Vec<StorageHasher>) -> Self {
        Self {
            name: name.into(),
            hashers,
        }
    }

    /// Number of keys a lookup must supply
    pub fn arity(&self) -> usize {
        self.hashers.len()
    }
}

/// A callable method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub name: String,
    pub index: u8,
    pub args: Vec<FieldShape>,
}

/// An event a module can emit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub name: String,
    pub index: u8,
    pub fields: Vec<FieldShape>,
}

/// Everything the metadata says about one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub index: u8,
    /// Prefix hashed into storage keys (usually the module name)
    pub storage_prefix: String,
    pub storage: Vec<StorageEntry>,
    pub calls: Vec<CallMetadata>,
    pub events: Vec<EventMetadata>,
}

impl ModuleMetadata {
    pub fn new(name: impl Into<String>, index: u8) -> Self {
        let name = name.into();
        Self {
            storage_prefix: name.clone(),
            name,
            index,
            storage: Vec::new(),
            calls: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_storage(mut self, entry: StorageEntry) -> Self {
        self.storage.push(entry);
        self
    }

    /// Add a call; its index is its position among the module's calls
    pub fn with_call(mut self, name: impl Into<String>, args: Vec<FieldShape>) -> Self {
        let index = self.calls.len() as u8;
        self.calls.push(CallMetadata {
            name: name.into(),
            index,
            args,
        });
        self
    }

    /// Add an event; its index is its position among the module's events
    pub fn with_event(mut self, name: impl Into<String>, fields: Vec<FieldShape>) -> Self {
        let index = self.events.len() as u8;
        self.events.push(EventMetadata {
            name: name.into(),
            index,
            fields,
        });
        self
    }

    pub fn storage_entry(&self, item: &str) -> Option<&StorageEntry> {
        self.storage.iter().find(|s| s.name == item)
    }

    pub fn call(&self, method: &str) -> Option<&CallMetadata> {
        self.calls.iter().find(|c| c.name == method)
    }

    pub fn event(&self, name: &str) -> Option<&EventMetadata> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn event_by_index(&self, index: u8) -> Option<&EventMetadata> {
        self.events.iter().find(|e| e.index == index)
    }
}

/// Decoded runtime metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    modules: Vec<ModuleMetadata>,
    /// Registry shapes referenced by call and event fields
    types: TypeTable,
}

impl Metadata {
    pub fn new(modules: Vec<ModuleMetadata>) -> Self {
        Self {
            modules,
            types: TypeTable::default(),
        }
    }

    pub fn with_types(mut self, types: TypeTable) -> Self {
        self.types = types;
        self
    }

    /// Decode the SCALE metadata blob returned by `state_getMetadata`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        v14::decode(bytes)
    }

    pub fn modules(&self) -> &[ModuleMetadata] {
        &self.modules
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn module(&self, name: &str) -> Result<&ModuleMetadata> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| CoreError::UnknownModule(name.to_string()))
    }

    pub fn module_by_index(&self, index: u8) -> Option<&ModuleMetadata> {
        self.modules.iter().find(|m| m.index == index)
    }

    pub fn storage_entry(&self, module: &str, item: &str) -> Result<(&ModuleMetadata, &StorageEntry)> {
        let m = self.module(module)?;
        let entry = m
            .storage_entry(item)
            .ok_or_else(|| CoreError::UnknownStorageItem {
                module: module.to_string(),
                item: item.to_string(),
            })?;
        Ok((m, entry))
    }

    pub fn call(&self, module: &str, method: &str) -> Result<(&ModuleMetadata, &CallMetadata)> {
        let unknown = || CoreError::UnknownCall {
            module: module.to_string(),
            method: method.to_string(),
        };
        let m = self.module(module).map_err(|_| unknown())?;
        let call = m.call(method).ok_or_else(unknown)?;
        Ok((m, call))
    }

    /// Resolve an event by its on-chain indices
    pub fn event(&self, module_index: u8, event_index: u8) -> Result<(&ModuleMetadata, &EventMetadata)> {
        let unknown = || CoreError::UnknownEvent {
            module_index,
            event_index,
        };
        let m = self.module_by_index(module_index).ok_or_else(unknown)?;
        let event = m.event_by_index(event_index).ok_or_else(unknown)?;
        Ok((m, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueShape;

    fn sample() -> Metadata {
        Metadata::new(vec![
            ModuleMetadata::new("System", 0)
                .with_storage(StorageEntry::plain("Number"))
                .with_storage(StorageEntry::map(
                    "Account",
                    vec![StorageHasher::Blake2_128Concat],
                )),
            ModuleMetadata::new("Sminer", 7)
                .with_call("regnstk", vec![FieldShape::named("beneficiary", ValueShape::AccountId)])
                .with_call("exit_miner", vec![])
                .with_event("Registered", vec![FieldShape::named("acc", ValueShape::AccountId)]),
        ])
    }

    #[test]
    fn test_lookup_by_name_and_index() {
        let md = sample();

        let (m, call) = md.call("Sminer", "exit_miner").unwrap();
        assert_eq!(m.index, 7);
        assert_eq!(call.index, 1);

        let (m, event) = md.event(7, 0).unwrap();
        assert_eq!(m.name, "Sminer");
        assert_eq!(event.name, "Registered");

        let (_, entry) = md.storage_entry("System", "Account").unwrap();
        assert_eq!(entry.arity(), 1);
    }

    #[test]
    fn test_unknown_lookups() {
        let md = sample();

        assert!(matches!(
            md.call("Sminer", "fly"),
            Err(CoreError::UnknownCall { .. })
        ));
        assert!(matches!(
            md.call("Nowhere", "fly"),
            Err(CoreError::UnknownCall { .. })
        ));
        assert!(matches!(
            md.storage_entry("System", "Nope"),
            Err(CoreError::UnknownStorageItem { .. })
        ));
        assert!(matches!(md.event(7, 9), Err(CoreError::UnknownEvent { .. })));
    }
}
