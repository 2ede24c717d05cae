//! Storage key derivation
//!
//! key = twox128(module prefix) ++ twox128(item) ++ hasher_1(key_1) ++ ... ++ hasher_n(key_n)

use std::fmt;

use crate::error::{CoreError, Result};
use crate::hashing::twox_128;
use crate::metadata::Metadata;
use crate::types::to_hex;

/// A fully derived storage key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(pub Vec<u8>);

impl StorageKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.to_hex())
    }
}

/// Prefix shared by every key of a storage item
pub fn item_prefix(module_prefix: &str, item: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(&twox_128(module_prefix.as_bytes()));
    out.extend_from_slice(&twox_128(item.as_bytes()));
    out
}

/// Derive the key for `module.item` from SCALE-encoded key arguments
///
/// The number of arguments must equal the item's declared key count.
pub fn storage_key(
    metadata: &Metadata,
    module: &str,
    item: &str,
    keys: &[Vec<u8>],
) -> Result<StorageKey> {
    let (m, entry) = metadata.storage_entry(module, item)?;

    if keys.len() != entry.arity() {
        return Err(CoreError::KeyArity {
            item: format!("{}.{}", module, item),
            expected: entry.arity(),
            actual: keys.len(),
        });
    }

    let mut out = item_prefix(&m.storage_prefix, &entry.name);
    for (hasher, key) in entry.hashers.iter().zip(keys) {
        out.extend(hasher.hash(key));
    }
    Ok(StorageKey(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::StorageHasher;
    use crate::metadata::{ModuleMetadata, StorageEntry};

    fn metadata() -> Metadata {
        Metadata::new(vec![
            ModuleMetadata::new("System", 0)
                .with_storage(StorageEntry::plain("Events"))
                .with_storage(StorageEntry::map(
                    "Account",
                    vec![StorageHasher::Blake2_128Concat],
                )),
            ModuleMetadata::new("FileBank", 9).with_storage(StorageEntry::map(
                "FillerMap",
                vec![StorageHasher::Blake2_128Concat, StorageHasher::Blake2_128Concat],
            )),
        ])
    }

    #[test]
    fn test_plain_key() {
        let key = storage_key(&metadata(), "System", "Events", &[]).unwrap();
        assert_eq!(
            key.to_hex(),
            "0x26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7"
        );
    }

    #[test]
    fn test_single_map_key() {
        let account = [0xd4u8; 32].to_vec();
        let key = storage_key(&metadata(), "System", "Account", &[account.clone()]).unwrap();
        assert!(key.to_hex().starts_with(
            "0x26aa394eea5630e07c48ae0c9558cef7b99d880ec681799c0cf30e8886371da9"
        ));
        assert_eq!(key.as_bytes().len(), 32 + 16 + 32);
        assert_eq!(&key.as_bytes()[48..], &account[..]);
    }

    #[test]
    fn test_composite_key() {
        let owner = vec![1u8; 32];
        let filler = vec![2u8; 64];
        let key = storage_key(&metadata(), "FileBank", "FillerMap", &[owner.clone(), filler.clone()])
            .unwrap();

        let bytes = key.as_bytes();
        assert_eq!(bytes.len(), 32 + (16 + 32) + (16 + 64));
        assert_eq!(&bytes[48..80], &owner[..]);
        assert_eq!(&bytes[96..], &filler[..]);
    }

    #[test]
    fn test_arity_mismatch() {
        let err = storage_key(&metadata(), "FileBank", "FillerMap", &[vec![1u8; 32]]).unwrap_err();
        assert_eq!(
            err,
            CoreError::KeyArity {
                item: "FileBank.FillerMap".to_string(),
                expected: 2,
                actual: 1,
            }
        );

        assert!(storage_key(&metadata(), "System", "Events", &[vec![0]]).is_err());
    }

    #[test]
    fn test_unknown_item() {
        assert!(matches!(
            storage_key(&metadata(), "System", "Nope", &[]),
            Err(CoreError::UnknownStorageItem { .. })
        ));
    }
}
