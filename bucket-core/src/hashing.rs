//! Storage hashers
//!
//! The ledger derives storage keys with a fixed family of hashers. Which hasher
//! applies to which key is declared per item in the runtime metadata.

use blake2::digest::consts::{U16, U32, U64};
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Hasher applied to one encoded storage-map key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageHasher {
    Blake2_128,
    Blake2_256,
    Blake2_128Concat,
    Twox128,
    Twox256,
    Twox64Concat,
    Identity,
}

impl StorageHasher {
    /// Hash an encoded key, appending the raw key for the `*Concat` hashers
    pub fn hash(&self, encoded: &[u8]) -> Vec<u8> {
        match self {
            StorageHasher::Blake2_128 => blake2_128(encoded).to_vec(),
            StorageHasher::Blake2_256 => blake2_256(encoded).to_vec(),
            StorageHasher::Blake2_128Concat => {
                let mut out = Vec::with_capacity(16 + encoded.len());
                out.extend_from_slice(&blake2_128(encoded));
                out.extend_from_slice(encoded);
                out
            }
            StorageHasher::Twox128 => twox_128(encoded).to_vec(),
            StorageHasher::Twox256 => twox_256(encoded).to_vec(),
            StorageHasher::Twox64Concat => {
                let mut out = Vec::with_capacity(8 + encoded.len());
                out.extend_from_slice(&twox_64(encoded));
                out.extend_from_slice(encoded);
                out
            }
            StorageHasher::Identity => encoded.to_vec(),
        }
    }

    /// Whether the original key can be recovered from the hashed output
    pub fn is_transparent(&self) -> bool {
        matches!(
            self,
            StorageHasher::Blake2_128Concat | StorageHasher::Twox64Concat | StorageHasher::Identity
        )
    }
}

fn xx(seed: u64, data: &[u8]) -> [u8; 8] {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(data);
    hasher.finish().to_le_bytes()
}

/// 64-bit xxHash, seed 0
pub fn twox_64(data: &[u8]) -> [u8; 8] {
    xx(0, data)
}

/// Two concatenated xxHash64 rounds with seeds 0 and 1
pub fn twox_128(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&xx(0, data));
    out[8..].copy_from_slice(&xx(1, data));
    out
}

/// Four concatenated xxHash64 rounds with seeds 0..4
pub fn twox_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (seed, chunk) in out.chunks_mut(8).enumerate() {
        chunk.copy_from_slice(&xx(seed as u64, data));
    }
    out
}

pub fn blake2_128(data: &[u8]) -> [u8; 16] {
    let digest = Blake2b::<U16>::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let digest = Blake2b::<U32>::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn blake2_512(data: &[u8]) -> [u8; 64] {
    let digest = Blake2b::<U64>::digest(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twox_128_known_prefixes() {
        assert_eq!(
            hex::encode(twox_128(b"System")),
            "26aa394eea5630e07c48ae0c9558cef7"
        );
        assert_eq!(
            hex::encode(twox_128(b"Account")),
            "b99d880ec681799c0cf30e8886371da9"
        );
        assert_eq!(
            hex::encode(twox_128(b"Events")),
            "80d41e5e16056765bc8461851072c9d7"
        );
    }

    #[test]
    fn test_concat_hashers_keep_key() {
        let key = [7u8; 32];

        let hashed = StorageHasher::Blake2_128Concat.hash(&key);
        assert_eq!(hashed.len(), 48);
        assert_eq!(&hashed[16..], &key[..]);

        let hashed = StorageHasher::Twox64Concat.hash(&key);
        assert_eq!(hashed.len(), 40);
        assert_eq!(&hashed[8..], &key[..]);

        assert_eq!(StorageHasher::Identity.hash(&key), key.to_vec());
    }

    #[test]
    fn test_opaque_hasher_lengths() {
        assert_eq!(StorageHasher::Blake2_128.hash(b"x").len(), 16);
        assert_eq!(StorageHasher::Blake2_256.hash(b"x").len(), 32);
        assert_eq!(StorageHasher::Twox128.hash(b"x").len(), 16);
        assert_eq!(StorageHasher::Twox256.hash(b"x").len(), 32);
        assert!(!StorageHasher::Blake2_256.is_transparent());
    }

    #[test]
    fn test_twox_256_extends_twox_128() {
        let wide = twox_256(b"Sminer");
        let narrow = twox_128(b"Sminer");
        assert_eq!(&wide[..16], &narrow[..]);
    }
}
