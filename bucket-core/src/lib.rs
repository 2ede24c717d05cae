//! Bucket Core Library
//!
//! Ledger primitives for the bucket storage miner.
//! This crate provides:
//! - Runtime metadata decoding (modules, storage items, calls, events)
//! - Storage key derivation with the ledger's hasher family
//! - Dynamic SCALE value and event log decoding
//! - Signed extrinsic and era encoding
//! - Account ids with SS58 addressing

pub mod error;
pub mod events;
pub mod extrinsic;
pub mod hashing;
pub mod metadata;
pub mod storage_key;
pub mod types;
pub mod value;

pub use error::{CoreError, Result};
pub use events::{decode_events, DecodedEvents, EventRecord, Phase};
pub use extrinsic::{
    encode_call, signing_payload, Era, ExtrinsicParams, SignatureKind, SignedExtrinsic,
};
pub use hashing::StorageHasher;
pub use metadata::{CallMetadata, EventMetadata, Metadata, ModuleMetadata, StorageEntry};
pub use storage_key::{storage_key, StorageKey};
pub use types::{AccountId32, H256};
pub use value::{FieldShape, Primitive, TypeTable, Value, ValueShape, VariantShape};

/// Smallest token unit per whole token (12 decimals)
pub const TOKEN_PRECISION: u128 = 1_000_000_000_000;

/// Convert whole tokens to the smallest unit, saturating on overflow
pub fn tokens_to_units(tokens: u128) -> u128 {
    tokens.saturating_mul(TOKEN_PRECISION)
}
