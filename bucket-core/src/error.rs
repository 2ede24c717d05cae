//! Error types for bucket-core
//!
//! Provides a unified error type for codec, metadata and key operations.

use thiserror::Error;

/// Result type alias for bucket-core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Unified error type for ledger primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    // ===== Codec Errors =====
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unexpected end of input while decoding {0}")]
    UnexpectedEof(&'static str),

    #[error("Unsupported type shape: {0}")]
    UnsupportedShape(String),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    // ===== Metadata Errors =====
    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Unsupported metadata version: {0}")]
    UnsupportedMetadataVersion(u32),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Unknown storage item: {module}.{item}")]
    UnknownStorageItem { module: String, item: String },

    #[error("Unknown call: {module}.{method}")]
    UnknownCall { module: String, method: String },

    #[error("Unknown event at index {module_index}:{event_index}")]
    UnknownEvent { module_index: u8, event_index: u8 },

    // ===== Key Errors =====
    #[error("Storage key arity mismatch for {item}: expected {expected} keys, got {actual}")]
    KeyArity {
        item: String,
        expected: usize,
        actual: usize,
    },

    #[error("{call} takes {expected} arguments, got {actual}")]
    ArgumentCount {
        call: String,
        expected: usize,
        actual: usize,
    },

    // ===== Address Errors =====
    #[error("Invalid SS58 address: {0}")]
    InvalidAddress(String),

    #[error("Invalid account id length: expected 32, got {0}")]
    InvalidAccountLength(usize),
}

impl From<parity_scale_codec::Error> for CoreError {
    fn from(err: parity_scale_codec::Error) -> Self {
        CoreError::Codec(err.to_string())
    }
}

impl From<hex::FromHexError> for CoreError {
    fn from(err: hex::FromHexError) -> Self {
        CoreError::InvalidHex(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::KeyArity {
            item: "FillerMap".to_string(),
            expected: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Storage key arity mismatch for FillerMap: expected 2 keys, got 1"
        );
    }

    #[test]
    fn test_error_from_hex() {
        let hex_err = hex::decode("zz").unwrap_err();
        let err: CoreError = hex_err.into();
        assert!(matches!(err, CoreError::InvalidHex(_)));
    }
}
