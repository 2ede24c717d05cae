//! Chain client errors

use bucket_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors surfaced by the session, state reader, call builder and engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Transport unreachable, a session fact could not be fetched, or the
    /// ledger rejected the call before or at submission
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Account {0} has no on-chain record")]
    UnknownAccount(String),

    #[error("Unsupported operation: {module}.{method}")]
    UnsupportedOperation { module: String, method: String },

    #[error("Identity has no signing key")]
    NotASigner,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// Endpoint does not serve the expected chain
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Status subscription failed: {0}")]
    Subscription(String),

    #[error("Timed out waiting for inclusion")]
    Timeout,

    #[error("Included in block {0} without the expected event")]
    SemanticFailure(String),
}

impl ChainError {
    pub fn connection(msg: impl Into<String>) -> Self {
        ChainError::Connection(msg.into())
    }

    /// Whether the call may or may not have taken effect on chain
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ChainError::Subscription(_) | ChainError::Timeout)
    }
}

impl From<CoreError> for ChainError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownCall { module, method } => {
                ChainError::UnsupportedOperation { module, method }
            }
            CoreError::UnknownStorageItem { module, item } => ChainError::UnsupportedOperation {
                module,
                method: item,
            },
            CoreError::UnknownModule(module) => ChainError::UnsupportedOperation {
                module,
                method: String::new(),
            },
            CoreError::KeyArity { .. } | CoreError::ArgumentCount { .. } => {
                ChainError::InvalidArguments(err.to_string())
            }
            other => ChainError::Decode(other.to_string()),
        }
    }
}

impl From<parity_scale_codec::Error> for ChainError {
    fn from(err: parity_scale_codec::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_call_maps_to_unsupported() {
        let err: ChainError = CoreError::UnknownCall {
            module: "Sminer".to_string(),
            method: "fly".to_string(),
        }
        .into();
        assert_eq!(
            err,
            ChainError::UnsupportedOperation {
                module: "Sminer".to_string(),
                method: "fly".to_string()
            }
        );
    }

    #[test]
    fn test_ambiguity() {
        assert!(ChainError::Timeout.is_ambiguous());
        assert!(ChainError::Subscription("closed".into()).is_ambiguous());
        assert!(!ChainError::SemanticFailure("0x00".into()).is_ambiguous());
        assert!(!ChainError::NotASigner.is_ambiguous());
    }
}
