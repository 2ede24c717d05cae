//! Panic boundary for public chain operations
//!
//! A panic inside the client (a decoder bug, an unexpected runtime shape) is
//! turned into a connection error at the public API instead of unwinding into
//! the caller's task.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use super::error::{ChainError, Result};

pub async fn guard<T, F>(operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(operation, panic = %message, "Chain operation panicked");
            Err(ChainError::Connection(format!(
                "{} failed unexpectedly: {}",
                operation, message
            )))
        }
    }
}
