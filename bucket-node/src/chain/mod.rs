//! Storage Miner Ledger Integration
//!
//! This module connects the miner to the ledger:
//! - Session lifecycle (metadata, genesis, runtime version, health, reconnect)
//! - Chain-state queries keyed by runtime metadata
//! - Building and signing calls with the account's on-chain nonce
//! - Submission with inclusion tracking and event-based confirmation
//!
//! # Architecture
//!
//! A [`Session`] is shared by a [`StateReader`], a [`CallBuilder`] and a
//! [`SubmissionEngine`]. Miner operations (registration, proofs, rewards) are
//! thin descriptions handed to the engine: a [`Call`] plus the
//! [`ConfirmationRule`] that decides whether it took effect.
//!
//! # Example
//!
//! ```rust,ignore
//! use bucket_node::chain::ChainClient;
//!
//! let client = ChainClient::connect(&config.chain).await?;
//!
//! if !client.is_registered().await? {
//!     let outcome = client.register(None, "10.0.0.1:15001", 2_000).await?;
//!     outcome.into_result()?;
//! }
//!
//! client.claim_if_available().await?;
//! ```

mod boundary;
pub mod builder;
mod client;
pub mod engine;
mod error;
pub mod keyring;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod proofs;
mod registration;
mod rewards;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;
pub mod ws;

// Re-export main client
pub use client::ChainClient;

pub use builder::{AccountIdentity, Call, CallBuilder, EraPolicy, SignOptions, SignedCall};
pub use engine::{
    ConfirmationOutcome, ConfirmationRule, EventExpectation, Operation, SubmissionEngine,
};
pub use error::{ChainError, Result};
pub use session::{Session, SessionFacts};
pub use state::StateReader;
pub use transport::{Connector, LedgerTransport, RuntimeVersion, TxStatus};
pub use ws::{WsConnector, WsTransport};

// Re-export operations for advanced use
pub use proofs::ProofOps;
pub use registration::RegistrationOps;
pub use rewards::{format_tokens, RewardsOps};

pub use boundary::guard;
