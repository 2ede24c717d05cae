//! Call Builder & Signer
//!
//! Turns a (module, method, arguments) description into a signed extrinsic:
//! the call is encoded against the session metadata, the signer's sequence
//! number is read from `System.Account`, and the signing payload commits to
//! the session's genesis hash and runtime versions.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bucket_core::hashing::blake2_256;
use bucket_core::types::from_hex;
use bucket_core::{
    encode_call, signing_payload, AccountId32, Era, ExtrinsicParams, SignatureKind,
    SignedExtrinsic, H256,
};
use ed25519_dalek::{Signer, SigningKey};
use parity_scale_codec::Encode;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{ChainError, Result};
use super::keyring::{self, SecretUri};
use super::session::Session;
use super::state::StateReader;

/// A call by name with positional, SCALE-encoded arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub module: String,
    pub method: String,
    pub args: Vec<Vec<u8>>,
}

impl Call {
    pub fn new(module: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument, encoding it
    pub fn arg<T: Encode + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(value.encode());
        self
    }

    /// Append an argument that is already encoded
    pub fn raw_arg(mut self, encoded: Vec<u8>) -> Self {
        self.args.push(encoded);
        self
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.module, self.method)
    }
}

#[derive(Clone)]
enum AccountKey {
    Ed25519(SigningKey),
    Sr25519(schnorrkel::Keypair),
}

/// Account public key plus an optional signing key
///
/// Identities without a key can read state but cannot build calls.
#[derive(Clone)]
pub struct AccountIdentity {
    account: AccountId32,
    key: Option<AccountKey>,
}

impl AccountIdentity {
    pub fn from_signing_key(key: SigningKey) -> Self {
        Self {
            account: AccountId32(key.verifying_key().to_bytes()),
            key: Some(AccountKey::Ed25519(key)),
        }
    }

    pub fn from_sr25519(keypair: schnorrkel::Keypair) -> Self {
        Self {
            account: AccountId32(keypair.public.to_bytes()),
            key: Some(AccountKey::Sr25519(keypair)),
        }
    }

    /// Sr25519 identity from a secret URI such as `<mnemonic>//hard/soft///password`
    pub fn from_secret_uri(uri: &str) -> Result<Self> {
        let keypair = uri.parse::<SecretUri>()?.keypair()?;
        Ok(Self::from_sr25519(keypair))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    /// Parse a 32-byte seed given as hex (with or without `0x`)
    pub fn from_seed_hex(seed: &str) -> Result<Self> {
        let bytes = from_hex(seed.trim())
            .map_err(|e| ChainError::Config(format!("invalid signing seed: {}", e)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            ChainError::Config(format!("signing seed must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Load a keypair file holding a JSON byte array
    ///
    /// Either the 32-byte seed or the 64-byte seed ++ public key form.
    pub fn from_keypair_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ChainError::Config(format!(
                "keypair file not found: {}",
                path.display()
            )));
        }

        let json = std::fs::read_to_string(path)
            .map_err(|e| ChainError::Config(format!("read {}: {}", path.display(), e)))?;
        let bytes: Vec<u8> = serde_json::from_str(&json)
            .map_err(|e| ChainError::Config(format!("parse {}: {}", path.display(), e)))?;

        let identity = match bytes.len() {
            32 | 64 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes[..32]);
                let identity = Self::from_seed(seed);
                if bytes.len() == 64 && bytes[32..] != identity.account.0[..] {
                    return Err(ChainError::Config(format!(
                        "public key in {} does not match its seed",
                        path.display()
                    )));
                }
                identity
            }
            n => {
                return Err(ChainError::Config(format!(
                    "keypair file must hold 32 or 64 bytes, got {}",
                    n
                )))
            }
        };

        info!(
            path = %path.display(),
            account = %identity.account,
            "Loaded signing keypair"
        );
        Ok(identity)
    }

    /// Fresh random identity
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn read_only(account: AccountId32) -> Self {
        Self { account, key: None }
    }

    pub fn account(&self) -> &AccountId32 {
        &self.account
    }

    pub fn is_signer(&self) -> bool {
        self.key.is_some()
    }

    pub fn signature_kind(&self) -> Option<SignatureKind> {
        self.key.as_ref().map(|key| match key {
            AccountKey::Ed25519(_) => SignatureKind::Ed25519,
            AccountKey::Sr25519(_) => SignatureKind::Sr25519,
        })
    }

    fn sign(&self, message: &[u8]) -> Result<(SignatureKind, [u8; 64])> {
        match self.key.as_ref().ok_or(ChainError::NotASigner)? {
            AccountKey::Ed25519(key) => Ok((SignatureKind::Ed25519, key.sign(message).to_bytes())),
            AccountKey::Sr25519(keypair) => {
                Ok((SignatureKind::Sr25519, keyring::sign(keypair, message)))
            }
        }
    }
}

impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("account", &self.account.to_string())
            .field("kind", &self.signature_kind())
            .finish()
    }
}

/// Transaction lifetime policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EraPolicy {
    #[default]
    Immortal,
    /// Valid for about `period` blocks from the best block at signing time
    Mortal { period: u64 },
}

/// Signing parameters not taken from the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignOptions {
    pub era: EraPolicy,
    pub tip: u128,
}

/// A signed, ready-to-submit call
///
/// Submitting consumes it; a resubmission needs a fresh build with a fresh
/// sequence number.
#[derive(Debug)]
pub struct SignedCall {
    call: Call,
    signer: AccountId32,
    nonce: u32,
    era: Era,
    tip: u128,
    hash: H256,
    extrinsic: Vec<u8>,
}

impl SignedCall {
    pub fn call(&self) -> &Call {
        &self.call
    }

    pub fn signer(&self) -> &AccountId32 {
        &self.signer
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn era(&self) -> Era {
        self.era
    }

    pub fn tip(&self) -> u128 {
        self.tip
    }

    /// blake2-256 of the encoded extrinsic
    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn into_extrinsic(self) -> Vec<u8> {
        self.extrinsic
    }
}

/// Builds and signs calls against a session
#[derive(Clone, Debug)]
pub struct CallBuilder {
    session: Arc<Session>,
    state: StateReader,
}

impl CallBuilder {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            state: StateReader::new(session.clone()),
            session,
        }
    }

    /// Encode, read the signer's sequence number and sign
    ///
    /// Fails with `NotASigner` before any I/O when the identity has no key,
    /// and with `UnsupportedOperation` when the metadata lacks the call.
    pub async fn build(
        &self,
        identity: &AccountIdentity,
        call: Call,
        options: &SignOptions,
    ) -> Result<SignedCall> {
        if !identity.is_signer() {
            return Err(ChainError::NotASigner);
        }

        let facts = self.session.facts();
        let call_bytes = encode_call(&facts.metadata, &call.module, &call.method, &call.args)?;

        let nonce = self.state.nonce(identity.account()).await?;
        let (era, checkpoint) = self.era(options.era, facts.genesis_hash).await?;

        let params = ExtrinsicParams {
            era,
            nonce,
            tip: options.tip,
            spec_version: facts.runtime_version.spec_version,
            transaction_version: facts.runtime_version.transaction_version,
            genesis_hash: facts.genesis_hash,
            checkpoint,
        };
        let (kind, signature) = identity.sign(&signing_payload(&call_bytes, &params))?;

        let extrinsic = SignedExtrinsic {
            signer: *identity.account(),
            kind,
            signature,
            era,
            nonce,
            tip: options.tip,
            call: call_bytes,
        }
        .encode();
        let hash = H256(blake2_256(&extrinsic));

        debug!(call = %call.name(), nonce, tx = %hash, "Call signed");

        Ok(SignedCall {
            call,
            signer: *identity.account(),
            nonce,
            era,
            tip: options.tip,
            hash,
            extrinsic,
        })
    }

    async fn era(&self, policy: EraPolicy, genesis: H256) -> Result<(Era, H256)> {
        match policy {
            EraPolicy::Immortal => Ok((Era::Immortal, genesis)),
            EraPolicy::Mortal { period } => {
                let transport = self.session.transport();
                let best = transport
                    .header(None)
                    .await?
                    .ok_or_else(|| ChainError::connection("node returned no best header"))?;
                let era = Era::mortal(period, best.number);
                let birth = era.birth(best.number);
                let checkpoint = transport.block_hash(Some(birth)).await?.ok_or_else(|| {
                    ChainError::connection(format!("node has no hash for block {}", birth))
                })?;
                Ok((era, checkpoint))
            }
        }
    }
}
