//! Sr25519 keys from secret URIs
//!
//! A secret URI is `<phrase><path>[///<password>]`:
//!
//! - `phrase` is a BIP-39 mnemonic or a `0x`-prefixed 32-byte mini secret.
//!   When empty the well-known development phrase is used, so `//Alice`
//!   names the usual development account.
//! - `path` is a list of junctions, `//hard` or `/soft`. A junction that
//!   parses as an integer is encoded as `u64`, anything else as a string.
//! - `password` salts the mnemonic seed.

use std::fmt;
use std::str::FromStr;

use bucket_core::hashing::blake2_256;
use bucket_core::types::from_hex;
use parity_scale_codec::Encode;
use schnorrkel::derive::{ChainCode, Derivation};
use schnorrkel::{ExpansionMode, Keypair, MiniSecretKey, PublicKey, SecretKey, Signature};

use super::error::{ChainError, Result};

/// Phrase used when a secret URI starts with a path
pub const DEV_PHRASE: &str =
    "bottom drive obey lake curtain smoke basket hold race lonely fit walk";

/// Signing context of the ledger's sr25519 signatures
pub const SIGNING_CONTEXT: &[u8] = b"substrate";

/// One derivation step
#[derive(Clone, PartialEq, Eq)]
pub enum Junction {
    Hard([u8; 32]),
    Soft([u8; 32]),
}

impl Junction {
    fn chain_code(text: &str) -> [u8; 32] {
        let encoded = match text.parse::<u64>() {
            Ok(n) => n.encode(),
            Err(_) => text.encode(),
        };
        if encoded.len() > 32 {
            return blake2_256(&encoded);
        }
        let mut code = [0u8; 32];
        code[..encoded.len()].copy_from_slice(&encoded);
        code
    }

    pub fn hard(text: &str) -> Self {
        Junction::Hard(Self::chain_code(text))
    }

    pub fn soft(text: &str) -> Self {
        Junction::Soft(Self::chain_code(text))
    }
}

impl fmt::Debug for Junction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Junction::Hard(_) => f.write_str("Hard"),
            Junction::Soft(_) => f.write_str("Soft"),
        }
    }
}

/// Parsed secret URI
///
/// Debug output never shows the phrase or password.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretUri {
    phrase: String,
    junctions: Vec<Junction>,
    password: Option<String>,
}

impl SecretUri {
    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    /// Derive the sr25519 keypair this URI names
    pub fn keypair(&self) -> Result<Keypair> {
        let root = self.root_secret()?;
        let secret = self.junctions.iter().fold(root, |secret, junction| match junction {
            Junction::Hard(code) => secret
                .hard_derive_mini_secret_key(Some(ChainCode(*code)), b"")
                .0
                .expand(ExpansionMode::Ed25519),
            Junction::Soft(code) => secret.derived_key_simple(ChainCode(*code), &[]).0,
        });
        Ok(secret.to_keypair())
    }

    fn root_secret(&self) -> Result<SecretKey> {
        let mini = if self.phrase.starts_with("0x") {
            if self.password.is_some() {
                return Err(ChainError::Config(
                    "a password cannot be combined with a hex secret".to_string(),
                ));
            }
            let bytes = from_hex(&self.phrase)
                .map_err(|e| ChainError::Config(format!("invalid hex secret: {}", e)))?;
            MiniSecretKey::from_bytes(&bytes)
                .map_err(|e| ChainError::Config(format!("invalid hex secret: {}", e)))?
        } else {
            let mnemonic = bip39::Mnemonic::parse_normalized(&self.phrase)
                .map_err(|e| ChainError::Config(format!("invalid secret phrase: {}", e)))?;
            let password = self.password.as_deref().unwrap_or("");
            substrate_bip39::mini_secret_from_entropy(&mnemonic.to_entropy(), password)
                .map_err(|e| ChainError::Config(format!("invalid secret phrase: {:?}", e)))?
        };
        Ok(mini.expand(ExpansionMode::Ed25519))
    }
}

impl FromStr for SecretUri {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (rest, password) = match s.split_once("///") {
            Some((rest, password)) => (rest, Some(password.to_string())),
            None => (s, None),
        };

        let (phrase, mut path) = match rest.find('/') {
            Some(at) => rest.split_at(at),
            None => (rest, ""),
        };
        let phrase = match phrase.trim() {
            "" => DEV_PHRASE.to_string(),
            p => p.split_whitespace().collect::<Vec<_>>().join(" "),
        };

        let mut junctions = Vec::new();
        while !path.is_empty() {
            let (hard, tail) = match path.strip_prefix("//") {
                Some(tail) => (true, tail),
                None => (false, &path[1..]),
            };
            let end = tail.find('/').unwrap_or(tail.len());
            let text = &tail[..end];
            if text.is_empty() {
                return Err(ChainError::Config("empty junction in secret uri".to_string()));
            }
            junctions.push(if hard {
                Junction::hard(text)
            } else {
                Junction::soft(text)
            });
            path = &tail[end..];
        }

        Ok(Self {
            phrase,
            junctions,
            password,
        })
    }
}

impl fmt::Debug for SecretUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretUri")
            .field("junctions", &self.junctions)
            .field("password", &self.password.is_some())
            .finish()
    }
}

/// Sign `message` in the ledger's sr25519 context
pub fn sign(keypair: &Keypair, message: &[u8]) -> [u8; 64] {
    let context = schnorrkel::signing_context(SIGNING_CONTEXT);
    keypair.sign(context.bytes(message)).to_bytes()
}

/// Check an sr25519 signature made by `public`
pub fn verify(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let (Ok(public), Ok(signature)) = (
        PublicKey::from_bytes(public),
        Signature::from_bytes(signature),
    ) else {
        return false;
    };
    public
        .verify_simple(SIGNING_CONTEXT, message, &signature)
        .is_ok()
}
