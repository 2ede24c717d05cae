//! Common ledger types: account ids, hashes, hex and SS58 helpers

use parity_scale_codec::{Decode, Encode};
use scale_info::TypeInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::hashing::blake2_512;

/// Default SS58 network prefix (generic substrate)
pub const DEFAULT_SS58_PREFIX: u16 = 42;

const SS58_CHECKSUM_PREFIX: &[u8] = b"SS58PRE";
const SS58_CHECKSUM_LEN: usize = 2;

/// Encode bytes as `0x`-prefixed lowercase hex
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode hex with or without a `0x` prefix
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(trimmed)?)
}

/// 32-byte hash (block hash, genesis hash)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Encode, Decode, TypeInfo)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", self.to_hex())
    }
}

impl FromStr for H256 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = from_hex(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CoreError::InvalidHex(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(H256(arr))
    }
}

impl TryFrom<String> for H256 {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<H256> for String {
    fn from(h: H256) -> String {
        h.to_hex()
    }
}

impl From<[u8; 32]> for H256 {
    fn from(bytes: [u8; 32]) -> Self {
        H256(bytes)
    }
}

/// 32-byte account identifier (public key)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, TypeInfo)]
pub struct AccountId32(pub [u8; 32]);

impl AccountId32 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidAccountLength(bytes.len()))?;
        Ok(AccountId32(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render as an SS58 address for the given network prefix
    pub fn to_ss58(&self, prefix: u16) -> String {
        let mut data = ss58_prefix_bytes(prefix);
        data.extend_from_slice(&self.0);
        let checksum = blake2_512(&[SS58_CHECKSUM_PREFIX, &data[..]].concat());
        data.extend_from_slice(&checksum[..SS58_CHECKSUM_LEN]);
        bs58::encode(data).into_string()
    }

    /// Parse an SS58 address, returning the account and its network prefix
    pub fn from_ss58(address: &str) -> Result<(Self, u16)> {
        let data = bs58::decode(address)
            .into_vec()
            .map_err(|e| CoreError::InvalidAddress(e.to_string()))?;

        let (prefix, prefix_len) = match data.first() {
            Some(&b) if b < 64 => (b as u16, 1),
            Some(&b) if b < 128 => {
                let second = *data
                    .get(1)
                    .ok_or_else(|| CoreError::InvalidAddress("truncated prefix".to_string()))?;
                let lower = ((b << 2) | (second >> 6)) as u16;
                let upper = (second & 0b0011_1111) as u16;
                (lower | (upper << 8), 2)
            }
            Some(_) => return Err(CoreError::InvalidAddress("reserved prefix".to_string())),
            None => return Err(CoreError::InvalidAddress("empty address".to_string())),
        };

        if data.len() != prefix_len + 32 + SS58_CHECKSUM_LEN {
            return Err(CoreError::InvalidAddress(format!(
                "unexpected length {}",
                data.len()
            )));
        }

        let body_end = prefix_len + 32;
        let checksum = blake2_512(&[SS58_CHECKSUM_PREFIX, &data[..body_end]].concat());
        if data[body_end..] != checksum[..SS58_CHECKSUM_LEN] {
            return Err(CoreError::InvalidAddress("checksum mismatch".to_string()));
        }

        let account = AccountId32::from_slice(&data[prefix_len..body_end])?;
        Ok((account, prefix))
    }
}

fn ss58_prefix_bytes(prefix: u16) -> Vec<u8> {
    if prefix < 64 {
        vec![prefix as u8]
    } else {
        let first = (((prefix & 0b0000_0000_1111_1100) as u8) >> 2) | 0b0100_0000;
        let second = ((prefix >> 8) as u8) | (((prefix & 0b11) as u8) << 6);
        vec![first, second]
    }
}

impl fmt::Display for AccountId32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ss58(DEFAULT_SS58_PREFIX))
    }
}

impl fmt::Debug for AccountId32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId32({})", to_hex(&self.0))
    }
}

impl FromStr for AccountId32 {
    type Err = CoreError;

    /// Accepts an SS58 address or a `0x`-prefixed 32-byte hex public key
    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("0x") {
            return AccountId32::from_slice(&from_hex(s)?);
        }
        AccountId32::from_ss58(s).map(|(account, _)| account)
    }
}

impl From<[u8; 32]> for AccountId32 {
    fn from(bytes: [u8; 32]) -> Self {
        AccountId32(bytes)
    }
}
