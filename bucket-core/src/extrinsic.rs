//! Extrinsic encoding
//!
//! A signed extrinsic (format version 4) is laid out as
//!
//! ```text
//! compact(len) ++ 0x84 ++ address ++ signature ++ era ++ compact(nonce) ++ compact(tip) ++ call
//! ```
//!
//! where `address` is `MultiAddress::Id` and `signature` is a `MultiSignature`
//! (Ed25519 or Sr25519). The signer signs
//!
//! ```text
//! call ++ era ++ compact(nonce) ++ compact(tip) ++ spec_version ++ tx_version ++ genesis ++ checkpoint
//! ```
//!
//! hashing it with blake2-256 first when it exceeds 256 bytes.

use parity_scale_codec::{Compact, Decode, Encode, Error as CodecError, Input, Output};

use crate::error::{CoreError, Result};
use crate::hashing::blake2_256;
use crate::metadata::Metadata;
use crate::types::{AccountId32, H256};

pub const EXTRINSIC_FORMAT_VERSION: u8 = 4;
const SIGNED_BIT: u8 = 0b1000_0000;
const ADDRESS_ID: u8 = 0;
const MAX_UNHASHED_PAYLOAD: usize = 256;

/// Scheme of the signature carried by an extrinsic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureKind {
    #[default]
    Ed25519,
    Sr25519,
}

impl SignatureKind {
    /// `MultiSignature` variant index
    pub fn tag(self) -> u8 {
        match self {
            SignatureKind::Ed25519 => 0,
            SignatureKind::Sr25519 => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SignatureKind::Ed25519),
            1 => Some(SignatureKind::Sr25519),
            _ => None,
        }
    }
}

/// Transaction validity window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Era {
    Immortal,
    Mortal { period: u64, phase: u64 },
}

impl Era {
    /// Mortal era valid for roughly `period` blocks starting at `current`
    ///
    /// The period is rounded to a power of two in `4..=65536` and the phase is
    /// quantized so that it survives the two-byte encoding.
    pub fn mortal(period: u64, current: u64) -> Self {
        let period = period
            .checked_next_power_of_two()
            .unwrap_or(1 << 16)
            .clamp(4, 1 << 16);
        let phase = current % period;
        let quantize_factor = (period >> 12).max(1);
        let phase = phase / quantize_factor * quantize_factor;
        Era::Mortal { period, phase }
    }

    pub fn is_immortal(&self) -> bool {
        matches!(self, Era::Immortal)
    }

    /// First block in which a transaction with this era is valid
    pub fn birth(&self, current: u64) -> u64 {
        match *self {
            Era::Immortal => 0,
            Era::Mortal { period, phase } => (current.max(phase) - phase) / period * period + phase,
        }
    }
}

impl Encode for Era {
    fn size_hint(&self) -> usize {
        match self {
            Era::Immortal => 1,
            Era::Mortal { .. } => 2,
        }
    }

    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        match *self {
            Era::Immortal => dest.push_byte(0),
            Era::Mortal { period, phase } => {
                let quantize_factor = (period >> 12).max(1);
                let low = (period.trailing_zeros().saturating_sub(1)).clamp(1, 15) as u16;
                let encoded = low | (((phase / quantize_factor) as u16) << 4);
                encoded.encode_to(dest);
            }
        }
    }
}

impl Decode for Era {
    fn decode<I: Input>(input: &mut I) -> std::result::Result<Self, CodecError> {
        let first = input.read_byte()?;
        if first == 0 {
            return Ok(Era::Immortal);
        }
        let encoded = first as u64 + ((input.read_byte()? as u64) << 8);
        let period = 2 << (encoded % (1 << 4));
        let quantize_factor = (period >> 12).max(1);
        let phase = (encoded >> 4) * quantize_factor;
        if period >= 4 && phase < period {
            Ok(Era::Mortal { period, phase })
        } else {
            Err("Invalid period and phase".into())
        }
    }
}

/// Encode a call by name: module index ++ call index ++ pre-encoded arguments
///
/// Only the argument count is checked against metadata; argument bytes are
/// taken as already encoded.
pub fn encode_call(metadata: &Metadata, module: &str, method: &str, args: &[Vec<u8>]) -> Result<Vec<u8>> {
    let (m, call) = metadata.call(module, method)?;
    if args.len() != call.args.len() {
        return Err(CoreError::ArgumentCount {
            call: format!("{}.{}", module, method),
            expected: call.args.len(),
            actual: args.len(),
        });
    }

    let mut out = vec![m.index, call.index];
    for arg in args {
        out.extend_from_slice(arg);
    }
    Ok(out)
}

/// Everything besides the call that the signature commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtrinsicParams {
    pub era: Era,
    pub nonce: u32,
    pub tip: u128,
    pub spec_version: u32,
    pub transaction_version: u32,
    pub genesis_hash: H256,
    /// Block the era is anchored to; the genesis hash for immortal eras
    pub checkpoint: H256,
}

impl ExtrinsicParams {
    fn encode_extra(&self, out: &mut Vec<u8>) {
        self.era.encode_to(out);
        Compact(self.nonce).encode_to(out);
        Compact(self.tip).encode_to(out);
    }
}

/// Bytes the signer must sign for `call` under `params`
pub fn signing_payload(call: &[u8], params: &ExtrinsicParams) -> Vec<u8> {
    let mut payload = call.to_vec();
    params.encode_extra(&mut payload);
    params.spec_version.encode_to(&mut payload);
    params.transaction_version.encode_to(&mut payload);
    params.genesis_hash.encode_to(&mut payload);
    params.checkpoint.encode_to(&mut payload);

    if payload.len() > MAX_UNHASHED_PAYLOAD {
        blake2_256(&payload).to_vec()
    } else {
        payload
    }
}

/// A signed extrinsic, either assembled locally or parsed from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedExtrinsic {
    pub signer: AccountId32,
    pub kind: SignatureKind,
    pub signature: [u8; 64],
    pub era: Era,
    pub nonce: u32,
    pub tip: u128,
    pub call: Vec<u8>,
}

impl SignedExtrinsic {
    /// Length-prefixed wire encoding
    pub fn encode(&self) -> Vec<u8> {
        let mut body = vec![SIGNED_BIT | EXTRINSIC_FORMAT_VERSION, ADDRESS_ID];
        body.extend_from_slice(self.signer.as_bytes());
        body.push(self.kind.tag());
        body.extend_from_slice(&self.signature);
        self.era.encode_to(&mut body);
        Compact(self.nonce).encode_to(&mut body);
        Compact(self.tip).encode_to(&mut body);
        body.extend_from_slice(&self.call);

        let mut out = Compact(body.len() as u32).encode();
        out.extend(body);
        out
    }

    /// Parse a length-prefixed signed extrinsic
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let len = Compact::<u32>::decode(&mut input)?.0 as usize;
        if input.len() != len {
            return Err(CoreError::Codec(format!(
                "extrinsic length prefix {} does not match body {}",
                len,
                input.len()
            )));
        }

        let version = u8::decode(&mut input)?;
        if version != SIGNED_BIT | EXTRINSIC_FORMAT_VERSION {
            return Err(CoreError::Codec(format!("unsupported extrinsic version {:#04x}", version)));
        }
        if u8::decode(&mut input)? != ADDRESS_ID {
            return Err(CoreError::Codec("unsupported address kind".to_string()));
        }
        let signer = AccountId32::decode(&mut input)?;
        let tag = u8::decode(&mut input)?;
        let kind = SignatureKind::from_tag(tag)
            .ok_or_else(|| CoreError::Codec(format!("unsupported signature kind {}", tag)))?;
        let signature = <[u8; 64]>::decode(&mut input)?;
        let era = Era::decode(&mut input)?;
        let nonce = Compact::<u32>::decode(&mut input)?.0;
        let tip = Compact::<u128>::decode(&mut input)?.0;

        Ok(Self {
            signer,
            kind,
            signature,
            era,
            nonce,
            tip,
            call: input.to_vec(),
        })
    }
}
