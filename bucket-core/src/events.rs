//! Block event log decoding
//!
//! The event log of a block is a SCALE `Vec<EventRecord>`. Each record carries
//! its phase, the emitting module and event indices, the event fields and a
//! list of topics. Field layouts come from [`Metadata`].

use parity_scale_codec::{Compact, Decode, Encode};

use crate::error::{CoreError, Result};
use crate::metadata::Metadata;
use crate::types::H256;
use crate::value::{decode_fields, Value};

/// When during block execution an event was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Phase {
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

/// One decoded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub phase: Phase,
    pub module: String,
    pub event: String,
    pub fields: Vec<(Option<String>, Value)>,
    pub topics: Vec<H256>,
}

impl EventRecord {
    pub fn is(&self, module: &str, event: &str) -> bool {
        self.module == module && self.event == event
    }

    /// Named field, or positional field when `name` is a decimal index
    pub fn field(&self, name: &str) -> Option<&Value> {
        if let Some((_, v)) = self
            .fields
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
        {
            return Some(v);
        }
        name.parse::<usize>()
            .ok()
            .and_then(|i| self.fields.get(i))
            .map(|(_, v)| v)
    }
}

/// Result of decoding an event log
///
/// Decoding stops at the first record that cannot be decoded. Records before
/// it are kept and the failure is reported in `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedEvents {
    pub records: Vec<EventRecord>,
    pub error: Option<CoreError>,
}

impl DecodedEvents {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }
}

/// Decode a raw `System.Events` value
pub fn decode_events(metadata: &Metadata, raw: &[u8]) -> DecodedEvents {
    let mut input = raw;
    let mut out = DecodedEvents::default();

    let count = match Compact::<u32>::decode(&mut input) {
        Ok(c) => c.0,
        Err(e) => {
            out.error = Some(e.into());
            return out;
        }
    };

    for _ in 0..count {
        match decode_record(metadata, &mut input) {
            Ok(record) => out.records.push(record),
            Err(e) => {
                out.error = Some(e);
                break;
            }
        }
    }
    out
}

fn decode_record(metadata: &Metadata, input: &mut &[u8]) -> Result<EventRecord> {
    let phase = Phase::decode(input)?;
    let module_index = u8::decode(input)?;
    let event_index = u8::decode(input)?;

    let (module, event) = metadata.event(module_index, event_index)?;
    let fields = decode_fields(&event.fields, metadata.types(), input)?;
    let topics = Vec::<H256>::decode(input)?;

    Ok(EventRecord {
        phase,
        module: module.name.clone(),
        event: event.name.clone(),
        fields,
        topics,
    })
}

/// Encode a single record in the on-chain layout
///
/// `fields` must already be SCALE encoded in declaration order.
pub fn encode_record(phase: Phase, module_index: u8, event_index: u8, fields: &[u8]) -> Vec<u8> {
    let mut out = phase.encode();
    out.push(module_index);
    out.push(event_index);
    out.extend_from_slice(fields);
    out.extend(Vec::<H256>::new().encode());
    out
}

/// Assemble encoded records into an event log value
pub fn encode_log(records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Compact(records.len() as u32).encode();
    for r in records {
        out.extend_from_slice(r);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ModuleMetadata;
    use crate::types::AccountId32;
    use crate::value::{FieldShape, Primitive, ValueShape};

    fn metadata() -> Metadata {
        Metadata::new(vec![
            ModuleMetadata::new("System", 0)
                .with_event("ExtrinsicSuccess", vec![])
                .with_event(
                    "ExtrinsicFailed",
                    vec![FieldShape::named("code", ValueShape::Primitive(Primitive::U8))],
                ),
            ModuleMetadata::new("Sminer", 7)
                .with_event("Registered", vec![FieldShape::named("acc", ValueShape::AccountId)])
                .with_event(
                    "Receive",
                    vec![
                        FieldShape::named("acc", ValueShape::AccountId),
                        FieldShape::named("reward", ValueShape::Primitive(Primitive::U128)),
                    ],
                ),
        ])
    }

    #[test]
    fn test_decode_mixed_log() {
        let acc = AccountId32([3u8; 32]);
        let mut receive = acc.encode();
        receive.extend(99u128.encode());

        let raw = encode_log(&[
            encode_record(Phase::ApplyExtrinsic(1), 7, 0, &acc.encode()),
            encode_record(Phase::ApplyExtrinsic(1), 7, 1, &receive),
            encode_record(Phase::ApplyExtrinsic(1), 0, 0, &[]),
        ]);

        let decoded = decode_events(&metadata(), &raw);
        assert!(decoded.is_complete());
        assert_eq!(decoded.records.len(), 3);

        let registered = &decoded.records[0];
        assert!(registered.is("Sminer", "Registered"));
        assert_eq!(registered.field("acc"), Some(&Value::AccountId(acc)));
        assert_eq!(registered.field("0"), Some(&Value::AccountId(acc)));

        assert_eq!(decoded.records[1].field("reward"), Some(&Value::UInt(99)));
        assert_eq!(decoded.records[2].phase, Phase::ApplyExtrinsic(1));
    }

    #[test]
    fn test_unknown_event_keeps_prefix() {
        let acc = AccountId32([1u8; 32]);
        let raw = encode_log(&[
            encode_record(Phase::Initialization, 7, 0, &acc.encode()),
            encode_record(Phase::ApplyExtrinsic(0), 42, 3, &[]),
            encode_record(Phase::Finalization, 0, 0, &[]),
        ]);

        let decoded = decode_events(&metadata(), &raw);
        assert_eq!(decoded.records.len(), 1);
        assert!(matches!(
            decoded.error,
            Some(CoreError::UnknownEvent {
                module_index: 42,
                event_index: 3
            })
        ));
    }

    #[test]
    fn test_empty_log() {
        let decoded = decode_events(&metadata(), &encode_log(&[]));
        assert!(decoded.is_complete());
        assert!(decoded.records.is_empty());

        let decoded = decode_events(&metadata(), &[]);
        assert!(!decoded.is_complete());
    }
}
