//! Dynamic SCALE values
//!
//! Event payloads are decoded without compile-time types: the runtime metadata
//! describes each field as a [`ValueShape`], and [`decode_value`] walks the
//! encoded bytes according to that shape.
//!
//! Shapes converted from a type registry stay flat: a field whose type is a
//! composite, enum or collection refers to it by id ([`ValueShape::Ref`]) and
//! the id is resolved through a [`TypeTable`] only while decoding. Recursive
//! runtime types (a call enum holding a list of calls) are therefore described
//! once and never expanded.

use std::collections::BTreeMap;

use parity_scale_codec::{Compact, Decode};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::AccountId32;

/// Fixed-width primitive kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primitive {
    Bool,
    Char,
    Str,
    U8,
    U16,
    U32,
    U64,
    U128,
    I8,
    I16,
    I32,
    I64,
    I128,
}

/// A named (or positional) field of a composite, call or event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: Option<String>,
    pub shape: ValueShape,
}

impl FieldShape {
    pub fn named(name: impl Into<String>, shape: ValueShape) -> Self {
        Self {
            name: Some(name.into()),
            shape,
        }
    }

    pub fn unnamed(shape: ValueShape) -> Self {
        Self { name: None, shape }
    }
}

/// One arm of an enum-like type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantShape {
    pub name: String,
    pub index: u8,
    pub fields: Vec<FieldShape>,
}

/// Encoding layout of a value, derived from metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueShape {
    Primitive(Primitive),
    /// Compact-encoded unsigned integer
    Compact,
    AccountId,
    FixedBytes(usize),
    Bytes,
    Array(usize, Box<ValueShape>),
    Sequence(Box<ValueShape>),
    Tuple(Vec<ValueShape>),
    Composite(Vec<FieldShape>),
    Variant(Vec<VariantShape>),
    /// Another registry type, looked up in the [`TypeTable`] at decode time
    Ref(u32),
    /// Layout the decoder cannot walk (e.g. bit sequences)
    Unsupported(String),
}

/// Shapes of registry types, keyed by type id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTable {
    shapes: BTreeMap<u32, ValueShape>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32, shape: ValueShape) {
        self.shapes.insert(id, shape);
    }

    pub fn get(&self, id: u32) -> Option<&ValueShape> {
        self.shapes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Values nested deeper than this are rejected
const MAX_DECODE_DEPTH: usize = 128;

/// A decoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    UInt(u128),
    Int(i128),
    Str(String),
    Bytes(Vec<u8>),
    AccountId(AccountId32),
    Sequence(Vec<Value>),
    Composite(Vec<(Option<String>, Value)>),
    Variant {
        name: String,
        fields: Vec<(Option<String>, Value)>,
    },
}

impl Value {
    pub fn as_account(&self) -> Option<&AccountId32> {
        match self {
            Value::AccountId(acc) => Some(acc),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a named field of a composite or variant value
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Composite(fields) | Value::Variant { fields, .. } => fields
                .iter()
                .find(|(n, _)| n.as_deref() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Read exactly `len` raw bytes from the front of `input`
fn take<'a>(input: &mut &'a [u8], len: usize, what: &'static str) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(CoreError::UnexpectedEof(what));
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

/// Decode one value of the given shape, advancing `input`
///
/// `types` resolves [`ValueShape::Ref`]; shapes built by hand can pass an
/// empty table.
pub fn decode_value(shape: &ValueShape, types: &TypeTable, input: &mut &[u8]) -> Result<Value> {
    decode_nested(shape, types, input, 0)
}

/// Decode a list of fields in declaration order
pub fn decode_fields(
    fields: &[FieldShape],
    types: &TypeTable,
    input: &mut &[u8],
) -> Result<Vec<(Option<String>, Value)>> {
    fields_nested(fields, types, input, 0)
}

fn fields_nested(
    fields: &[FieldShape],
    types: &TypeTable,
    input: &mut &[u8],
    depth: usize,
) -> Result<Vec<(Option<String>, Value)>> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        out.push((
            field.name.clone(),
            decode_nested(&field.shape, types, input, depth + 1)?,
        ));
    }
    Ok(out)
}

fn decode_nested(
    shape: &ValueShape,
    types: &TypeTable,
    input: &mut &[u8],
    depth: usize,
) -> Result<Value> {
    if depth > MAX_DECODE_DEPTH {
        return Err(CoreError::UnsupportedShape("value nested too deeply".to_string()));
    }

    let value = match shape {
        ValueShape::Primitive(p) => decode_primitive(*p, input)?,
        ValueShape::Compact => Value::UInt(Compact::<u128>::decode(input)?.0),
        ValueShape::AccountId => {
            let bytes = take(input, 32, "account id")?;
            Value::AccountId(AccountId32::from_slice(bytes)?)
        }
        ValueShape::FixedBytes(len) => Value::Bytes(take(input, *len, "fixed bytes")?.to_vec()),
        ValueShape::Bytes => Value::Bytes(Vec::<u8>::decode(input)?),
        ValueShape::Array(len, inner) => {
            let mut items = Vec::with_capacity((*len).min(input.len()));
            for _ in 0..*len {
                items.push(decode_nested(inner, types, input, depth + 1)?);
            }
            Value::Sequence(items)
        }
        ValueShape::Sequence(inner) => {
            let len = Compact::<u32>::decode(input)?.0 as usize;
            let mut items = Vec::with_capacity(len.min(input.len()));
            for _ in 0..len {
                items.push(decode_nested(inner, types, input, depth + 1)?);
            }
            Value::Sequence(items)
        }
        ValueShape::Tuple(shapes) => {
            let mut items = Vec::with_capacity(shapes.len());
            for s in shapes {
                items.push(decode_nested(s, types, input, depth + 1)?);
            }
            Value::Sequence(items)
        }
        ValueShape::Composite(fields) => {
            Value::Composite(fields_nested(fields, types, input, depth)?)
        }
        ValueShape::Variant(variants) => {
            let index = take(input, 1, "variant index")?[0];
            let variant = variants
                .iter()
                .find(|v| v.index == index)
                .ok_or_else(|| CoreError::Codec(format!("unknown variant index {}", index)))?;
            Value::Variant {
                name: variant.name.clone(),
                fields: fields_nested(&variant.fields, types, input, depth)?,
            }
        }
        ValueShape::Ref(id) => {
            let target = types.get(*id).ok_or_else(|| {
                CoreError::UnsupportedShape(format!("type {} missing from registry", id))
            })?;
            return decode_nested(target, types, input, depth + 1);
        }
        ValueShape::Unsupported(what) => return Err(CoreError::UnsupportedShape(what.clone())),
    };
    Ok(value)
}

fn decode_primitive(p: Primitive, input: &mut &[u8]) -> Result<Value> {
    let value = match p {
        Primitive::Bool => Value::Bool(bool::decode(input)?),
        Primitive::Char => Value::UInt(u32::decode(input)? as u128),
        Primitive::Str => Value::Str(String::decode(input)?),
        Primitive::U8 => Value::UInt(u8::decode(input)? as u128),
        Primitive::U16 => Value::UInt(u16::decode(input)? as u128),
        Primitive::U32 => Value::UInt(u32::decode(input)? as u128),
        Primitive::U64 => Value::UInt(u64::decode(input)? as u128),
        Primitive::U128 => Value::UInt(u128::decode(input)?),
        Primitive::I8 => Value::Int(i8::decode(input)? as i128),
        Primitive::I16 => Value::Int(i16::decode(input)? as i128),
        Primitive::I32 => Value::Int(i32::decode(input)? as i128),
        Primitive::I64 => Value::Int(i64::decode(input)? as i128),
        Primitive::I128 => Value::Int(i128::decode(input)?),
    };
    Ok(value)
}
