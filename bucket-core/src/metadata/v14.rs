//! Conversion from on-chain V14 metadata into the local model

use frame_metadata::v14::{self, RuntimeMetadataV14};
use frame_metadata::{RuntimeMetadata, RuntimeMetadataPrefixed, META_RESERVED};
use parity_scale_codec::Decode;
use scale_info::form::PortableForm;
use scale_info::{PortableRegistry, Type, TypeDef, TypeDefPrimitive};

use super::{CallMetadata, EventMetadata, Metadata, ModuleMetadata, StorageEntry};
use crate::error::{CoreError, Result};
use crate::hashing::StorageHasher;
use crate::value::{FieldShape, Primitive, TypeTable, ValueShape, VariantShape};

pub(super) fn decode(bytes: &[u8]) -> Result<Metadata> {
    let prefixed = RuntimeMetadataPrefixed::decode(&mut &bytes[..])?;
    if prefixed.0 != META_RESERVED {
        return Err(CoreError::Metadata("missing metadata magic".to_string()));
    }

    match prefixed.1 {
        RuntimeMetadata::V14(md) => convert(&md),
        other => Err(CoreError::UnsupportedMetadataVersion(other.version())),
    }
}

fn convert(md: &RuntimeMetadataV14) -> Result<Metadata> {
    let types = &md.types;
    let mut modules = Vec::with_capacity(md.pallets.len());

    for pallet in &md.pallets {
        let mut module = ModuleMetadata::new(pallet.name.clone(), pallet.index);

        if let Some(storage) = &pallet.storage {
            module.storage_prefix = storage.prefix.clone();
            module.storage = storage
                .entries
                .iter()
                .map(|entry| match &entry.ty {
                    v14::StorageEntryType::Plain(_) => StorageEntry::plain(entry.name.clone()),
                    v14::StorageEntryType::Map { hashers, .. } => StorageEntry::map(
                        entry.name.clone(),
                        hashers.iter().map(convert_hasher).collect(),
                    ),
                })
                .collect();
        }

        if let Some(calls) = &pallet.calls {
            module.calls = variants_of(types, calls.ty.id)?
                .into_iter()
                .map(|v| CallMetadata {
                    name: v.name,
                    index: v.index,
                    args: v.fields,
                })
                .collect();
        }

        if let Some(event) = &pallet.event {
            module.events = variants_of(types, event.ty.id)?
                .into_iter()
                .map(|v| EventMetadata {
                    name: v.name,
                    index: v.index,
                    fields: v.fields,
                })
                .collect();
        }

        modules.push(module);
    }

    Ok(Metadata::new(modules).with_types(type_table(types)))
}

/// One flat shape per registry type
fn type_table(types: &PortableRegistry) -> TypeTable {
    let mut table = TypeTable::new();
    for entry in &types.types {
        table.insert(entry.id, shape_of(types, &entry.ty));
    }
    table
}

fn convert_hasher(hasher: &v14::StorageHasher) -> StorageHasher {
    match hasher {
        v14::StorageHasher::Blake2_128 => StorageHasher::Blake2_128,
        v14::StorageHasher::Blake2_256 => StorageHasher::Blake2_256,
        v14::StorageHasher::Blake2_128Concat => StorageHasher::Blake2_128Concat,
        v14::StorageHasher::Twox128 => StorageHasher::Twox128,
        v14::StorageHasher::Twox256 => StorageHasher::Twox256,
        v14::StorageHasher::Twox64Concat => StorageHasher::Twox64Concat,
        v14::StorageHasher::Identity => StorageHasher::Identity,
    }
}

/// Resolve the variants of a call or event enum
fn variants_of(types: &PortableRegistry, id: u32) -> Result<Vec<VariantShape>> {
    match types.resolve(id).map(|ty| shape_of(types, ty)) {
        Some(ValueShape::Variant(variants)) => Ok(variants),
        Some(other) => Err(CoreError::Metadata(format!(
            "type {} is not an enum: {:?}",
            id, other
        ))),
        None => Err(CoreError::Metadata(format!("type {} missing from registry", id))),
    }
}

fn fields_of(
    types: &PortableRegistry,
    fields: &[scale_info::Field<PortableForm>],
) -> Vec<FieldShape> {
    fields
        .iter()
        .map(|f| FieldShape {
            name: f.name.clone(),
            shape: field_shape(types, f.ty.id),
        })
        .collect()
}

/// Shape of a type's own layout; nested types are referenced, not expanded
fn shape_of(types: &PortableRegistry, ty: &Type<PortableForm>) -> ValueShape {
    if ty.path.segments.last().map(String::as_str) == Some("AccountId32") {
        return ValueShape::AccountId;
    }

    match &ty.type_def {
        TypeDef::Primitive(p) => primitive_shape(p),
        TypeDef::Compact(_) => ValueShape::Compact,
        TypeDef::Array(arr) => {
            if is_u8(types, arr.type_param.id) {
                ValueShape::FixedBytes(arr.len as usize)
            } else {
                ValueShape::Array(
                    arr.len as usize,
                    Box::new(field_shape(types, arr.type_param.id)),
                )
            }
        }
        TypeDef::Sequence(seq) => {
            if is_u8(types, seq.type_param.id) {
                ValueShape::Bytes
            } else {
                ValueShape::Sequence(Box::new(field_shape(types, seq.type_param.id)))
            }
        }
        TypeDef::Tuple(tuple) => ValueShape::Tuple(
            tuple
                .fields
                .iter()
                .map(|f| field_shape(types, f.id))
                .collect(),
        ),
        TypeDef::Composite(c) => ValueShape::Composite(fields_of(types, &c.fields)),
        TypeDef::Variant(v) => ValueShape::Variant(
            v.variants
                .iter()
                .map(|variant| VariantShape {
                    name: variant.name.clone(),
                    index: variant.index,
                    fields: fields_of(types, &variant.fields),
                })
                .collect(),
        ),
        TypeDef::BitSequence(_) => ValueShape::Unsupported("bit sequence".to_string()),
    }
}

/// Leaf types are inlined, everything else becomes a reference
fn field_shape(types: &PortableRegistry, id: u32) -> ValueShape {
    let Some(ty) = types.resolve(id) else {
        return ValueShape::Unsupported(format!("type {} missing from registry", id));
    };
    if ty.path.segments.last().map(String::as_str) == Some("AccountId32") {
        return ValueShape::AccountId;
    }
    match &ty.type_def {
        TypeDef::Primitive(p) => primitive_shape(p),
        TypeDef::Compact(_) => ValueShape::Compact,
        _ => ValueShape::Ref(id),
    }
}

fn is_u8(types: &PortableRegistry, id: u32) -> bool {
    matches!(
        types.resolve(id).map(|t| &t.type_def),
        Some(TypeDef::Primitive(TypeDefPrimitive::U8))
    )
}

fn primitive_shape(p: &TypeDefPrimitive) -> ValueShape {
    let prim = match p {
        TypeDefPrimitive::Bool => Primitive::Bool,
        TypeDefPrimitive::Char => Primitive::Char,
        TypeDefPrimitive::Str => Primitive::Str,
        TypeDefPrimitive::U8 => Primitive::U8,
        TypeDefPrimitive::U16 => Primitive::U16,
        TypeDefPrimitive::U32 => Primitive::U32,
        TypeDefPrimitive::U64 => Primitive::U64,
        TypeDefPrimitive::U128 => Primitive::U128,
        TypeDefPrimitive::I8 => Primitive::I8,
        TypeDefPrimitive::I16 => Primitive::I16,
        TypeDefPrimitive::I32 => Primitive::I32,
        TypeDefPrimitive::I64 => Primitive::I64,
        TypeDefPrimitive::I128 => Primitive::I128,
        TypeDefPrimitive::U256 | TypeDefPrimitive::I256 => {
            return ValueShape::Unsupported("256-bit integer".to_string())
        }
    };
    ValueShape::Primitive(prim)
}
