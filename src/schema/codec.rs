//! Binary encoder and decoder for instruction and account data

use super::{AccountLayout, DecodedFields, FieldSpec, FieldValue, InstructionSpec, SchemaError};

fn encode_fields(
    name: &str,
    discriminator: &[u8; 8],
    fields: &[FieldSpec],
    values: &[FieldValue],
) -> Result<Vec<u8>, SchemaError> {
    if values.len() != fields.len() {
        return Err(SchemaError::FieldMismatch {
            name: name.to_string(),
            reason: format!("expected {} fields, got {}", fields.len(), values.len()),
        });
    }

    let capacity = 8 + fields.iter().map(|f| f.ty.width()).sum::<usize>();
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(discriminator);

    for (field, value) in fields.iter().zip(values) {
        if value.field_type() != field.ty {
            return Err(SchemaError::FieldMismatch {
                name: name.to_string(),
                reason: format!(
                    "field '{}' is {}, got {}",
                    field.name,
                    field.ty,
                    value.field_type()
                ),
            });
        }
        value.write_le(&mut out);
    }

    debug_assert_eq!(out.len(), capacity);
    Ok(out)
}

fn decode_fields(
    name: &str,
    discriminator: &[u8; 8],
    fields: &[FieldSpec],
    data: &[u8],
    allow_trailing: bool,
) -> Result<DecodedFields, SchemaError> {
    let expected = 8 + fields.iter().map(|f| f.ty.width()).sum::<usize>();
    let length_ok = if allow_trailing {
        data.len() >= expected
    } else {
        data.len() == expected
    };
    if !length_ok {
        return Err(SchemaError::DataLength {
            name: name.to_string(),
            expected,
            actual: data.len(),
        });
    }
    if &data[..8] != discriminator {
        return Err(SchemaError::DiscriminatorMismatch {
            name: name.to_string(),
        });
    }

    let mut offset = 8;
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        let width = field.ty.width();
        let value = FieldValue::read_le(field.ty, &data[offset..offset + width]).ok_or_else(
            || SchemaError::FieldMismatch {
                name: name.to_string(),
                reason: format!("field '{}' holds an invalid {}", field.name, field.ty),
            },
        )?;
        values.push((field.name.clone(), value));
        offset += width;
    }

    Ok(DecodedFields {
        discriminator: *discriminator,
        values,
    })
}

/// Discriminator followed by every field in declared order
pub fn encode_instruction(
    spec: &InstructionSpec,
    values: &[FieldValue],
) -> Result<Vec<u8>, SchemaError> {
    encode_fields(&spec.name, &spec.discriminator, &spec.fields, values)
}

/// Exact inverse of [`encode_instruction`]; trailing bytes are rejected
pub fn decode_instruction(
    spec: &InstructionSpec,
    data: &[u8],
) -> Result<DecodedFields, SchemaError> {
    decode_fields(&spec.name, &spec.discriminator, &spec.fields, data, false)
}

/// Account data image for `layout` (used to stage ledger state in tests)
pub fn encode_account(
    layout: &AccountLayout,
    values: &[FieldValue],
) -> Result<Vec<u8>, SchemaError> {
    encode_fields(&layout.name, &layout.discriminator, &layout.fields, values)
}

/// Decode account data; accounts are often allocated with spare space, so
/// trailing bytes are ignored
pub fn decode_account(layout: &AccountLayout, data: &[u8]) -> Result<DecodedFields, SchemaError> {
    decode_fields(&layout.name, &layout.discriminator, &layout.fields, data, true)
}
