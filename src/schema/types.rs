//! Fixed-width field types and values

use solana_sdk::pubkey::Pubkey;
use std::fmt;

use super::SchemaError;

/// Field types the codec accepts. All are fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
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
    Pubkey,
}

impl FieldType {
    /// Encoded width in bytes
    pub fn width(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::U64 | Self::I64 => 8,
            Self::U128 | Self::I128 => 16,
            Self::Pubkey => 32,
        }
    }

    /// Parse a schema type name (`"u64"`, `"pubkey"`, `"publicKey"`, ...)
    pub fn parse(field: &str, name: &str) -> Result<Self, SchemaError> {
        Ok(match name {
            "bool" => Self::Bool,
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "u128" => Self::U128,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "i128" => Self::I128,
            "pubkey" | "publicKey" => Self::Pubkey,
            other => {
                return Err(SchemaError::UnsupportedType {
                    field: field.to_string(),
                    ty: other.to_string(),
                })
            }
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::U128 => "u128",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::I128 => "i128",
            Self::Pubkey => "pubkey",
        };
        f.write_str(name)
    }
}

/// A typed field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    Pubkey(Pubkey),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Bool(_) => FieldType::Bool,
            Self::U8(_) => FieldType::U8,
            Self::U16(_) => FieldType::U16,
            Self::U32(_) => FieldType::U32,
            Self::U64(_) => FieldType::U64,
            Self::U128(_) => FieldType::U128,
            Self::I8(_) => FieldType::I8,
            Self::I16(_) => FieldType::I16,
            Self::I32(_) => FieldType::I32,
            Self::I64(_) => FieldType::I64,
            Self::I128(_) => FieldType::I128,
            Self::Pubkey(_) => FieldType::Pubkey,
        }
    }

    /// Append little-endian bytes; pubkeys are raw 32 bytes
    pub fn write_le(&self, out: &mut Vec<u8>) {
        match self {
            Self::Bool(v) => out.push(u8::from(*v)),
            Self::U8(v) => out.push(*v),
            Self::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U128(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I128(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Pubkey(v) => out.extend_from_slice(v.as_ref()),
        }
    }

    /// Read one value of `ty` from exactly `ty.width()` bytes
    pub fn read_le(ty: FieldType, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ty.width() {
            return None;
        }
        Some(match ty {
            FieldType::Bool => match bytes[0] {
                0 => Self::Bool(false),
                1 => Self::Bool(true),
                _ => return None,
            },
            FieldType::U8 => Self::U8(bytes[0]),
            FieldType::U16 => Self::U16(u16::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::U32 => Self::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::U64 => Self::U64(u64::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::U128 => Self::U128(u128::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::I8 => Self::I8(i8::from_le_bytes([bytes[0]])),
            FieldType::I16 => Self::I16(i16::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::I32 => Self::I32(i32::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::I64 => Self::I64(i64::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::I128 => Self::I128(i128::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::Pubkey => {
                let arr: [u8; 32] = bytes.try_into().ok()?;
                Self::Pubkey(Pubkey::new_from_array(arr))
            }
        })
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v),
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_pubkey(&self) -> Option<Pubkey> {
        match self {
            Self::Pubkey(k) => Some(*k),
            _ => None,
        }
    }
}

/// A named field in a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Signer/writable role of one positional account slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRole {
    pub name: String,
    pub signer: bool,
    pub writable: bool,
}

impl AccountRole {
    pub fn new(name: impl Into<String>, signer: bool, writable: bool) -> Self {
        Self {
            name: name.into(),
            signer,
            writable,
        }
    }
}

/// One remote instruction: discriminator, argument layout, account order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSpec {
    pub name: String,
    pub discriminator: [u8; 8],
    pub fields: Vec<FieldSpec>,
    pub accounts: Vec<AccountRole>,
}

impl InstructionSpec {
    /// Encoded data length: discriminator plus fixed-width fields
    pub fn data_len(&self) -> usize {
        8 + self.fields.iter().map(|f| f.ty.width()).sum::<usize>()
    }
}

/// A remote account layout: discriminator and fixed-width fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLayout {
    pub name: String,
    pub discriminator: [u8; 8],
    pub fields: Vec<FieldSpec>,
}

impl AccountLayout {
    pub fn data_len(&self) -> usize {
        8 + self.fields.iter().map(|f| f.ty.width()).sum::<usize>()
    }
}

/// Decoded fields in declared order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFields {
    pub discriminator: [u8; 8],
    pub values: Vec<(String, FieldValue)>,
}

impl DecodedFields {
    /// Look up a field by name (underscore/case-insensitive)
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let wanted = normalize_name(name);
        self.values
            .iter()
            .find(|(n, _)| normalize_name(n) == wanted)
            .map(|(_, v)| v)
    }
}

/// `vault_authority`, `vaultAuthority` and `VaultAuthority` compare equal
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths_match_encoding() {
        let values = [
            FieldValue::Bool(true),
            FieldValue::U16(7),
            FieldValue::I64(-3),
            FieldValue::U128(u128::MAX),
            FieldValue::Pubkey(Pubkey::new_unique()),
        ];
        for value in values {
            let mut out = Vec::new();
            value.write_le(&mut out);
            assert_eq!(out.len(), value.field_type().width());
            assert_eq!(FieldValue::read_le(value.field_type(), &out), Some(value));
        }
    }

    #[test]
    fn test_bool_rejects_non_canonical_byte() {
        assert_eq!(FieldValue::read_le(FieldType::Bool, &[2]), None);
    }

    #[test]
    fn test_parse_type_names() {
        assert_eq!(FieldType::parse("a", "publicKey").unwrap(), FieldType::Pubkey);
        assert_eq!(FieldType::parse("a", "u64").unwrap(), FieldType::U64);
        assert!(matches!(
            FieldType::parse("memo", "string"),
            Err(SchemaError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("vault_authority"), normalize_name("vaultAuthority"));
        assert_eq!(normalize_name("VaultConfig"), "vaultconfig");
    }
}
