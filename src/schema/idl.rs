//! Schema document loading
//!
//! Accepts the program's Anchor-style IDL JSON, both the legacy shape
//! (`isMut`/`isSigner`, `publicKey`, account fields inline) and the current
//! one (`writable`/`signer`, `pubkey`, explicit discriminators, account fields
//! under `types`).

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::{
    account_discriminator, instruction_discriminator, AccountLayout, AccountRole, FieldSpec,
    FieldType, InstructionSchema, InstructionSpec, RemoteErrorSpec, SchemaError,
};

/// Discriminator of `bot_disburse_rewards` as deployed
pub const DISBURSE_DISCRIMINATOR: [u8; 8] = [210, 111, 94, 103, 248, 212, 11, 70];

pub const INITIALIZE: &str = "initialize";
pub const SET_BOT_AUTHORITY: &str = "admin_set_bot_authority";
pub const DISBURSE: &str = "bot_disburse_rewards";
pub const VAULT_CONFIG: &str = "VaultConfig";

#[derive(Debug, Deserialize)]
struct IdlDocument {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    metadata: Option<IdlMetadata>,
    instructions: Vec<IdlInstruction>,
    #[serde(default)]
    accounts: Vec<IdlAccount>,
    #[serde(default)]
    types: Vec<IdlTypeDef>,
    #[serde(default)]
    errors: Vec<IdlError>,
}

#[derive(Debug, Deserialize)]
struct IdlMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdlInstruction {
    name: String,
    #[serde(default)]
    discriminator: Option<Vec<u8>>,
    #[serde(default)]
    accounts: Vec<IdlAccountItem>,
    #[serde(default)]
    args: Vec<IdlField>,
}

#[derive(Debug, Deserialize)]
struct IdlAccountItem {
    name: String,
    #[serde(default, alias = "isSigner")]
    signer: bool,
    #[serde(default, alias = "isMut")]
    writable: bool,
}

#[derive(Debug, Deserialize)]
struct IdlField {
    name: String,
    #[serde(rename = "type")]
    ty: Value,
}

#[derive(Debug, Deserialize)]
struct IdlAccount {
    name: String,
    #[serde(default)]
    discriminator: Option<Vec<u8>>,
    #[serde(default, rename = "type")]
    ty: Option<IdlStruct>,
}

#[derive(Debug, Deserialize)]
struct IdlTypeDef {
    name: String,
    #[serde(rename = "type")]
    ty: IdlStruct,
}

#[derive(Debug, Deserialize)]
struct IdlStruct {
    #[serde(default)]
    fields: Vec<IdlField>,
}

#[derive(Debug, Deserialize)]
struct IdlError {
    code: u32,
    name: String,
    #[serde(default)]
    msg: Option<String>,
}

fn discriminator(name: &str, explicit: Option<Vec<u8>>, fallback: [u8; 8]) -> Result<[u8; 8], SchemaError> {
    match explicit {
        None => Ok(fallback),
        Some(bytes) => bytes
            .as_slice()
            .try_into()
            .map_err(|_| SchemaError::BadDiscriminator {
                name: name.to_string(),
                len: bytes.len(),
            }),
    }
}

fn field_specs(fields: &[IdlField]) -> Result<Vec<FieldSpec>, SchemaError> {
    fields
        .iter()
        .map(|f| match &f.ty {
            Value::String(ty) => Ok(FieldSpec::new(&f.name, FieldType::parse(&f.name, ty)?)),
            other => Err(SchemaError::UnsupportedType {
                field: f.name.clone(),
                ty: other.to_string(),
            }),
        })
        .collect()
}

impl InstructionSchema {
    /// Parse an IDL JSON document
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let doc: IdlDocument =
            serde_json::from_str(json).map_err(|e| SchemaError::Document(e.to_string()))?;

        let instructions = doc
            .instructions
            .iter()
            .map(|ix| {
                Ok(InstructionSpec {
                    discriminator: discriminator(
                        &ix.name,
                        ix.discriminator.clone(),
                        instruction_discriminator(&ix.name),
                    )?,
                    fields: field_specs(&ix.args)?,
                    accounts: ix
                        .accounts
                        .iter()
                        .map(|a| AccountRole::new(&a.name, a.signer, a.writable))
                        .collect(),
                    name: ix.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        let accounts = doc
            .accounts
            .iter()
            .map(|acc| {
                let fields = match &acc.ty {
                    Some(s) => &s.fields,
                    None => doc
                        .types
                        .iter()
                        .find(|t| t.name == acc.name)
                        .map(|t| &t.ty.fields)
                        .ok_or_else(|| {
                            SchemaError::Document(format!("account '{}' has no layout", acc.name))
                        })?,
                };
                Ok(AccountLayout {
                    discriminator: discriminator(
                        &acc.name,
                        acc.discriminator.clone(),
                        account_discriminator(&acc.name),
                    )?,
                    fields: field_specs(fields)?,
                    name: acc.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        let errors = doc
            .errors
            .into_iter()
            .map(|e| RemoteErrorSpec {
                code: e.code,
                name: e.name,
                msg: e.msg,
            })
            .collect();

        let (meta_name, meta_version) = doc
            .metadata
            .map(|m| (m.name, m.version))
            .unwrap_or((None, None));

        Self::new(
            doc.version.or(meta_version),
            doc.name.or(meta_name),
            instructions,
            accounts,
            errors,
        )
    }

    /// Load an IDL JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Document(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Built-in layout of the deployed vault program
    pub fn builtin() -> Self {
        let instructions = vec![
            InstructionSpec {
                name: INITIALIZE.into(),
                discriminator: instruction_discriminator(INITIALIZE),
                fields: vec![FieldSpec::new("vault_authority_bump", FieldType::U8)],
                accounts: vec![
                    AccountRole::new("admin", true, true),
                    AccountRole::new("config", false, true),
                    AccountRole::new("mint", false, false),
                    AccountRole::new("vault_authority", false, false),
                    AccountRole::new("vault_ata", false, true),
                    AccountRole::new("system_program", false, false),
                    AccountRole::new("token_program", false, false),
                    AccountRole::new("associated_token_program", false, false),
                    AccountRole::new("rent", false, false),
                ],
            },
            InstructionSpec {
                name: SET_BOT_AUTHORITY.into(),
                discriminator: instruction_discriminator(SET_BOT_AUTHORITY),
                fields: vec![
                    FieldSpec::new("bot_authority", FieldType::Pubkey),
                    FieldSpec::new("daily_limit", FieldType::U64),
                ],
                accounts: vec![
                    AccountRole::new("config", false, true),
                    AccountRole::new("admin", true, true),
                ],
            },
            InstructionSpec {
                name: DISBURSE.into(),
                discriminator: DISBURSE_DISCRIMINATOR,
                fields: vec![FieldSpec::new("amount", FieldType::U64)],
                accounts: vec![
                    AccountRole::new("bot", true, true),
                    AccountRole::new("config", false, true),
                    AccountRole::new("vault_authority", false, false),
                    AccountRole::new("vault_ata", false, true),
                    AccountRole::new("recipient_ata", false, true),
                    AccountRole::new("token_program", false, false),
                ],
            },
        ];

        let accounts = vec![AccountLayout {
            name: VAULT_CONFIG.into(),
            discriminator: account_discriminator(VAULT_CONFIG),
            fields: vec![
                FieldSpec::new("admin", FieldType::Pubkey),
                FieldSpec::new("bot_authority", FieldType::Pubkey),
                FieldSpec::new("mint", FieldType::Pubkey),
                FieldSpec::new("vault_authority_bump", FieldType::U8),
                FieldSpec::new("daily_limit", FieldType::U64),
                FieldSpec::new("daily_disbursed", FieldType::U64),
                FieldSpec::new("last_reset_day", FieldType::I64),
            ],
        }];

        // The built-in tables are unique by construction
        Self::new(
            Some("0.1.0".into()),
            Some("beakin_vault".into()),
            instructions,
            accounts,
            Vec::new(),
        )
        .unwrap_or_default()
    }
}
