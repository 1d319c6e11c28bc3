//! Instruction schema registry
//!
//! Maps symbolic instruction and account names to binary layouts and
//! discriminators. The registry is loaded once from the program's versioned
//! IDL document (or the built-in copy) and shared read-only afterwards.
//!
//! ## Layout rules
//! - instruction data: 8-byte discriminator, then each argument in declared
//!   order, fixed-width little-endian integers, raw 32-byte addresses
//! - no padding, no reordering, no optional or variable-length fields
//! - account metas are positional; [`InstructionSchema::build`] resolves them
//!   by name locally and emits them in the declared order

pub mod codec;
pub mod idl;
pub mod types;

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use thiserror::Error;

pub use types::{
    normalize_name, AccountLayout, AccountRole, DecodedFields, FieldSpec, FieldType, FieldValue,
    InstructionSpec,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown instruction '{0}'")]
    UnknownInstruction(String),

    #[error("unknown account layout '{0}'")]
    UnknownAccount(String),

    #[error("unsupported type '{ty}' for field '{field}'")]
    UnsupportedType { field: String, ty: String },

    #[error("invalid discriminator for '{name}': expected 8 bytes, got {len}")]
    BadDiscriminator { name: String, len: usize },

    #[error("duplicate discriminator {discriminator} shared by '{first}' and '{second}'")]
    DuplicateDiscriminator {
        discriminator: String,
        first: String,
        second: String,
    },

    #[error("'{name}': {reason}")]
    FieldMismatch { name: String, reason: String },

    #[error("'{name}': account binding: {reason}")]
    AccountBinding { name: String, reason: String },

    #[error("'{name}': data length {actual}, expected {expected}")]
    DataLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("'{name}': discriminator mismatch")]
    DiscriminatorMismatch { name: String },

    #[error("schema document: {0}")]
    Document(String),
}

/// Named program error declared by the schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteErrorSpec {
    pub code: u32,
    pub name: String,
    pub msg: Option<String>,
}

/// `sha256("global:<name>")[..8]`, the discriminator convention for instructions
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    namespaced_discriminator("global", name)
}

/// `sha256("account:<Name>")[..8]`, the discriminator convention for accounts
pub fn account_discriminator(name: &str) -> [u8; 8] {
    namespaced_discriminator("account", name)
}

fn namespaced_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Read-only registry of instruction and account layouts
#[derive(Debug, Clone, Default)]
pub struct InstructionSchema {
    pub version: Option<String>,
    pub program_name: Option<String>,
    instructions: HashMap<String, InstructionSpec>,
    accounts: HashMap<String, AccountLayout>,
    errors: HashMap<u32, RemoteErrorSpec>,
}

impl InstructionSchema {
    pub fn new(
        version: Option<String>,
        program_name: Option<String>,
        instructions: Vec<InstructionSpec>,
        accounts: Vec<AccountLayout>,
        errors: Vec<RemoteErrorSpec>,
    ) -> Result<Self, SchemaError> {
        let mut by_disc: HashMap<[u8; 8], String> = HashMap::new();
        let mut instruction_map = HashMap::with_capacity(instructions.len());
        for spec in instructions {
            if let Some(first) = by_disc.insert(spec.discriminator, spec.name.clone()) {
                return Err(SchemaError::DuplicateDiscriminator {
                    discriminator: hex::encode(spec.discriminator),
                    first,
                    second: spec.name,
                });
            }
            let key = normalize_name(&spec.name);
            if let Some(first) = instruction_map.get(&key) {
                let first: &InstructionSpec = first;
                return Err(SchemaError::Document(format!(
                    "instructions '{}' and '{}' have the same name",
                    first.name, spec.name
                )));
            }
            instruction_map.insert(key, spec);
        }

        Ok(Self {
            version,
            program_name,
            instructions: instruction_map,
            accounts: accounts
                .into_iter()
                .map(|a| (normalize_name(&a.name), a))
                .collect(),
            errors: errors.into_iter().map(|e| (e.code, e)).collect(),
        })
    }

    pub fn instruction(&self, name: &str) -> Result<&InstructionSpec, SchemaError> {
        self.instructions
            .get(&normalize_name(name))
            .ok_or_else(|| SchemaError::UnknownInstruction(name.to_string()))
    }

    pub fn account(&self, name: &str) -> Result<&AccountLayout, SchemaError> {
        self.accounts
            .get(&normalize_name(name))
            .ok_or_else(|| SchemaError::UnknownAccount(name.to_string()))
    }

    /// Name of a program error code, when the schema declares it
    pub fn remote_error(&self, code: u32) -> Option<&RemoteErrorSpec> {
        self.errors.get(&code)
    }

    /// Encode instruction data for `name` from positional field values
    pub fn encode(&self, name: &str, values: &[FieldValue]) -> Result<Vec<u8>, SchemaError> {
        codec::encode_instruction(self.instruction(name)?, values)
    }

    /// Build a full instruction: encoded data plus accounts in declared order
    ///
    /// `accounts` binds schema account names to addresses; every declared slot
    /// must be bound exactly once.
    pub fn build(
        &self,
        program_id: &Pubkey,
        name: &str,
        values: &[FieldValue],
        accounts: &[(&str, Pubkey)],
    ) -> Result<Instruction, SchemaError> {
        let spec = self.instruction(name)?;
        let data = codec::encode_instruction(spec, values)?;
        let metas = bind_accounts(spec, accounts)?;
        Ok(Instruction {
            program_id: *program_id,
            accounts: metas,
            data,
        })
    }
}

fn bind_accounts(
    spec: &InstructionSpec,
    bindings: &[(&str, Pubkey)],
) -> Result<Vec<AccountMeta>, SchemaError> {
    if bindings.len() != spec.accounts.len() {
        return Err(SchemaError::AccountBinding {
            name: spec.name.clone(),
            reason: format!(
                "expected {} accounts, got {}",
                spec.accounts.len(),
                bindings.len()
            ),
        });
    }

    spec.accounts
        .iter()
        .map(|role| {
            let wanted = normalize_name(&role.name);
            let mut matches = bindings
                .iter()
                .filter(|(n, _)| normalize_name(n) == wanted);
            let (_, address) = matches.next().ok_or_else(|| SchemaError::AccountBinding {
                name: spec.name.clone(),
                reason: format!("missing account '{}'", role.name),
            })?;
            if matches.next().is_some() {
                return Err(SchemaError::AccountBinding {
                    name: spec.name.clone(),
                    reason: format!("account '{}' bound twice", role.name),
                });
            }
            Ok(if role.writable {
                AccountMeta::new(*address, role.signer)
            } else {
                AccountMeta::new_readonly(*address, role.signer)
            })
        })
        .collect()
}
