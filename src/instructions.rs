//! Vault program instruction builders
//!
//! Binds derived addresses to the schema's named account slots and encodes
//! the arguments. Also builds the two non-vault instructions a disbursement
//! may carry: idempotent holding-account creation and the request memo.

use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_program, sysvar};

use crate::pda::VaultAddresses;
use crate::schema::{
    idl::{DISBURSE, INITIALIZE, SET_BOT_AUTHORITY},
    FieldValue, InstructionSchema, SchemaError,
};

/// SPL memo program (v2)
pub const MEMO_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// `bot_disburse_rewards(amount)` moving `amount` from the vault to `recipient_account`
pub fn disburse(
    schema: &InstructionSchema,
    addresses: &VaultAddresses,
    bot: &Pubkey,
    recipient_account: &Pubkey,
    amount: u64,
) -> Result<Instruction, SchemaError> {
    schema.build(
        &addresses.program_id,
        DISBURSE,
        &[FieldValue::U64(amount)],
        &[
            ("bot", *bot),
            ("config", addresses.config),
            ("vault_authority", addresses.vault_authority),
            ("vault_ata", addresses.vault_ata),
            ("recipient_ata", *recipient_account),
            ("token_program", addresses.token_program),
        ],
    )
}

/// `initialize(vault_authority_bump)`, creating the config account and vault holding account
pub fn initialize(
    schema: &InstructionSchema,
    addresses: &VaultAddresses,
    admin: &Pubkey,
) -> Result<Instruction, SchemaError> {
    schema.build(
        &addresses.program_id,
        INITIALIZE,
        &[FieldValue::U8(addresses.vault_authority_bump)],
        &[
            ("admin", *admin),
            ("config", addresses.config),
            ("mint", addresses.asset),
            ("vault_authority", addresses.vault_authority),
            ("vault_ata", addresses.vault_ata),
            ("system_program", system_program::id()),
            ("token_program", addresses.token_program),
            ("associated_token_program", spl_associated_token_account::id()),
            ("rent", sysvar::rent::id()),
        ],
    )
}

/// `admin_set_bot_authority(bot_authority, daily_limit)`
pub fn set_bot_authority(
    schema: &InstructionSchema,
    addresses: &VaultAddresses,
    admin: &Pubkey,
    bot_authority: &Pubkey,
    daily_limit: u64,
) -> Result<Instruction, SchemaError> {
    schema.build(
        &addresses.program_id,
        SET_BOT_AUTHORITY,
        &[
            FieldValue::Pubkey(*bot_authority),
            FieldValue::U64(daily_limit),
        ],
        &[("config", addresses.config), ("admin", *admin)],
    )
}

/// Create `owner`'s holding account for the vault asset; a no-op if it exists
pub fn create_holding_account(
    addresses: &VaultAddresses,
    payer: &Pubkey,
    owner: &Pubkey,
) -> Instruction {
    spl_associated_token_account::instruction::create_associated_token_account_idempotent(
        payer,
        owner,
        &addresses.asset,
        &addresses.token_program,
    )
}

/// Memo carrying the request id, so concurrent identical disbursements
/// sharing a blockhash still produce distinct transactions
pub fn request_memo(request_id: &str) -> Instruction {
    Instruction {
        program_id: MEMO_PROGRAM_ID,
        accounts: Vec::new(),
        data: request_id.as_bytes().to_vec(),
    }
}
