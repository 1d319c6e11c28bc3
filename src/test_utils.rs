//! Test Utilities Module
//!
//! In-memory doubles for the ledger RPC and the hardware signing device, so
//! the full pipeline can run deterministically without a network or device.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::InstructionError,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::{Transaction, TransactionError},
};
use spl_token::solana_program::{program_option::COption, program_pack::Pack};
use spl_token::state::{Account as TokenAccount, AccountState};

use crate::pda::VaultAddresses;
use crate::rpc::{ConfirmationStatus, LatestBlockhash, LedgerRpc, RpcError};
use crate::schema::{codec, idl, FieldType, FieldValue, InstructionSchema};
use crate::signer::{DerivationPath, DeviceError, HardwareWallet, SignerError};
use crate::types::VaultConfigAccount;

/// Custom program error the mock raises when the daily limit is exceeded
pub const MOCK_DAILY_LIMIT_ERROR: u32 = 6000;
/// Custom program error for a signer that is not the configured authority
pub const MOCK_UNAUTHORIZED_ERROR: u32 = 6001;

const MOCK_ENDPOINT: &str = "mock://ledger";
const BLOCKHASH_LIFETIME: u64 = 150;

/// One call made against [`MockLedger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    GetLatestBlockhash,
    GetAccountInfo(Pubkey),
    SendTransaction(Signature),
    ConfirmTransaction(Signature),
}

/// Scripted outcome of a confirmation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedConfirmation {
    /// Execute the transaction and report the result
    Land,
    Pending,
    Expire,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Account>,
    expired: HashSet<Hash>,
    expire_next: u32,
    block_height: u64,
    slot: u64,
    calls: Vec<LedgerCall>,
    account_query_failures: u32,
    send_failures: VecDeque<RpcError>,
    confirmations: VecDeque<ScriptedConfirmation>,
    in_flight: HashMap<Signature, Transaction>,
    landed: HashMap<Signature, Result<u64, TransactionError>>,
    vault: Option<(VaultAddresses, InstructionSchema)>,
}

/// In-memory ledger
///
/// Submitted transactions are verified, held in flight and executed when a
/// confirmation check lands them. Execution understands idempotent
/// holding-account creation, the three vault instructions and memos.
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                block_height: 1_000,
                slot: 5_000,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert an initialized token account
    pub fn create_token_account(
        &self,
        address: &Pubkey,
        mint: &Pubkey,
        owner: &Pubkey,
        amount: u64,
    ) {
        self.state()
            .accounts
            .insert(*address, token_account(mint, owner, amount));
    }

    /// Deploy the vault program without initializing it
    pub fn register_vault(&self, addresses: &VaultAddresses, schema: &InstructionSchema) {
        self.state().vault = Some((addresses.clone(), schema.clone()));
    }

    /// Install the vault config account and fund the vault holding account
    pub fn install_vault(
        &self,
        addresses: &VaultAddresses,
        schema: &InstructionSchema,
        config: &VaultConfigAccount,
        vault_balance: u64,
    ) {
        let data = encode_vault_config(schema, addresses, config);
        let mut state = self.state();
        state.accounts.insert(
            addresses.config,
            Account {
                lamports: 1_000_000,
                data,
                owner: addresses.program_id,
                executable: false,
                rent_epoch: 0,
            },
        );
        state.accounts.insert(
            addresses.vault_ata,
            token_account(&addresses.asset, &addresses.vault_authority, vault_balance),
        );
        state.vault = Some((addresses.clone(), schema.clone()));
    }

    /// Current vault config as seen by the ledger
    pub fn vault_config(&self) -> Option<VaultConfigAccount> {
        let state = self.state();
        let (addresses, schema) = state.vault.as_ref()?;
        let account = state.accounts.get(&addresses.config)?;
        VaultConfigAccount::decode(schema, &account.data).ok()
    }

    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        let state = self.state();
        let account = state.accounts.get(address)?;
        TokenAccount::unpack(&account.data).ok().map(|a| a.amount)
    }

    pub fn account_exists(&self, address: &Pubkey) -> bool {
        self.state().accounts.contains_key(address)
    }

    /// The next `n` account queries fail with a transport error
    pub fn fail_account_queries(&self, n: u32) {
        self.state().account_query_failures = n;
    }

    /// The next `n` blockhashes handed out are already expired on submission
    pub fn expire_next_blockhashes(&self, n: u32) {
        self.state().expire_next = n;
    }

    pub fn fail_next_send(&self, error: RpcError) {
        self.state().send_failures.push_back(error);
    }

    /// Outcomes for the next confirmation checks; [`ScriptedConfirmation::Land`]
    /// once the script runs out
    pub fn script_confirmations(&self, outcomes: impl IntoIterator<Item = ScriptedConfirmation>) {
        self.state().confirmations.extend(outcomes);
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&LedgerCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Transactions that were accepted for submission, in order
    pub fn submitted(&self) -> Vec<Signature> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                LedgerCall::SendTransaction(sig) => Some(*sig),
                _ => None,
            })
            .collect()
    }

    /// Execution result of a landed transaction
    pub fn landed(&self, signature: &Signature) -> Option<Result<u64, TransactionError>> {
        self.state().landed.get(signature).cloned()
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        let mut state = self.state();
        state.calls.push(LedgerCall::GetLatestBlockhash);
        let blockhash = Hash::new_unique();
        if state.expire_next > 0 {
            state.expire_next -= 1;
            state.expired.insert(blockhash);
        }
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height: state.block_height + BLOCKHASH_LIFETIME,
        })
    }

    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        let mut state = self.state();
        state.calls.push(LedgerCall::GetAccountInfo(*address));
        if state.account_query_failures > 0 {
            state.account_query_failures -= 1;
            return Err(RpcError::Transport {
                endpoint: MOCK_ENDPOINT.into(),
                message: "connection reset".into(),
            });
        }
        Ok(state.accounts.get(address).cloned())
    }

    async fn send_raw_transaction(&self, wire: &[u8]) -> Result<Signature, RpcError> {
        let transaction: Transaction =
            bincode::deserialize(wire).map_err(|e| RpcError::Malformed(e.to_string()))?;
        let signature = transaction.signatures.first().copied().unwrap_or_default();

        let mut state = self.state();
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        transaction.verify().map_err(|error| RpcError::TransactionRejected {
            endpoint: MOCK_ENDPOINT.into(),
            error,
        })?;
        if state.expired.contains(&transaction.message.recent_blockhash) {
            return Err(RpcError::BlockhashNotFound {
                endpoint: MOCK_ENDPOINT.into(),
            });
        }

        state.calls.push(LedgerCall::SendTransaction(signature));
        // A duplicate of an in-flight or landed transaction is dropped
        if !state.landed.contains_key(&signature) {
            state.in_flight.entry(signature).or_insert(transaction);
        }
        Ok(signature)
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        _blockhash: &Hash,
        _last_valid_block_height: u64,
    ) -> Result<ConfirmationStatus, RpcError> {
        let mut state = self.state();
        state.calls.push(LedgerCall::ConfirmTransaction(*signature));

        if let Some(result) = state.landed.get(signature) {
            return Ok(match result {
                Ok(slot) => ConfirmationStatus::Confirmed { slot: *slot },
                Err(e) => ConfirmationStatus::Failed(e.clone()),
            });
        }
        if !state.in_flight.contains_key(signature) {
            return Ok(ConfirmationStatus::Pending);
        }

        match state
            .confirmations
            .pop_front()
            .unwrap_or(ScriptedConfirmation::Land)
        {
            ScriptedConfirmation::Pending => Ok(ConfirmationStatus::Pending),
            ScriptedConfirmation::Expire => {
                state.in_flight.remove(signature);
                Ok(ConfirmationStatus::Expired)
            }
            ScriptedConfirmation::Land => {
                let Some(transaction) = state.in_flight.remove(signature) else {
                    return Ok(ConfirmationStatus::Pending);
                };
                state.slot += 1;
                let slot = state.slot;
                let result = execute(&mut state, &transaction).map(|_| slot);
                state.landed.insert(*signature, result.clone());
                Ok(match result {
                    Ok(slot) => ConfirmationStatus::Confirmed { slot },
                    Err(e) => ConfirmationStatus::Failed(e),
                })
            }
        }
    }

    fn endpoint(&self) -> &str {
        MOCK_ENDPOINT
    }
}

fn token_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Account {
    let state = TokenAccount {
        mint: *mint,
        owner: *owner,
        amount,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    let mut data = vec![0u8; TokenAccount::LEN];
    TokenAccount::pack(state, &mut data).unwrap_or_default();
    Account {
        lamports: 2_039_280,
        data,
        owner: spl_token::id(),
        executable: false,
        rent_epoch: 0,
    }
}

fn encode_vault_config(
    schema: &InstructionSchema,
    addresses: &VaultAddresses,
    config: &VaultConfigAccount,
) -> Vec<u8> {
    let Ok(layout) = schema.account(idl::VAULT_CONFIG) else {
        return Vec::new();
    };
    let values: Vec<FieldValue> = layout
        .fields
        .iter()
        .map(|field| match field.name.as_str() {
            "admin" => FieldValue::Pubkey(config.admin.unwrap_or_default()),
            "bot_authority" => FieldValue::Pubkey(config.bot_authority),
            "mint" => FieldValue::Pubkey(addresses.asset),
            "vault_authority_bump" => FieldValue::U8(addresses.vault_authority_bump),
            "daily_limit" => FieldValue::U64(config.daily_limit),
            "daily_disbursed" => FieldValue::U64(config.daily_disbursed),
            "last_reset_day" => FieldValue::I64(config.last_reset_day),
            _ => zero_value(field.ty),
        })
        .collect();
    codec::encode_account(layout, &values).unwrap_or_default()
}

fn zero_value(ty: FieldType) -> FieldValue {
    let zeros = vec![0u8; ty.width()];
    FieldValue::read_le(ty, &zeros).unwrap_or(FieldValue::U8(0))
}

fn instruction_error(index: usize, error: InstructionError) -> TransactionError {
    TransactionError::InstructionError(index as u8, error)
}

/// Apply a transaction's effects atomically
fn execute(state: &mut LedgerState, transaction: &Transaction) -> Result<(), TransactionError> {
    let mut accounts = state.accounts.clone();
    let message = &transaction.message;
    let signers = &message.account_keys[..message.header.num_required_signatures as usize];

    for (index, ix) in message.instructions.iter().enumerate() {
        let err = |e: InstructionError| instruction_error(index, e);
        let program = message.account_keys[ix.program_id_index as usize];
        let keys: Vec<Pubkey> = ix
            .accounts
            .iter()
            .map(|i| message.account_keys[*i as usize])
            .collect();

        if program == spl_associated_token_account::id() {
            let [_, ata, owner, mint, ..] = keys.as_slice() else {
                return Err(err(InstructionError::NotEnoughAccountKeys));
            };
            accounts
                .entry(*ata)
                .or_insert_with(|| token_account(mint, owner, 0));
        } else if program == crate::instructions::MEMO_PROGRAM_ID {
            if std::str::from_utf8(&ix.data).is_err() {
                return Err(err(InstructionError::InvalidInstructionData));
            }
        } else {
            let Some((addresses, schema)) = state.vault.as_ref() else {
                return Err(err(InstructionError::IncorrectProgramId));
            };
            if program != addresses.program_id {
                return Err(err(InstructionError::IncorrectProgramId));
            }
            MockVault { addresses, schema }
                .process(&mut accounts, &keys, signers, &ix.data)
                .map_err(err)?;
        }
    }

    state.accounts = accounts;
    Ok(())
}

/// Just enough of the vault program to exercise the client
struct MockVault<'a> {
    addresses: &'a VaultAddresses,
    schema: &'a InstructionSchema,
}

impl MockVault<'_> {
    fn process(
        &self,
        accounts: &mut HashMap<Pubkey, Account>,
        keys: &[Pubkey],
        signers: &[Pubkey],
        data: &[u8],
    ) -> Result<(), InstructionError> {
        let discriminator = data
            .get(..8)
            .ok_or(InstructionError::InvalidInstructionData)?;
        let spec = [idl::INITIALIZE, idl::SET_BOT_AUTHORITY, idl::DISBURSE]
            .into_iter()
            .filter_map(|name| self.schema.instruction(name).ok())
            .find(|spec| spec.discriminator[..] == *discriminator)
            .ok_or(InstructionError::InvalidInstructionData)?;
        let fields = codec::decode_instruction(spec, data)
            .map_err(|_| InstructionError::InvalidInstructionData)?;
        if keys.len() != spec.accounts.len() {
            return Err(InstructionError::NotEnoughAccountKeys);
        }
        let require_signer = |key: &Pubkey| {
            if signers.contains(key) {
                Ok(())
            } else {
                Err(InstructionError::MissingRequiredSignature)
            }
        };

        match spec.name.as_str() {
            idl::INITIALIZE => {
                let admin = keys[0];
                require_signer(&admin)?;
                if accounts.contains_key(&self.addresses.config) {
                    return Err(InstructionError::AccountAlreadyInitialized);
                }
                let config = VaultConfigAccount {
                    admin: Some(admin),
                    bot_authority: Pubkey::default(),
                    daily_limit: 0,
                    daily_disbursed: 0,
                    last_reset_day: 0,
                };
                accounts.insert(
                    self.addresses.config,
                    Account {
                        lamports: 1_000_000,
                        data: encode_vault_config(self.schema, self.addresses, &config),
                        owner: self.addresses.program_id,
                        executable: false,
                        rent_epoch: 0,
                    },
                );
                accounts.entry(self.addresses.vault_ata).or_insert_with(|| {
                    token_account(&self.addresses.asset, &self.addresses.vault_authority, 0)
                });
                Ok(())
            }
            idl::SET_BOT_AUTHORITY => {
                let admin = keys[1];
                require_signer(&admin)?;
                let mut config = self.load_config(accounts)?;
                if config.admin != Some(admin) {
                    return Err(InstructionError::Custom(MOCK_UNAUTHORIZED_ERROR));
                }
                config.bot_authority = fields
                    .get("bot_authority")
                    .and_then(|v| v.as_pubkey())
                    .ok_or(InstructionError::InvalidArgument)?;
                config.daily_limit = fields
                    .get("daily_limit")
                    .and_then(|v| v.as_u64())
                    .ok_or(InstructionError::InvalidArgument)?;
                self.store_config(accounts, &config);
                Ok(())
            }
            _ => {
                let (bot, recipient) = (keys[0], keys[4]);
                require_signer(&bot)?;
                let amount = fields
                    .get("amount")
                    .and_then(|v| v.as_u64())
                    .ok_or(InstructionError::InvalidArgument)?;
                let mut config = self.load_config(accounts)?;
                if config.bot_authority != bot {
                    return Err(InstructionError::Custom(MOCK_UNAUTHORIZED_ERROR));
                }
                config.daily_disbursed = config
                    .daily_disbursed
                    .checked_add(amount)
                    .filter(|total| *total <= config.daily_limit)
                    .ok_or(InstructionError::Custom(MOCK_DAILY_LIMIT_ERROR))?;

                move_tokens(accounts, &self.addresses.vault_ata, -i128::from(amount))?;
                move_tokens(accounts, &recipient, i128::from(amount))?;
                self.store_config(accounts, &config);
                Ok(())
            }
        }
    }

    fn load_config(
        &self,
        accounts: &HashMap<Pubkey, Account>,
    ) -> Result<VaultConfigAccount, InstructionError> {
        let account = accounts
            .get(&self.addresses.config)
            .ok_or(InstructionError::UninitializedAccount)?;
        VaultConfigAccount::decode(self.schema, &account.data)
            .map_err(|_| InstructionError::InvalidAccountData)
    }

    fn store_config(&self, accounts: &mut HashMap<Pubkey, Account>, config: &VaultConfigAccount) {
        let data = encode_vault_config(self.schema, self.addresses, config);
        if let Some(account) = accounts.get_mut(&self.addresses.config) {
            account.data = data;
        }
    }
}

fn move_tokens(
    accounts: &mut HashMap<Pubkey, Account>,
    address: &Pubkey,
    delta: i128,
) -> Result<(), InstructionError> {
    let account = accounts
        .get_mut(address)
        .ok_or(InstructionError::UninitializedAccount)?;
    let mut token =
        TokenAccount::unpack(&account.data).map_err(|_| InstructionError::InvalidAccountData)?;
    let balance = i128::from(token.amount) + delta;
    token.amount = u64::try_from(balance).map_err(|_| InstructionError::InsufficientFunds)?;
    TokenAccount::pack(token, &mut account.data).map_err(|_| InstructionError::InvalidAccountData)
}

/// Scripted behaviour of [`MockDevice`] on a signing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBehaviour {
    Approve,
    Cancel,
    Disconnect,
}

/// Hardware device double holding a keypair
pub struct MockDevice {
    keypair: Keypair,
    reported_address: Mutex<Option<Pubkey>>,
    behaviour: Mutex<DeviceBehaviour>,
    sign_requests: AtomicU32,
    disconnected: AtomicBool,
}

impl MockDevice {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            reported_address: Mutex::new(None),
            behaviour: Mutex::new(DeviceBehaviour::Approve),
            sign_requests: AtomicU32::new(0),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Report `address` instead of the held key (wrong device or account)
    pub fn report_address(&self, address: Pubkey) {
        if let Ok(mut reported) = self.reported_address.lock() {
            *reported = Some(address);
        }
    }

    pub fn set_behaviour(&self, behaviour: DeviceBehaviour) {
        if let Ok(mut current) = self.behaviour.lock() {
            *current = behaviour;
        }
    }

    pub fn sign_requests(&self) -> u32 {
        self.sign_requests.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<(), SignerError> {
        if self.is_disconnected() {
            return Err(DeviceError::Disconnected("mock device closed".into()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl HardwareWallet for MockDevice {
    async fn get_address(&self, _path: &DerivationPath) -> Result<Pubkey, SignerError> {
        self.check_connected()?;
        let reported = self.reported_address.lock().ok().and_then(|r| *r);
        Ok(reported.unwrap_or_else(|| self.keypair.pubkey()))
    }

    async fn sign_message(
        &self,
        _path: &DerivationPath,
        message: &[u8],
    ) -> Result<Signature, SignerError> {
        self.check_connected()?;
        self.sign_requests.fetch_add(1, Ordering::SeqCst);
        let behaviour = self
            .behaviour
            .lock()
            .map(|b| *b)
            .unwrap_or(DeviceBehaviour::Approve);
        match behaviour {
            DeviceBehaviour::Approve => Ok(self.keypair.sign_message(message)),
            DeviceBehaviour::Cancel => Err(DeviceError::UserCancelled.into()),
            DeviceBehaviour::Disconnect => {
                self.disconnected.store(true, Ordering::SeqCst);
                Err(DeviceError::Disconnected("unplugged during signing".into()).into())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), SignerError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
