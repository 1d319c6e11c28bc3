//! Ledger RPC surface consumed by the pipeline
//!
//! Four capabilities: latest blockhash, account lookup, raw submission and a
//! single confirmation check. Reads are idempotent and retried with backoff
//! by the implementation; `send_raw_transaction` is at-most-once and never
//! retried below the broadcast loop.

pub mod client;
pub mod errors;
pub mod retry;

use async_trait::async_trait;
use solana_sdk::{
    account::Account, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::TransactionError,
};

pub use client::SolanaLedgerRpc;
pub use errors::RpcError;
pub use retry::{retry_with_backoff, RetryConfig, Retryable};

/// Blockhash plus the last block height at which it is still accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Outcome of one confirmation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Not yet confirmed; blockhash still valid
    Pending,
    /// Reached the configured commitment
    Confirmed { slot: u64 },
    /// Executed and failed
    Failed(TransactionError),
    /// Not landed and the blockhash validity window has elapsed
    Expired,
}

impl ConfirmationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationStatus::Pending)
    }
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError>;

    /// `None` when the account does not exist
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcError>;

    /// Submit serialized transaction bytes exactly once
    async fn send_raw_transaction(&self, wire: &[u8]) -> Result<Signature, RpcError>;

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        last_valid_block_height: u64,
    ) -> Result<ConfirmationStatus, RpcError>;

    /// Endpoint label for logs and errors
    fn endpoint(&self) -> &str;
}
