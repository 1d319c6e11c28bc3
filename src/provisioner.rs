//! Recipient holding-account provisioning
//!
//! Existence is always read from the ledger; nothing is cached between
//! requests, so a creation confirmed by an earlier transaction is observed
//! on the next call.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::errors::{DisburseError, DisburseResult};
use crate::pda::associated_token_address;
use crate::rpc::LedgerRpc;

/// Result of [`AccountProvisioner::ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    pub address: Pubkey,
    pub creation_needed: bool,
}

pub struct AccountProvisioner {
    rpc: Arc<dyn LedgerRpc>,
    token_program: Pubkey,
}

impl AccountProvisioner {
    pub fn new(rpc: Arc<dyn LedgerRpc>) -> Self {
        Self {
            rpc,
            token_program: spl_token::id(),
        }
    }

    /// Derive `owner`'s holding account for `asset` and check whether it exists
    ///
    /// A query that still fails after the transport's retries surfaces as
    /// [`DisburseError::AccountQueryFailed`]; neither state is assumed.
    pub async fn ensure(&self, owner: &Pubkey, asset: &Pubkey) -> DisburseResult<Provisioned> {
        let address = associated_token_address(owner, asset, &self.token_program)?.address;

        let account = self
            .rpc
            .get_account_info(&address)
            .await
            .map_err(|e| DisburseError::AccountQueryFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let creation_needed = account.is_none();
        debug!(%owner, %address, creation_needed, "Holding account checked");

        Ok(Provisioned {
            address,
            creation_needed,
        })
    }
}
