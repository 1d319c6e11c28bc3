//! Transaction assembly
//!
//! Compiles a plan into a legacy message with the fee payer and a blockhash
//! fetched immediately beforehand. Compilation is a pure function of
//! (instructions, fee payer, blockhash), so identical plans produce identical
//! message bytes apart from the blockhash field.

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::{
    hash::Hash, message::Message, pubkey::Pubkey, signature::Signature, transaction::Transaction,
};
use tracing::debug;

use crate::errors::DisburseResult;
use crate::rpc::{LatestBlockhash, LedgerRpc};
use crate::tx_builder::errors::TransactionBuilderError;
use crate::tx_builder::plan::{sanity_check_ix_order, InstructionPlan};

/// An assembled, possibly partially signed transaction
///
/// Bound to one blockhash: once that blockhash's validity window has elapsed
/// the value must be rebuilt through [`TransactionAssembler`], never resent.
#[derive(Debug, Clone)]
pub struct AssembledTransaction {
    pub transaction: Transaction,
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
    pub assembled_at: Instant,
}

impl AssembledTransaction {
    pub fn fee_payer(&self) -> Pubkey {
        self.transaction.message.account_keys[0]
    }

    /// Serialized message: the bytes every signer signs
    pub fn message_bytes(&self) -> Vec<u8> {
        self.transaction.message_data()
    }

    /// Keys whose signatures the message requires, in slot order
    pub fn required_signers(&self) -> &[Pubkey] {
        let count = self.transaction.message.header.num_required_signatures as usize;
        &self.transaction.message.account_keys[..count]
    }

    /// Place `signature` in `signer`'s slot
    pub fn add_signature(
        &mut self,
        signer: &Pubkey,
        signature: Signature,
    ) -> Result<(), TransactionBuilderError> {
        let position = self
            .required_signers()
            .iter()
            .position(|key| key == signer)
            .ok_or_else(|| TransactionBuilderError::UnexpectedSigner {
                signer: signer.to_string(),
            })?;
        self.transaction.signatures[position] = signature;
        Ok(())
    }

    /// Signer address to signature; unsigned slots are omitted
    pub fn signature_map(&self) -> Vec<(Pubkey, Signature)> {
        self.required_signers()
            .iter()
            .zip(&self.transaction.signatures)
            .filter(|(_, sig)| **sig != Signature::default())
            .map(|(key, sig)| (*key, *sig))
            .collect()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.transaction.is_signed()
    }

    /// Transaction id: the fee payer's signature
    pub fn signature(&self) -> Option<Signature> {
        self.transaction
            .signatures
            .first()
            .copied()
            .filter(|sig| *sig != Signature::default())
    }

    /// Wire bytes for submission
    pub fn wire_bytes(&self) -> Result<Vec<u8>, TransactionBuilderError> {
        bincode::serialize(&self.transaction)
            .map_err(|e| TransactionBuilderError::Serialization(e.to_string()))
    }

    pub fn age(&self) -> Duration {
        self.assembled_at.elapsed()
    }
}

/// Compile `plan` for `fee_payer` against a known blockhash
pub fn assemble_with_blockhash(
    plan: &InstructionPlan,
    fee_payer: &Pubkey,
    latest: LatestBlockhash,
) -> Result<AssembledTransaction, TransactionBuilderError> {
    sanity_check_ix_order(plan)?;

    let message =
        Message::new_with_blockhash(&plan.instructions(), Some(fee_payer), &latest.blockhash);
    if message.account_keys.first() != Some(fee_payer) {
        return Err(TransactionBuilderError::internal(
            "fee payer is not the first account key",
        ));
    }

    Ok(AssembledTransaction {
        transaction: Transaction::new_unsigned(message),
        blockhash: latest.blockhash,
        last_valid_block_height: latest.last_valid_block_height,
        assembled_at: Instant::now(),
    })
}

/// Assembles transactions with a freshly fetched blockhash
pub struct TransactionAssembler {
    rpc: Arc<dyn LedgerRpc>,
}

impl TransactionAssembler {
    pub fn new(rpc: Arc<dyn LedgerRpc>) -> Self {
        Self { rpc }
    }

    pub async fn assemble(
        &self,
        plan: &InstructionPlan,
        fee_payer: &Pubkey,
    ) -> DisburseResult<AssembledTransaction> {
        let latest = self.rpc.get_latest_blockhash().await?;
        let assembled = assemble_with_blockhash(plan, fee_payer, latest)?;
        debug!(
            blockhash = %assembled.blockhash,
            last_valid_block_height = assembled.last_valid_block_height,
            instructions = plan.len(),
            "Transaction assembled"
        );
        Ok(assembled)
    }
}
