//! Broadcast and confirmation
//!
//! `execute` drives the assemble -> sign -> submit -> confirm loop. A signed
//! transaction is bound to its blockhash; when that blockhash expires the
//! loop rebuilds with a fresh one and re-signs, it never resubmits the old
//! bytes. A transport failure during submission leaves the outcome unknown,
//! so the known signature is polled instead of sending again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::{
    hash::Hash, instruction::InstructionError, pubkey::Pubkey, signature::Signature,
    transaction::TransactionError,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::{DisburseError, DisburseResult};
use crate::metrics::{metrics, Timer};
use crate::rpc::{ConfirmationStatus, LedgerRpc, RpcError};
use crate::schema::InstructionSchema;
use crate::signer::SigningCoordinator;
use crate::tx_builder::{AssembledTransaction, InstructionPlan, TransactionAssembler};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A confirmed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executed {
    pub signature: Signature,
    pub slot: u64,
    /// Build-sign-submit rounds used, starting at 1
    pub attempts: u32,
}

pub struct BroadcastClient {
    rpc: Arc<dyn LedgerRpc>,
    poll_interval: Duration,
    confirm_timeout: Duration,
    max_attempts: u32,
}

impl BroadcastClient {
    pub fn new(rpc: Arc<dyn LedgerRpc>) -> Self {
        Self {
            rpc,
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Submit a fully signed transaction once
    pub async fn submit(&self, tx: &AssembledTransaction) -> Result<Signature, RpcError> {
        let wire = tx
            .wire_bytes()
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        self.rpc.send_raw_transaction(&wire).await
    }

    /// Poll until a terminal status or the confirmation timeout
    ///
    /// Returns [`ConfirmationStatus::Pending`] only when the timeout elapsed
    /// while the blockhash was still valid.
    #[instrument(skip(self), fields(endpoint = %self.rpc.endpoint()))]
    pub async fn await_confirmation(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        last_valid_block_height: u64,
    ) -> Result<ConfirmationStatus, RpcError> {
        let deadline = Instant::now() + self.confirm_timeout;
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self
                .rpc
                .confirm_transaction(signature, blockhash, last_valid_block_height)
                .await
            {
                Ok(status) if status.is_terminal() => {
                    debug!(polls, ?status, "Confirmation check finished");
                    return Ok(status);
                }
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, polls, "Confirmation check failed, will poll again");
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Ok(ConfirmationStatus::Pending);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Assemble, sign, submit and confirm `plan`, rebuilding on blockhash expiry
    #[instrument(skip_all, fields(fee_payer = %fee_payer, instructions = plan.len()))]
    pub async fn execute(
        &self,
        plan: &InstructionPlan,
        fee_payer: &Pubkey,
        assembler: &TransactionAssembler,
        coordinator: &SigningCoordinator,
        schema: &InstructionSchema,
    ) -> DisburseResult<Executed> {
        let mut last_signature = None;

        for attempt in 1..=self.max_attempts {
            let mut tx = assembler.assemble(plan, fee_payer).await?;
            let signature = coordinator.sign_transaction(&mut tx).await?;
            last_signature = Some(signature);

            match self.submit(&tx).await {
                Ok(returned) => {
                    if returned != signature {
                        warn!(%signature, %returned, "Ledger returned a different signature");
                    }
                    debug!(%signature, attempt, "Transaction submitted");
                }
                Err(e @ RpcError::BlockhashNotFound { .. }) => {
                    warn!(
                        error = %e,
                        blockhash = %tx.blockhash,
                        attempt,
                        "Stale blockhash, rebuilding transaction"
                    );
                    metrics().blockhash_rebuilds.inc();
                    continue;
                }
                Err(RpcError::TransactionRejected { error, .. }) => {
                    return Err(remote_rejected(schema, error, Some(signature)));
                }
                Err(e) if e.is_retryable() => {
                    // Outcome unknown: the bytes may have reached a leader
                    warn!(
                        error = %e,
                        %signature,
                        "Submission outcome unknown, polling signature"
                    );
                }
                Err(e) => return Err(e.into()),
            }

            let timer = Timer::new();
            let status = self
                .await_confirmation(&signature, &tx.blockhash, tx.last_valid_block_height)
                .await?;
            match status {
                ConfirmationStatus::Confirmed { slot } => {
                    timer.observe_duration(&metrics().confirmation_latency);
                    info!(%signature, slot, attempt, "Transaction confirmed");
                    return Ok(Executed {
                        signature,
                        slot,
                        attempts: attempt,
                    });
                }
                ConfirmationStatus::Failed(error) => {
                    return Err(remote_rejected(schema, error, Some(signature)));
                }
                ConfirmationStatus::Expired => {
                    warn!(
                        %signature,
                        attempt,
                        age_ms = tx.age().as_millis() as u64,
                        "Blockhash expired before confirmation"
                    );
                    metrics().blockhash_rebuilds.inc();
                }
                ConfirmationStatus::Pending => {
                    // Still valid: rebuilding could land a second transfer
                    warn!(%signature, attempt, "Confirmation timed out with blockhash still valid");
                    return Err(DisburseError::BroadcastTimeout {
                        attempts: attempt,
                        last_signature,
                    });
                }
            }
        }

        Err(DisburseError::BroadcastTimeout {
            attempts: self.max_attempts,
            last_signature,
        })
    }
}

/// Map a runtime rejection to [`DisburseError::RemoteRejected`], naming
/// program errors the schema declares
pub fn remote_rejected(
    schema: &InstructionSchema,
    error: TransactionError,
    signature: Option<Signature>,
) -> DisburseError {
    let (reason, code) = match &error {
        TransactionError::InstructionError(index, InstructionError::Custom(code)) => {
            let reason = match schema.remote_error(*code) {
                Some(spec) => match &spec.msg {
                    Some(msg) => format!("instruction {index}: {} ({code}): {msg}", spec.name),
                    None => format!("instruction {index}: {} ({code})", spec.name),
                },
                None => format!("instruction {index}: custom program error {code}"),
            };
            (reason, Some(*code))
        }
        other => (other.to_string(), None),
    };
    DisburseError::RemoteRejected {
        reason,
        code,
        signature,
    }
}
