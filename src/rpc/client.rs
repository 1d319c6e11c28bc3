use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::UiTransactionEncoding;
use tracing::{debug, instrument};

use super::{
    retry_with_backoff, ConfirmationStatus, LatestBlockhash, LedgerRpc, RetryConfig, RpcError,
};

/// [`LedgerRpc`] over the JSON-RPC client
pub struct SolanaLedgerRpc {
    client: RpcClient,
    endpoint: String,
    commitment: CommitmentConfig,
    retry: RetryConfig,
}

impl SolanaLedgerRpc {
    pub fn new(
        endpoint: impl Into<String>,
        commitment: CommitmentConfig,
        retry: RetryConfig,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            client: RpcClient::new_with_commitment(endpoint.clone(), commitment),
            endpoint,
            commitment,
            retry,
        }
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }

    fn classify(&self, err: solana_client::client_error::ClientError) -> RpcError {
        RpcError::from_client_error(err, &self.endpoint)
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedgerRpc {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        let (blockhash, last_valid_block_height) =
            retry_with_backoff("get_latest_blockhash", &self.retry, || async {
                self.client
                    .get_latest_blockhash_with_commitment(self.commitment)
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await?;

        debug!(%blockhash, last_valid_block_height, "Fetched blockhash");
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height,
        })
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        retry_with_backoff("get_account_info", &self.retry, || async {
            self.client
                .get_account_with_commitment(address, self.commitment)
                .await
                .map(|response| response.value)
                .map_err(|e| self.classify(e))
        })
        .await
    }

    #[instrument(skip(self, wire), fields(endpoint = %self.endpoint, len = wire.len()))]
    async fn send_raw_transaction(&self, wire: &[u8]) -> Result<Signature, RpcError> {
        let transaction: Transaction =
            bincode::deserialize(wire).map_err(|e| RpcError::Malformed(e.to_string()))?;

        // Node-side rebroadcast disabled: the broadcast loop owns resubmission
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(0),
            min_context_slot: None,
        };

        self.client
            .send_transaction_with_config(&transaction, config)
            .await
            .map_err(|e| self.classify(e))
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        _blockhash: &Hash,
        last_valid_block_height: u64,
    ) -> Result<ConfirmationStatus, RpcError> {
        let statuses = retry_with_backoff("get_signature_statuses", &self.retry, || async {
            self.client
                .get_signature_statuses(std::slice::from_ref(signature))
                .await
                .map(|response| response.value)
                .map_err(|e| self.classify(e))
        })
        .await?;

        if let Some(Some(status)) = statuses.into_iter().next() {
            if let Some(err) = status.err {
                return Ok(ConfirmationStatus::Failed(err));
            }
            if status.satisfies_commitment(self.commitment) {
                return Ok(ConfirmationStatus::Confirmed { slot: status.slot });
            }
            // Landed but not yet at the target commitment; cannot expire now
            return Ok(ConfirmationStatus::Pending);
        }

        let block_height = retry_with_backoff("get_block_height", &self.retry, || async {
            self.client
                .get_block_height_with_commitment(self.commitment)
                .await
                .map_err(|e| self.classify(e))
        })
        .await?;

        if block_height > last_valid_block_height {
            Ok(ConfirmationStatus::Expired)
        } else {
            Ok(ConfirmationStatus::Pending)
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
