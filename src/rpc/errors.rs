use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

use super::retry::Retryable;

/// Ledger RPC error types
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    #[error("Timeout (endpoint: {endpoint})")]
    Timeout { endpoint: String },

    /// Error object returned by the RPC server
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    /// The blockhash bound into a submitted transaction is unknown or expired
    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    /// The runtime rejected the transaction (preflight or execution)
    #[error("Transaction rejected: {error} (endpoint: {endpoint})")]
    TransactionRejected {
        endpoint: String,
        error: TransactionError,
    },

    /// Bytes handed to the transport are not a valid transaction
    #[error("Malformed transaction: {0}")]
    Malformed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Check if this error is retryable for an idempotent read
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport { .. } => true,
            RpcError::Timeout { .. } => true,
            RpcError::RateLimitExceeded { .. } => true,
            RpcError::RpcResponse { code, .. } => {
                // JSON-RPC server errors and HTTP 5xx
                matches!(code, Some(c) if (500..600).contains(c) || (-32099..=-32000).contains(c))
            }

            RpcError::BlockhashNotFound { .. } => false,
            RpcError::TransactionRejected { .. } => false,
            RpcError::Malformed(_) => false,
            RpcError::Internal(_) => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            RpcError::Transport { .. } => "transport",
            RpcError::Timeout { .. } => "timeout",
            RpcError::RpcResponse { .. } => "rpc_response",
            RpcError::RateLimitExceeded { .. } => "rate_limited",
            RpcError::BlockhashNotFound { .. } => "blockhash",
            RpcError::TransactionRejected { .. } => "rejected",
            RpcError::Malformed(_) => "malformed",
            RpcError::Internal(_) => "internal",
        }
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcError::Transport { endpoint, .. }
            | RpcError::Timeout { endpoint }
            | RpcError::RpcResponse { endpoint, .. }
            | RpcError::RateLimitExceeded { endpoint }
            | RpcError::BlockhashNotFound { endpoint }
            | RpcError::TransactionRejected { endpoint, .. } => Some(endpoint),
            RpcError::Malformed(_) | RpcError::Internal(_) => None,
        }
    }

    /// Classify a runtime transaction error
    pub fn from_transaction_error(error: TransactionError, endpoint: &str) -> Self {
        match error {
            TransactionError::BlockhashNotFound => RpcError::BlockhashNotFound {
                endpoint: endpoint.to_string(),
            },
            error => RpcError::TransactionRejected {
                endpoint: endpoint.to_string(),
                error,
            },
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        // Structured transaction errors first (send, preflight simulation)
        if let Some(tx_err) = err.get_transaction_error() {
            return Self::from_transaction_error(tx_err, endpoint);
        }

        let err_str = err.to_string().to_lowercase();

        if err_str.contains("blockhash not found") {
            RpcError::BlockhashNotFound {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            RpcError::RateLimitExceeded {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            RpcError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if matches!(err.kind(), ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_)) {
            RpcError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            let code = match err.kind() {
                ClientErrorKind::RpcError(
                    solana_rpc_client_api::request::RpcError::RpcResponseError { code, .. },
                ) => Some(*code),
                _ => None,
            };
            RpcError::RpcResponse {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
                code,
            }
        }
    }
}

impl Retryable for RpcError {
    fn is_retryable(&self) -> bool {
        RpcError::is_retryable(self)
    }
}
