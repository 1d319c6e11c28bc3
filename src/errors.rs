//! Error taxonomy for the disbursement pipeline
//!
//! Every stage of the pipeline (validation, derivation, encoding, guard,
//! provisioning, assembly, signing, broadcast) reports through
//! [`DisburseError`]. Component errors convert into it with `From`, so the
//! stages compose with `?`.
//!
//! Retry rules:
//! - validation, derivation and schema errors are never retried
//! - transient network errors are retried by the RPC layer with backoff
//! - stale blockhash / expiry triggers a rebuild of the transaction
//! - device and authorization outcomes always reach the caller unchanged

use solana_sdk::signature::Signature;
use thiserror::Error;

use crate::pda::DerivationError;
use crate::rpc::RpcError;
use crate::schema::SchemaError;
use crate::signer::SignerError;
use crate::tx_builder::TransactionBuilderError;

/// Top-level error for every disbursement and admin operation
#[derive(Error, Debug)]
pub enum DisburseError {
    /// Malformed caller input, rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// No bump in the canonical range produced an off-curve address
    ///
    /// Configuration-level failure: the seeds or program id are wrong.
    #[error("Address derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    /// The schema has no instruction or account with this name
    #[error("Unknown instruction: {0}")]
    UnknownInstruction(String),

    /// Schema load or encode/decode failure other than an unknown name
    #[error("Schema error: {0}")]
    Schema(SchemaError),

    /// The holding-account existence query failed after bounded retries
    #[error("Account query failed for {address}: {reason}")]
    AccountQueryFailed { address: String, reason: String },

    /// The blockhash bound into the transaction is no longer accepted
    #[error("Stale blockhash: {0}")]
    StaleBlockhash(String),

    /// The client-side guard predicts the remote daily limit would be exceeded
    #[error(
        "Daily limit would be exceeded: requested {requested}, remaining {remaining} (limit {limit})"
    )]
    RateLimitWouldExceed {
        requested: u64,
        remaining: u64,
        limit: u64,
    },

    /// The guard still observed a stale window after re-fetching
    #[error("Vault window still stale after refresh (observed day {observed_day}, now {now_day})")]
    GuardWindowStale { observed_day: i64, now_day: i64 },

    /// Local UTC day and the remote reset day disagree in an impossible way
    #[error("Day boundary mismatch: remote window starts on day {remote_day}, local day is {local_day}")]
    DayBoundaryMismatch { remote_day: i64, local_day: i64 },

    /// The remote program or runtime rejected the transaction
    #[error("Remote rejected transaction: {reason}")]
    RemoteRejected {
        reason: String,
        code: Option<u32>,
        signature: Option<Signature>,
    },

    /// Hardware or local signer outcome, surfaced verbatim
    #[error("Device error: {0}")]
    Device(#[from] SignerError),

    /// Rebuild attempts exhausted without a confirmed transaction
    #[error("Broadcast timed out after {attempts} attempt(s)")]
    BroadcastTimeout {
        attempts: u32,
        last_signature: Option<Signature>,
    },

    /// Transaction assembly failure
    #[error(transparent)]
    Builder(#[from] TransactionBuilderError),

    /// RPC failure that is not covered by a more specific variant
    #[error(transparent)]
    Rpc(RpcError),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RpcError> for DisburseError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::BlockhashNotFound { endpoint } => {
                Self::StaleBlockhash(format!("blockhash rejected by {endpoint}"))
            }
            other => Self::Rpc(other),
        }
    }
}

impl From<SchemaError> for DisburseError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::UnknownInstruction(name) | SchemaError::UnknownAccount(name) => {
                Self::UnknownInstruction(name)
            }
            other => Self::Schema(other),
        }
    }
}

impl DisburseError {
    /// Check if retrying the whole operation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AccountQueryFailed { .. } => true,
            Self::StaleBlockhash(_) => true,
            Self::GuardWindowStale { .. } => true,
            Self::Rpc(err) => err.is_retryable(),
            Self::Builder(err) => err.is_retryable(),

            Self::Validation(_) => false,
            Self::Derivation(_) => false,
            Self::UnknownInstruction(_) => false,
            Self::Schema(_) => false,
            Self::RateLimitWouldExceed { .. } => false,
            Self::DayBoundaryMismatch { .. } => false,
            Self::RemoteRejected { .. } => false,
            Self::Device(_) => false,
            Self::BroadcastTimeout { .. } => false,
            Self::Configuration(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Error category for metrics labels and API responses
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Derivation(_) => "derivation",
            Self::UnknownInstruction(_) => "unknown_instruction",
            Self::Schema(_) => "schema",
            Self::AccountQueryFailed { .. } => "account_query",
            Self::StaleBlockhash(_) => "stale_blockhash",
            Self::RateLimitWouldExceed { .. } => "rate_limit",
            Self::GuardWindowStale { .. } => "stale_window",
            Self::DayBoundaryMismatch { .. } => "day_boundary",
            Self::RemoteRejected { .. } => "remote_rejected",
            Self::Device(_) => "device",
            Self::BroadcastTimeout { .. } => "broadcast_timeout",
            Self::Builder(_) => "builder",
            Self::Rpc(_) => "rpc",
            Self::Configuration(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Signature of the last submitted transaction, if one reached the ledger
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::RemoteRejected { signature, .. } => *signature,
            Self::BroadcastTimeout { last_signature, .. } => *last_signature,
            _ => None,
        }
    }
}

// Convenience constructors
impl DisburseError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

pub type DisburseResult<T> = std::result::Result<T, DisburseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::DeviceError;

    #[test]
    fn test_schema_errors_split_unknown_names() {
        let err: DisburseError = SchemaError::UnknownInstruction("withdraw".into()).into();
        assert!(matches!(err, DisburseError::UnknownInstruction(ref n) if n == "withdraw"));

        let err: DisburseError = SchemaError::UnsupportedType {
            field: "memo".into(),
            ty: "string".into(),
        }
        .into();
        assert!(matches!(err, DisburseError::Schema(_)));
    }

    #[test]
    fn test_never_retried_classes() {
        assert!(!DisburseError::validation("bad").is_retryable());
        assert!(!DisburseError::UnknownInstruction("x".into()).is_retryable());
        assert!(!DisburseError::Device(SignerError::Device(DeviceError::UserCancelled))
            .is_retryable());
        assert!(!DisburseError::RateLimitWouldExceed {
            requested: 2,
            remaining: 1,
            limit: 10
        }
        .is_retryable());
    }

    #[test]
    fn test_blockhash_rejection_is_stale_blockhash() {
        let err: DisburseError = RpcError::BlockhashNotFound {
            endpoint: "mock".into(),
        }
        .into();
        assert!(matches!(err, DisburseError::StaleBlockhash(ref m) if m.contains("mock")));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transient_classes() {
        assert!(DisburseError::StaleBlockhash("expired".into()).is_retryable());
        assert!(DisburseError::AccountQueryFailed {
            address: "a".into(),
            reason: "timeout".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(DisburseError::validation("x").category(), "validation");
        assert_eq!(
            DisburseError::BroadcastTimeout {
                attempts: 3,
                last_signature: None
            }
            .category(),
            "broadcast_timeout"
        );
    }
}
