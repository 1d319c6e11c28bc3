use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Outcomes of a hardware signing device that a human must act on
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The user rejected the request on the device
    #[error("user cancelled the request on the device")]
    UserCancelled,

    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// The device holds a different account than the one expected
    #[error("device address mismatch: expected {expected}, device reports {actual}")]
    AddressMismatch { expected: Pubkey, actual: Pubkey },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Key material could not be read or decoded
    #[error("key error: {0}")]
    Key(String),

    /// The device answered with something other than a valid response
    #[error("device protocol error: {0}")]
    Protocol(String),

    /// The message needs a signature this signer cannot produce
    #[error("transaction requires signer {required}, coordinator holds {held}")]
    UnexpectedSigner { required: Pubkey, held: Pubkey },

    #[error("signer configuration error: {0}")]
    Configuration(String),
}

impl SignerError {
    /// Signing outcomes are never retried automatically
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn category(&self) -> &'static str {
        match self {
            SignerError::Device(DeviceError::UserCancelled) => "user_cancelled",
            SignerError::Device(DeviceError::Disconnected(_)) => "device_disconnected",
            SignerError::Device(DeviceError::AddressMismatch { .. }) => "address_mismatch",
            SignerError::Key(_) => "key",
            SignerError::Protocol(_) => "device_protocol",
            SignerError::UnexpectedSigner { .. } => "unexpected_signer",
            SignerError::Configuration(_) => "config",
        }
    }

    pub fn key(reason: impl Into<String>) -> Self {
        SignerError::Key(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        SignerError::Protocol(reason.into())
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        SignerError::Device(DeviceError::Disconnected(reason.into()))
    }
}
