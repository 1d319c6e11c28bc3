//! Signing coordination
//!
//! A transaction is signed either by a key held in process memory or by an
//! external hardware device. Hardware signing always checks the device's
//! reported address against the expected identity first; a mismatch aborts
//! before any signing request reaches the device.

pub mod errors;
pub mod hardware;
pub mod ledger;
pub mod local;

pub use errors::{DeviceError, SignerError};
pub use hardware::{DerivationPath, HardwareSigner, HardwareWallet, DEFAULT_DERIVATION_PATH};
pub use ledger::{ApduTransport, LedgerDevice, TcpApduTransport};
pub use local::LocalSigner;

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::{debug, info, warn};

use crate::tx_builder::AssembledTransaction;

/// The signing capability
pub enum TxSigner {
    Local(LocalSigner),
    Hardware(HardwareSigner),
}

/// Obtains the single signature a vault transaction needs
pub struct SigningCoordinator {
    signer: TxSigner,
}

impl SigningCoordinator {
    pub fn new(signer: TxSigner) -> Self {
        Self { signer }
    }

    pub fn local(signer: LocalSigner) -> Self {
        Self::new(TxSigner::Local(signer))
    }

    pub fn hardware(signer: HardwareSigner) -> Self {
        Self::new(TxSigner::Hardware(signer))
    }

    /// Identity this coordinator signs as
    pub fn pubkey(&self) -> Pubkey {
        match &self.signer {
            TxSigner::Local(local) => local.pubkey(),
            TxSigner::Hardware(hw) => hw.expected(),
        }
    }

    pub fn source_label(&self) -> &'static str {
        match &self.signer {
            TxSigner::Local(_) => "local",
            TxSigner::Hardware(_) => "hardware",
        }
    }

    /// Startup check; a no-op for in-process keys
    pub async fn verify_identity(&self) -> Result<Pubkey, SignerError> {
        match &self.signer {
            TxSigner::Local(local) => Ok(local.pubkey()),
            TxSigner::Hardware(hw) => {
                let address = hw.verify_identity().await?;
                info!(address = %address, path = %hw.path(), "Hardware signer identity verified");
                Ok(address)
            }
        }
    }

    /// Sign the message of `tx` and place the signature in its slot
    ///
    /// The message must require exactly this coordinator's identity.
    pub async fn sign_transaction(
        &self,
        tx: &mut AssembledTransaction,
    ) -> Result<Signature, SignerError> {
        let held = self.pubkey();
        if let Some(required) = tx.required_signers().iter().find(|key| **key != held) {
            return Err(SignerError::UnexpectedSigner {
                required: *required,
                held,
            });
        }

        let message = tx.message_bytes();
        let signature = match &self.signer {
            TxSigner::Local(local) => local.sign(&message)?,
            TxSigner::Hardware(hw) => {
                debug!(bytes = message.len(), "Awaiting hardware confirmation");
                hw.sign(&message).await?
            }
        };

        tx.add_signature(&held, signature)
            .map_err(|e| SignerError::protocol(e.to_string()))?;
        Ok(signature)
    }

    /// Release the device transport, if any
    pub async fn shutdown(&self) {
        if let TxSigner::Hardware(hw) = &self.signer {
            if let Err(e) = hw.disconnect().await {
                warn!(error = %e, "Hardware signer disconnect failed");
            }
        }
    }
}
