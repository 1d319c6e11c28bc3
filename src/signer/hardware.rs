//! Hardware signing device interface

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

use super::errors::{DeviceError, SignerError};

const HARDENED: u32 = 0x8000_0000;

/// Default account path for the ledger's coin type
pub const DEFAULT_DERIVATION_PATH: &str = "44'/501'/0'";

/// BIP-32 path such as `44'/501'/0'/0'`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn indexes(&self) -> &[u32] {
        &self.0
    }

    /// Device encoding: component count, then each index as big-endian u32
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.0.len() * 4);
        out.push(self.0.len() as u8);
        for index in &self.0 {
            out.extend_from_slice(&index.to_be_bytes());
        }
        out
    }
}

impl Default for DerivationPath {
    fn default() -> Self {
        Self(vec![44 | HARDENED, 501 | HARDENED, HARDENED])
    }
}

impl FromStr for DerivationPath {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches("m/");
        if trimmed.is_empty() {
            return Err(SignerError::Configuration("empty derivation path".into()));
        }

        let indexes = trimmed
            .split('/')
            .map(|part| {
                let stripped = part.strip_suffix('\'').or_else(|| part.strip_suffix('h'));
                let (digits, hardened) = match stripped {
                    Some(d) => (d, true),
                    None => (part, false),
                };
                let index: u32 = digits.parse().map_err(|_| {
                    SignerError::Configuration(format!("invalid derivation path component '{part}'"))
                })?;
                if index >= HARDENED {
                    return Err(SignerError::Configuration(format!(
                        "derivation path component '{part}' out of range"
                    )));
                }
                Ok(if hardened { index | HARDENED } else { index })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if indexes.len() > 10 {
            return Err(SignerError::Configuration(format!(
                "derivation path has {} components (max 10)",
                indexes.len()
            )));
        }
        Ok(Self(indexes))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            if index & HARDENED != 0 {
                write!(f, "{}'", index & !HARDENED)?;
            } else {
                write!(f, "{index}")?;
            }
        }
        Ok(())
    }
}

/// An external signing device
///
/// `sign_message` may wait indefinitely for a physical confirmation.
#[async_trait]
pub trait HardwareWallet: Send + Sync {
    async fn get_address(&self, path: &DerivationPath) -> Result<Pubkey, SignerError>;

    async fn sign_message(
        &self,
        path: &DerivationPath,
        message: &[u8],
    ) -> Result<Signature, SignerError>;

    async fn disconnect(&self) -> Result<(), SignerError>;
}

/// Device plus the account it is expected to hold
pub struct HardwareSigner {
    device: Arc<dyn HardwareWallet>,
    path: DerivationPath,
    expected: Pubkey,
}

impl HardwareSigner {
    pub fn new(device: Arc<dyn HardwareWallet>, path: DerivationPath, expected: Pubkey) -> Self {
        Self {
            device,
            path,
            expected,
        }
    }

    pub fn expected(&self) -> Pubkey {
        self.expected
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    /// Ask the device for its address and compare with the expected identity
    pub async fn verify_identity(&self) -> Result<Pubkey, SignerError> {
        let actual = self.device.get_address(&self.path).await?;
        if actual != self.expected {
            return Err(DeviceError::AddressMismatch {
                expected: self.expected,
                actual,
            }
            .into());
        }
        Ok(actual)
    }

    /// Identity check, then the signing request; the device is never asked
    /// to sign when the identity check fails
    pub async fn sign(&self, message: &[u8]) -> Result<Signature, SignerError> {
        self.verify_identity().await?;
        let signature = self.device.sign_message(&self.path, message).await?;
        if !signature.verify(self.expected.as_ref(), message) {
            return Err(SignerError::protocol(
                "device returned a signature that does not verify",
            ));
        }
        Ok(signature)
    }

    pub async fn disconnect(&self) -> Result<(), SignerError> {
        self.device.disconnect().await
    }
}
