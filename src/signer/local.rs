//! In-process key material

use std::path::Path;

use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use zeroize::Zeroizing;

use super::errors::SignerError;

/// Signer holding a keypair in process memory
pub struct LocalSigner {
    keypair: Keypair,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("pubkey", &self.keypair.pubkey())
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// 64 raw secret bytes (secret key followed by public key)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        if bytes.len() != 64 {
            return Err(SignerError::key(format!(
                "Invalid keypair length: expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        // Reject all-zero keys
        if bytes.iter().all(|&b| b == 0) {
            return Err(SignerError::key("Invalid keypair: all-zero key rejected"));
        }
        Keypair::try_from(bytes)
            .map(Self::new)
            .map_err(|e| SignerError::key(format!("Invalid keypair bytes: {e}")))
    }

    /// Keypair file: a JSON byte array, or 64 raw bytes
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SignerError> {
        let path = path.as_ref();
        let raw = Zeroizing::new(std::fs::read(path).map_err(|e| {
            SignerError::key(format!("Failed to read keypair file {}: {e}", path.display()))
        })?);

        if raw.len() == 64 {
            return Self::from_bytes(&raw);
        }
        let text = std::str::from_utf8(&raw).map_err(|_| {
            SignerError::key(format!("Keypair file {} is not UTF-8", path.display()))
        })?;
        Self::from_encoded(text)
    }

    /// Key material from an environment variable (JSON byte array or base58)
    pub fn from_env(var: &str) -> Result<Self, SignerError> {
        let value = Zeroizing::new(
            std::env::var(var)
                .map_err(|_| SignerError::key(format!("Environment variable {var} is not set")))?,
        );
        Self::from_encoded(&value)
    }

    fn from_encoded(text: &str) -> Result<Self, SignerError> {
        let text = text.trim();
        let bytes: Zeroizing<Vec<u8>> = if text.starts_with('[') {
            Zeroizing::new(
                serde_json::from_str(text)
                    .map_err(|e| SignerError::key(format!("Failed to parse keypair JSON: {e}")))?,
            )
        } else {
            Zeroizing::new(
                bs58::decode(text)
                    .into_vec()
                    .map_err(|e| SignerError::key(format!("Failed to decode base58 keypair: {e}")))?,
            )
        };
        Self::from_bytes(&bytes)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Synchronous; fails only on a key error
    pub fn sign(&self, message: &[u8]) -> Result<Signature, SignerError> {
        self.keypair
            .try_sign_message(message)
            .map_err(|e| SignerError::key(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_json_file() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let signer = LocalSigner::from_file(file.path()).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_from_raw_file() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&keypair.to_bytes()).unwrap();

        let signer = LocalSigner::from_file(file.path()).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_non_utf8_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut bytes = vec![0xffu8; 40];
        bytes[0] = b'[';
        file.write_all(&bytes).unwrap();

        let err = LocalSigner::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("not UTF-8"));
    }

    #[test]
    fn test_rejects_zero_and_short_keys() {
        assert!(matches!(
            LocalSigner::from_bytes(&[0u8; 64]),
            Err(SignerError::Key(_))
        ));
        assert!(matches!(
            LocalSigner::from_bytes(&[1u8; 32]),
            Err(SignerError::Key(_))
        ));
        assert!(matches!(
            LocalSigner::from_file("/nonexistent/id.json"),
            Err(SignerError::Key(_))
        ));
    }

    #[test]
    fn test_from_env_base58() {
        let keypair = Keypair::new();
        let var = "VAULT_DISBURSER_TEST_KEYPAIR_B58";
        std::env::set_var(var, keypair.to_base58_string());
        let signer = LocalSigner::from_env(var).unwrap();
        std::env::remove_var(var);
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_signature_verifies() {
        let signer = LocalSigner::new(Keypair::new());
        let signature = signer.sign(b"message").unwrap();
        assert!(signature.verify(signer.pubkey().as_ref(), b"message"));
    }
}
