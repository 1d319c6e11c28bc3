//! Configuration module for the vault disburser
//!
//! Loaded from a TOML file, with `.env` support and `DISBURSER_*`
//! environment overrides for the deployment-specific values.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::errors::{DisburseError, DisburseResult};
use crate::rpc::RetryConfig;
use crate::signer::{DerivationPath, DEFAULT_DERIVATION_PATH};

/// Where signing key material comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerSource {
    /// Keypair file on disk
    Local,
    /// External hardware device
    Hardware,
    /// Keypair in an environment variable
    Environment,
}

impl FromStr for SignerSource {
    type Err = DisburseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "hardware" | "ledger" => Ok(Self::Hardware),
            "environment" | "env" => Ok(Self::Environment),
            other => Err(DisburseError::configuration(format!(
                "unknown signer source '{other}' (expected local, hardware or environment)"
            ))),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ledger RPC endpoint
    pub endpoint: String,

    pub program_id: String,

    /// Mint of the disbursed asset
    pub asset_id: String,

    /// Local cap applied on top of the remote daily limit
    #[serde(default)]
    pub daily_limit: Option<u64>,

    pub signer_source: SignerSource,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// IDL document; the built-in layout is used when absent
    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    #[serde(default)]
    pub keypair_path: Option<PathBuf>,

    #[serde(default = "default_keypair_env")]
    pub keypair_env: String,

    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Identity that signs admin transactions
    #[serde(default)]
    pub admin_address: Option<String>,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Append a memo carrying the request id to every disbursement
    #[serde(default = "default_true")]
    pub attach_request_memo: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Frozen addresses compared against derivations at startup
    #[serde(default)]
    pub pinned: PinnedAddresses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// `host:port` of the APDU transport
    #[serde(default = "default_transport_addr")]
    pub transport_addr: String,

    #[serde(default = "default_derivation_path")]
    pub derivation_path: String,

    /// Account the device must report; defaults to `admin_address`
    #[serde(default)]
    pub expected_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// Build-sign-submit rounds before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinnedAddresses {
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub vault_authority: Option<String>,
    #[serde(default)]
    pub vault_ata: Option<String>,
}

// Default value functions
fn default_commitment() -> String { "confirmed".to_string() }
fn default_keypair_env() -> String { "DISBURSER_KEYPAIR".to_string() }
fn default_true() -> bool { true }
fn default_transport_addr() -> String { "127.0.0.1:9999".to_string() }
fn default_derivation_path() -> String { DEFAULT_DERIVATION_PATH.to_string() }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_confirm_timeout_secs() -> u64 { 90 }
fn default_max_attempts() -> u32 { 3 }
fn default_bind() -> String { "0.0.0.0:3001".to_string() }

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            transport_addr: default_transport_addr(),
            derivation_path: default_derivation_path(),
            expected_address: None,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BroadcastConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn parse_pubkey(field: &str, value: &str) -> DisburseResult<Pubkey> {
    Pubkey::from_str(value.trim())
        .map_err(|e| DisburseError::configuration(format!("{field}: invalid address '{value}': {e}")))
}

impl Config {
    /// Parse TOML
    pub fn from_toml(content: &str) -> DisburseResult<Self> {
        toml::from_str(content)
            .map_err(|e| DisburseError::configuration(format!("invalid config: {e}")))
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> DisburseResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DisburseError::configuration(format!("{path}: {e}")))?;
        Self::from_toml(&content)
    }

    /// Load `.env`, the TOML file, then apply environment overrides and validate
    pub fn from_file_with_env(path: &str) -> DisburseResult<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DISBURSER_*` overrides from `lookup`
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> DisburseResult<()> {
        if let Some(v) = lookup("DISBURSER_ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = lookup("DISBURSER_PROGRAM_ID") {
            self.program_id = v;
        }
        if let Some(v) = lookup("DISBURSER_ASSET_ID") {
            self.asset_id = v;
        }
        if let Some(v) = lookup("DISBURSER_DAILY_LIMIT") {
            let limit = v.trim().parse().map_err(|e| {
                DisburseError::configuration(format!("DISBURSER_DAILY_LIMIT '{v}': {e}"))
            })?;
            self.daily_limit = Some(limit);
        }
        if let Some(v) = lookup("DISBURSER_SIGNER_SOURCE") {
            self.signer_source = v.parse()?;
        }
        if let Some(v) = lookup("DISBURSER_BIND") {
            self.server.bind = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> DisburseResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(DisburseError::configuration("endpoint must not be empty"));
        }
        self.program_id()?;
        self.asset_id()?;
        self.commitment()?;

        if self.daily_limit == Some(0) {
            return Err(DisburseError::configuration("daily_limit must be greater than zero"));
        }
        if self.broadcast.max_attempts == 0 {
            return Err(DisburseError::configuration("broadcast.max_attempts must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(DisburseError::configuration("retry.max_attempts must be at least 1"));
        }
        if self.broadcast.poll_interval_ms == 0 {
            return Err(DisburseError::configuration("broadcast.poll_interval_ms must be non-zero"));
        }

        match self.signer_source {
            SignerSource::Local if self.keypair_path.is_none() => {
                return Err(DisburseError::configuration(
                    "signer_source = local requires keypair_path",
                ));
            }
            SignerSource::Hardware => {
                if self.hardware.derivation_path.trim().is_empty() {
                    return Err(DisburseError::configuration(
                        "signer_source = hardware requires hardware.derivation_path",
                    ));
                }
                self.derivation_path()?;
                if self.hardware_expected_address()?.is_none() {
                    return Err(DisburseError::configuration(
                        "signer_source = hardware requires hardware.expected_address or admin_address",
                    ));
                }
            }
            _ => {}
        }

        self.admin_address()?;
        self.pinned()?;
        Ok(())
    }

    pub fn program_id(&self) -> DisburseResult<Pubkey> {
        parse_pubkey("program_id", &self.program_id)
    }

    pub fn asset_id(&self) -> DisburseResult<Pubkey> {
        parse_pubkey("asset_id", &self.asset_id)
    }

    pub fn admin_address(&self) -> DisburseResult<Option<Pubkey>> {
        self.admin_address
            .as_deref()
            .map(|v| parse_pubkey("admin_address", v))
            .transpose()
    }

    /// Identity the hardware device must report
    pub fn hardware_expected_address(&self) -> DisburseResult<Option<Pubkey>> {
        match self.hardware.expected_address.as_deref() {
            Some(v) => parse_pubkey("hardware.expected_address", v).map(Some),
            None => self.admin_address(),
        }
    }

    pub fn derivation_path(&self) -> DisburseResult<DerivationPath> {
        self.hardware
            .derivation_path
            .parse()
            .map_err(|e: crate::signer::SignerError| DisburseError::configuration(e.to_string()))
    }

    pub fn commitment(&self) -> DisburseResult<CommitmentConfig> {
        CommitmentConfig::from_str(&self.commitment).map_err(|_| {
            DisburseError::configuration(format!("unknown commitment '{}'", self.commitment))
        })
    }

    /// Parsed pins: (config, vault_authority, vault_ata)
    pub fn pinned(&self) -> DisburseResult<(Option<Pubkey>, Option<Pubkey>, Option<Pubkey>)> {
        let parse = |field: &str, v: &Option<String>| {
            v.as_deref().map(|s| parse_pubkey(field, s)).transpose()
        };
        Ok((
            parse("pinned.config", &self.pinned.config)?,
            parse("pinned.vault_authority", &self.pinned.vault_authority)?,
            parse("pinned.vault_ata", &self.pinned.vault_ata)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
        endpoint = "https://api.devnet.solana.com"
        program_id = "2zHmxdM1weXuEkL7q7R9romZsPNdTLPAHGEPjBFA4da5"
        asset_id = "C2dp9NjivNUNpSkrFUejnSsNS6ydgMmDdo5oMmuSev9A"
        signer_source = "environment"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.signer_source, SignerSource::Environment);
        assert_eq!(config.keypair_env, "DISBURSER_KEYPAIR");
        assert_eq!(config.broadcast.max_attempts, 3);
        assert_eq!(config.broadcast.confirm_timeout(), Duration::from_secs(90));
        assert!(config.attach_request_memo);
        assert_eq!(config.commitment().unwrap(), CommitmentConfig::confirmed());
        assert_eq!(config.derivation_path().unwrap(), DerivationPath::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("DISBURSER_DAILY_LIMIT", "500"),
            ("DISBURSER_SIGNER_SOURCE", "ledger"),
            ("DISBURSER_BIND", "127.0.0.1:0"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.daily_limit, Some(500));
        assert_eq!(config.signer_source, SignerSource::Hardware);
        assert_eq!(config.server.bind, "127.0.0.1:0");

        let err = config
            .apply_env_overrides(|k| (k == "DISBURSER_DAILY_LIMIT").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.daily_limit = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.asset_id = "nope".into();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.signer_source = SignerSource::Local;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.signer_source = SignerSource::Hardware;
        assert!(config.validate().is_err(), "hardware without an expected identity");
        config.admin_address = Some("AJKxLwTAfbDGKBrz2YPRWEJVYTHG56bq1DfUj1BgE1dk".into());
        config.validate().unwrap();
        config.hardware.derivation_path = "44'/x".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_full() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{MINIMAL}
            daily_limit = 10000000000000
            attach_request_memo = false

            [broadcast]
            max_attempts = 5

            [retry]
            max_attempts = 4

            [pinned]
            config = "J1YymXsBcc5fMstuzqKrzcVMW8RwcuZs7hVkwdV6ARb3"
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.daily_limit, Some(10_000_000_000_000));
        assert!(!config.attach_request_memo);
        assert_eq!(config.broadcast.max_attempts, 5);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_backoff_ms, 100);
        assert!(config.pinned().unwrap().0.is_some());
    }
}
