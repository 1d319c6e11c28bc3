//! Common types used throughout the pipeline

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};

use crate::errors::{DisburseError, DisburseResult};
use crate::schema::{codec, InstructionSchema, SchemaError};

/// Longest request id carried in the memo
pub const MAX_REQUEST_ID_LEN: usize = 64;

const SECONDS_PER_DAY: i64 = 86_400;

/// Inbound disbursement request, as received on the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisbursementRequest {
    pub recipient_address: String,
    /// Smallest asset unit
    pub amount: u64,
    pub request_id: String,
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub recipient: Pubkey,
    pub amount: u64,
    pub request_id: String,
}

impl DisbursementRequest {
    pub fn new(recipient: &Pubkey, amount: u64, request_id: impl Into<String>) -> Self {
        Self {
            recipient_address: recipient.to_string(),
            amount,
            request_id: request_id.into(),
        }
    }

    /// Reject malformed input before any network call
    pub fn validate(&self) -> DisburseResult<ValidatedRequest> {
        if self.amount == 0 {
            return Err(DisburseError::validation("amount must be greater than zero"));
        }

        let request_id = self.request_id.trim();
        if request_id.is_empty() {
            return Err(DisburseError::validation("requestId is required"));
        }
        if request_id.len() > MAX_REQUEST_ID_LEN {
            return Err(DisburseError::validation(format!(
                "requestId longer than {MAX_REQUEST_ID_LEN} characters"
            )));
        }
        if !request_id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(DisburseError::validation(
                "requestId must be printable ASCII without spaces",
            ));
        }

        let recipient = Pubkey::from_str(self.recipient_address.trim()).map_err(|e| {
            DisburseError::validation(format!(
                "invalid recipientAddress '{}': {e}",
                self.recipient_address
            ))
        })?;

        Ok(ValidatedRequest {
            recipient,
            amount: self.amount,
            request_id: request_id.to_string(),
        })
    }
}

/// Terminal success of one disbursement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisbursementReceipt {
    pub request_id: String,
    pub signature: Signature,
    pub recipient_account: Pubkey,
    pub holding_account_created: bool,
    /// Build-sign-submit attempts used
    pub attempts: u32,
    pub slot: u64,
}

/// Observed state of the remote VaultConfig account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfigAccount {
    pub admin: Option<Pubkey>,
    pub bot_authority: Pubkey,
    pub daily_limit: u64,
    pub daily_disbursed: u64,
    /// UTC day number of the last remote reset
    pub last_reset_day: i64,
}

impl VaultConfigAccount {
    /// Decode account data with the schema's `VaultConfig` layout
    ///
    /// The reset marker is read from `last_reset_day` (day number) or, for
    /// layouts that store a timestamp, `last_reset_ts` / `last_reset`
    /// (unix seconds).
    pub fn decode(schema: &InstructionSchema, data: &[u8]) -> Result<Self, SchemaError> {
        let layout = schema.account(crate::schema::idl::VAULT_CONFIG)?;
        let fields = codec::decode_account(layout, data)?;

        let missing = |field: &str| SchemaError::FieldMismatch {
            name: layout.name.clone(),
            reason: format!("missing or mistyped field '{field}'"),
        };

        let bot_authority = fields
            .get("bot_authority")
            .and_then(|v| v.as_pubkey())
            .ok_or_else(|| missing("bot_authority"))?;
        let daily_limit = fields
            .get("daily_limit")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| missing("daily_limit"))?;
        let daily_disbursed = fields
            .get("daily_disbursed")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| missing("daily_disbursed"))?;

        let last_reset_day = match fields.get("last_reset_day").and_then(|v| v.as_i64()) {
            Some(day) => day,
            None => fields
                .get("last_reset_ts")
                .or_else(|| fields.get("last_reset"))
                .and_then(|v| v.as_i64())
                .map(|ts| ts.div_euclid(SECONDS_PER_DAY))
                .ok_or_else(|| missing("last_reset_day"))?,
        };

        Ok(Self {
            admin: fields.get("admin").and_then(|v| v.as_pubkey()),
            bot_authority,
            daily_limit,
            daily_disbursed,
            last_reset_day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AccountLayout, FieldSpec, FieldType, FieldValue};

    fn request(recipient: &str, amount: u64, id: &str) -> DisbursementRequest {
        DisbursementRequest {
            recipient_address: recipient.to_string(),
            amount,
            request_id: id.to_string(),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let recipient = Pubkey::new_unique();
        let validated = request(&recipient.to_string(), 5, "req-1").validate().unwrap();
        assert_eq!(validated.recipient, recipient);
        assert_eq!(validated.request_id, "req-1");
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let recipient = Pubkey::new_unique().to_string();
        for bad in [
            request(&recipient, 0, "a"),
            request(&recipient, 1, ""),
            request(&recipient, 1, "has space"),
            request(&recipient, 1, &"x".repeat(65)),
            request("not-an-address", 1, "a"),
        ] {
            assert!(matches!(bad.validate(), Err(DisburseError::Validation(_))));
        }
    }

    #[test]
    fn test_request_json_is_camel_case() {
        let json = r#"{"recipientAddress":"11111111111111111111111111111111","amount":7,"requestId":"r"}"#;
        let parsed: DisbursementRequest = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.amount, 7);
        assert_eq!(parsed.request_id, "r");
    }

    #[test]
    fn test_decode_builtin_vault_config() {
        let schema = InstructionSchema::builtin();
        let layout = schema.account("VaultConfig").unwrap();
        let admin = Pubkey::new_unique();
        let bot = Pubkey::new_unique();
        let data = codec::encode_account(
            layout,
            &[
                FieldValue::Pubkey(admin),
                FieldValue::Pubkey(bot),
                FieldValue::Pubkey(Pubkey::new_unique()),
                FieldValue::U8(254),
                FieldValue::U64(1_000),
                FieldValue::U64(250),
                FieldValue::I64(20_000),
            ],
        )
        .unwrap();

        let config = VaultConfigAccount::decode(&schema, &data).unwrap();
        assert_eq!(config.admin, Some(admin));
        assert_eq!(config.bot_authority, bot);
        assert_eq!(config.daily_limit, 1_000);
        assert_eq!(config.daily_disbursed, 250);
        assert_eq!(config.last_reset_day, 20_000);
    }

    #[test]
    fn test_decode_timestamp_reset_marker() {
        let layout = AccountLayout {
            name: "VaultConfig".into(),
            discriminator: crate::schema::account_discriminator("VaultConfig"),
            fields: vec![
                FieldSpec::new("bot_authority", FieldType::Pubkey),
                FieldSpec::new("daily_limit", FieldType::U64),
                FieldSpec::new("daily_disbursed", FieldType::U64),
                FieldSpec::new("last_reset_ts", FieldType::I64),
            ],
        };
        let schema =
            InstructionSchema::new(None, None, vec![], vec![layout.clone()], vec![]).unwrap();
        let data = codec::encode_account(
            &layout,
            &[
                FieldValue::Pubkey(Pubkey::new_unique()),
                FieldValue::U64(10),
                FieldValue::U64(0),
                FieldValue::I64(2 * SECONDS_PER_DAY + 3_600),
            ],
        )
        .unwrap();

        let config = VaultConfigAccount::decode(&schema, &data).unwrap();
        assert_eq!(config.last_reset_day, 2);
        assert_eq!(config.admin, None);
    }
}
