//! Vault Disburser - token disbursements from a program-controlled vault
//!
//! A service identity (the bot authority) requests transfers out of a vault
//! owned by an on-chain program. Every request runs the same pipeline:
//! validate, check the remote daily limit, make sure the recipient holding
//! account exists, encode the instructions from the program schema, then
//! assemble, sign and broadcast until the transaction lands or fails.
//!
//! Admin flows (vault init, bot-authority rotation) reuse the same pipeline
//! with a hardware-held admin key.

pub mod admin;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod guard;
pub mod instructions;
pub mod metrics;
pub mod observability;
pub mod pda;
pub mod provisioner;
pub mod rpc;
pub mod schema;
pub mod service;
pub mod signer;
pub mod tx_builder;
pub mod types;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

// Re-export commonly used types
pub use admin::AdminClient;
pub use config::Config;
pub use errors::{DisburseError, DisburseResult};
pub use pda::VaultAddresses;
pub use schema::InstructionSchema;
pub use service::{DisbursementService, ServiceContext, ServiceOptions};
pub use signer::SigningCoordinator;
pub use types::{DisbursementReceipt, DisbursementRequest};

pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
