//! Disbursement service
//!
//! [`ServiceContext`] holds everything acquired at startup (RPC client,
//! schema, derived addresses, signer) and releases the device transport on
//! shutdown. [`DisbursementService`] runs one pipeline per request:
//!
//! 1. validate the request
//! 2. guard: fresh VaultConfig snapshot, advisory limit check
//! 3. provision: does the recipient holding account exist?
//! 4. plan: create (if needed) -> disburse -> memo
//! 5. execute: assemble, sign, submit, confirm, rebuild on expiry
//!
//! Pipelines share no mutable state; concurrent requests progress
//! independently.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use tracing::{info, instrument, warn};

use crate::broadcast::BroadcastClient;
use crate::config::{BroadcastConfig, Config, SignerSource};
use crate::errors::{DisburseError, DisburseResult};
use crate::guard::{AuthorizationGuard, DayClock, LedgerSnapshotSource, UtcClock};
use crate::metrics::{metrics, Timer};
use crate::pda::VaultAddresses;
use crate::provisioner::AccountProvisioner;
use crate::rpc::{LedgerRpc, SolanaLedgerRpc};
use crate::schema::InstructionSchema;
use crate::signer::{HardwareSigner, LedgerDevice, LocalSigner, SigningCoordinator};
use crate::tx_builder::{plan_disbursement, DisbursementPlanInput, TransactionAssembler};
use crate::types::{DisbursementReceipt, DisbursementRequest};

/// Startup-acquired resources shared by every request
pub struct ServiceContext {
    pub rpc: Arc<dyn LedgerRpc>,
    pub schema: Arc<InstructionSchema>,
    pub addresses: VaultAddresses,
    pub coordinator: Arc<SigningCoordinator>,
}

impl ServiceContext {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        schema: Arc<InstructionSchema>,
        addresses: VaultAddresses,
        coordinator: Arc<SigningCoordinator>,
    ) -> Self {
        Self {
            rpc,
            schema,
            addresses,
            coordinator,
        }
    }

    /// Build the context from configuration and verify the signer identity
    pub async fn connect(config: &Config) -> DisburseResult<Self> {
        let rpc: Arc<dyn LedgerRpc> = Arc::new(SolanaLedgerRpc::new(
            &config.endpoint,
            config.commitment()?,
            config.retry.clone(),
        ));
        let schema = Arc::new(load_schema(config)?);
        let addresses = VaultAddresses::derive(&config.program_id()?, &config.asset_id()?)?;
        check_pins(config, &addresses)?;

        let coordinator = Arc::new(build_coordinator(config).await?);
        let signer = coordinator.verify_identity().await?;

        info!(
            endpoint = rpc.endpoint(),
            program_id = %addresses.program_id,
            asset = %addresses.asset,
            config = %addresses.config,
            vault_ata = %addresses.vault_ata,
            signer = %signer,
            source = coordinator.source_label(),
            "Service context ready"
        );
        Ok(Self::new(rpc, schema, addresses, coordinator))
    }

    pub fn signer(&self) -> Pubkey {
        self.coordinator.pubkey()
    }

    /// Release the hardware transport, if any
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
        info!("Service context shut down");
    }
}

pub fn load_schema(config: &Config) -> DisburseResult<InstructionSchema> {
    match &config.schema_path {
        Some(path) => {
            let schema = InstructionSchema::from_file(path)?;
            info!(
                path = %path.display(),
                version = schema.version.as_deref().unwrap_or("unknown"),
                "Loaded instruction schema"
            );
            Ok(schema)
        }
        None => Ok(InstructionSchema::builtin()),
    }
}

/// Compare optional pinned addresses with the derived ones; derived wins
fn check_pins(config: &Config, addresses: &VaultAddresses) -> DisburseResult<()> {
    let (config_pin, authority_pin, ata_pin) = config.pinned()?;
    for (label, pinned, derived) in [
        ("config", config_pin, addresses.config),
        ("vault_authority", authority_pin, addresses.vault_authority),
        ("vault_ata", ata_pin, addresses.vault_ata),
    ] {
        if let Some(pinned) = pinned {
            if pinned != derived {
                warn!(
                    account = label,
                    %pinned,
                    %derived,
                    "Pinned address differs from derivation, using derived address"
                );
            }
        }
    }
    Ok(())
}

/// Signing coordinator selected by `signer_source`
pub async fn build_coordinator(config: &Config) -> DisburseResult<SigningCoordinator> {
    match config.signer_source {
        SignerSource::Local => {
            let path = config
                .keypair_path
                .as_ref()
                .ok_or_else(|| DisburseError::configuration("keypair_path is not set"))?;
            Ok(SigningCoordinator::local(LocalSigner::from_file(path)?))
        }
        SignerSource::Environment => Ok(SigningCoordinator::local(LocalSigner::from_env(
            &config.keypair_env,
        )?)),
        SignerSource::Hardware => {
            let expected = config.hardware_expected_address()?.ok_or_else(|| {
                DisburseError::configuration("hardware signer needs an expected address")
            })?;
            let device = LedgerDevice::connect(&config.hardware.transport_addr).await?;
            Ok(SigningCoordinator::hardware(HardwareSigner::new(
                Arc::new(device),
                config.derivation_path()?,
                expected,
            )))
        }
    }
}

/// Per-service options
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub attach_request_memo: bool,
    /// Local cap on top of the remote daily limit
    pub local_cap: Option<u64>,
    pub poll_interval: Duration,
    pub confirm_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        let broadcast = BroadcastConfig::default();
        Self {
            attach_request_memo: true,
            local_cap: None,
            poll_interval: broadcast.poll_interval(),
            confirm_timeout: broadcast.confirm_timeout(),
            max_attempts: broadcast.max_attempts,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attach_request_memo: config.attach_request_memo,
            local_cap: config.daily_limit,
            poll_interval: config.broadcast.poll_interval(),
            confirm_timeout: config.broadcast.confirm_timeout(),
            max_attempts: config.broadcast.max_attempts,
        }
    }
}

pub struct DisbursementService {
    ctx: Arc<ServiceContext>,
    guard: AuthorizationGuard,
    provisioner: AccountProvisioner,
    assembler: TransactionAssembler,
    broadcast: BroadcastClient,
    attach_request_memo: bool,
}

impl DisbursementService {
    pub fn new(ctx: Arc<ServiceContext>, options: ServiceOptions) -> Self {
        Self::with_clock(ctx, options, Arc::new(UtcClock))
    }

    pub fn with_clock(
        ctx: Arc<ServiceContext>,
        options: ServiceOptions,
        clock: Arc<dyn DayClock>,
    ) -> Self {
        let source = Arc::new(LedgerSnapshotSource::new(
            ctx.rpc.clone(),
            ctx.schema.clone(),
            &ctx.addresses,
        ));
        Self {
            guard: AuthorizationGuard::new(source, clock, options.local_cap),
            provisioner: AccountProvisioner::new(ctx.rpc.clone()),
            assembler: TransactionAssembler::new(ctx.rpc.clone()),
            broadcast: BroadcastClient::new(ctx.rpc.clone())
                .with_poll_interval(options.poll_interval)
                .with_confirm_timeout(options.confirm_timeout)
                .with_max_attempts(options.max_attempts),
            attach_request_memo: options.attach_request_memo,
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    /// Run one disbursement to a terminal outcome
    #[instrument(skip_all, fields(request_id = %request.request_id, amount = request.amount))]
    pub async fn disburse(
        &self,
        request: &DisbursementRequest,
    ) -> DisburseResult<DisbursementReceipt> {
        let timer = Timer::new();
        let m = metrics();
        m.disbursements_total.inc();

        let result = self.run(request).await;
        match &result {
            Ok(receipt) => {
                m.disbursements_success.inc();
                if receipt.holding_account_created {
                    m.holding_accounts_created.inc();
                }
                timer.observe_duration(&m.disbursement_latency);
                info!(
                    signature = %receipt.signature,
                    recipient_account = %receipt.recipient_account,
                    created = receipt.holding_account_created,
                    attempts = receipt.attempts,
                    slot = receipt.slot,
                    "Disbursement confirmed"
                );
            }
            Err(e) => {
                m.disbursements_failed.inc();
                m.record_error(e.category());
                if matches!(e, DisburseError::RateLimitWouldExceed { .. }) {
                    m.guard_rejections.inc();
                }
                warn!(error = %e, category = e.category(), "Disbursement failed");
            }
        }
        result
    }

    async fn run(&self, request: &DisbursementRequest) -> DisburseResult<DisbursementReceipt> {
        let validated = request.validate()?;
        let ctx = &self.ctx;

        let snapshot = self.guard.authorize(validated.amount).await?;
        let bot = ctx.coordinator.pubkey();
        if snapshot.bot_authority != bot {
            return Err(DisburseError::configuration(format!(
                "signer {bot} is not the vault's bot authority {}",
                snapshot.bot_authority
            )));
        }

        let provisioned = self
            .provisioner
            .ensure(&validated.recipient, &ctx.addresses.asset)
            .await?;

        let input = DisbursementPlanInput {
            bot,
            recipient_owner: validated.recipient,
            recipient_account: provisioned.address,
            create_recipient_account: provisioned.creation_needed,
            amount: validated.amount,
            memo: self
                .attach_request_memo
                .then_some(validated.request_id.as_str()),
        };
        let plan = plan_disbursement(&ctx.schema, &ctx.addresses, &input)?;

        let executed = self
            .broadcast
            .execute(&plan, &bot, &self.assembler, &ctx.coordinator, &ctx.schema)
            .await?;

        Ok(DisbursementReceipt {
            request_id: validated.request_id,
            signature: executed.signature,
            recipient_account: provisioned.address,
            holding_account_created: provisioned.creation_needed,
            attempts: executed.attempts,
            slot: executed.slot,
        })
    }
}
