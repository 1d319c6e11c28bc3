//! Admin flows
//!
//! Vault initialization and bot-authority rotation. Both are paid and signed
//! by the admin identity, usually held on a hardware device, and go through
//! the same assemble/sign/broadcast loop as disbursements.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::info;

use crate::broadcast::{BroadcastClient, Executed};
use crate::errors::{DisburseError, DisburseResult};
use crate::instructions;
use crate::schema::idl::{INITIALIZE, SET_BOT_AUTHORITY};
use crate::service::{ServiceContext, ServiceOptions};
use crate::tx_builder::{InstructionPlan, TransactionAssembler};

pub struct AdminClient {
    ctx: Arc<ServiceContext>,
    assembler: TransactionAssembler,
    broadcast: BroadcastClient,
}

impl AdminClient {
    pub fn new(ctx: Arc<ServiceContext>, options: &ServiceOptions) -> Self {
        Self {
            assembler: TransactionAssembler::new(ctx.rpc.clone()),
            broadcast: BroadcastClient::new(ctx.rpc.clone())
                .with_poll_interval(options.poll_interval)
                .with_confirm_timeout(options.confirm_timeout)
                .with_max_attempts(options.max_attempts),
            ctx,
        }
    }

    fn admin(&self) -> Pubkey {
        self.ctx.coordinator.pubkey()
    }

    async fn run(&self, name: &str, plan: InstructionPlan) -> DisburseResult<Executed> {
        let admin = self.admin();
        // Fail before building anything if the device holds another account
        self.ctx.coordinator.verify_identity().await?;
        let executed = self
            .broadcast
            .execute(&plan, &admin, &self.assembler, &self.ctx.coordinator, &self.ctx.schema)
            .await?;
        info!(
            instruction = name,
            signature = %executed.signature,
            slot = executed.slot,
            "Admin transaction confirmed"
        );
        Ok(executed)
    }

    /// Create the vault config and vault holding account
    pub async fn init_vault(&self) -> DisburseResult<Executed> {
        let addresses = &self.ctx.addresses;
        if self.ctx.rpc.get_account_info(&addresses.config).await?.is_some() {
            return Err(DisburseError::configuration(format!(
                "vault config {} already exists",
                addresses.config
            )));
        }
        let ix = instructions::initialize(&self.ctx.schema, addresses, &self.admin())?;
        self.run(INITIALIZE, InstructionPlan::single(INITIALIZE, ix))
            .await
    }

    /// Rotate the bot authority and set the remote daily limit
    pub async fn set_bot_authority(
        &self,
        bot_authority: &Pubkey,
        daily_limit: u64,
    ) -> DisburseResult<Executed> {
        if daily_limit == 0 {
            return Err(DisburseError::validation("daily limit must be greater than zero"));
        }
        let ix = instructions::set_bot_authority(
            &self.ctx.schema,
            &self.ctx.addresses,
            &self.admin(),
            bot_authority,
            daily_limit,
        )?;
        self.run(SET_BOT_AUTHORITY, InstructionPlan::single(SET_BOT_AUTHORITY, ix))
            .await
    }
}
