//! Vault Disburser
//!
//! Entry point for the disbursement service and its admin commands.
//!
//! - `serve`: HTTP API (`POST /disburse`, `GET /health`, `GET /metrics`)
//! - `derive`: print every derived vault address as JSON
//! - `init-vault`: create the vault config and holding account (admin)
//! - `set-bot-authority`: rotate the bot identity and remote daily limit (admin)

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use vault_disburser::config::SignerSource;
use vault_disburser::observability::init_logging;
use vault_disburser::{
    api, AdminClient, Config, DisbursementService, Pubkey, ServiceContext, ServiceOptions,
    VaultAddresses,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the configured signer source (local, hardware, environment)
    #[arg(long)]
    signer: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP disbursement service (default)
    Serve,
    /// Print the derived vault addresses
    Derive,
    /// Create the vault config and vault holding account
    InitVault,
    /// Rotate the bot authority and set the remote daily limit
    SetBotAuthority {
        /// New bot authority address
        #[arg(long)]
        bot: String,
        /// Daily limit in the asset's smallest unit
        #[arg(long)]
        daily_limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    if let Some(source) = &args.signer {
        config.signer_source = SignerSource::from_str(source)?;
        config.validate()?;
    }

    init_logging(config.logging.json, args.verbose)?;
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Serve) {
        Command::Derive => {
            let addresses = VaultAddresses::derive(&config.program_id()?, &config.asset_id()?)?;
            println!("{}", serde_json::to_string_pretty(&addresses)?);
            Ok(())
        }
        Command::Serve => serve(&config).await,
        Command::InitVault => {
            let ctx = Arc::new(ServiceContext::connect(&config).await?);
            let client = AdminClient::new(ctx.clone(), &ServiceOptions::from_config(&config));
            let result = client.init_vault().await;
            ctx.shutdown().await;
            let executed = result?;
            println!("{}", executed.signature);
            Ok(())
        }
        Command::SetBotAuthority { bot, daily_limit } => {
            let bot = Pubkey::from_str(&bot).context("invalid --bot address")?;
            let ctx = Arc::new(ServiceContext::connect(&config).await?);
            let client = AdminClient::new(ctx.clone(), &ServiceOptions::from_config(&config));
            let result = client.set_bot_authority(&bot, daily_limit).await;
            ctx.shutdown().await;
            let executed = result?;
            println!("{}", executed.signature);
            Ok(())
        }
    }
}

async fn serve(config: &Config) -> Result<()> {
    if config.signer_source == SignerSource::Hardware {
        warn!("Serving with a hardware signer, every disbursement needs device approval");
    }

    let ctx = Arc::new(ServiceContext::connect(config).await?);
    let service = Arc::new(DisbursementService::new(
        ctx.clone(),
        ServiceOptions::from_config(config),
    ));

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "Disbursement API listening");

    let result = api::serve(listener, service, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
    })
    .await;

    ctx.shutdown().await;
    info!("Shut down gracefully");
    result
}
