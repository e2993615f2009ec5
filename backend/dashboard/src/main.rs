//! IoT Device Ledger Dashboard
//!
//! Serves the admin, devices, rewards and data pages as JSON routes:
//! 1. Connects to the node wallet and binds the four contracts
//! 2. Runs form submissions through dispatch and receipt wait
//! 3. Folds contract events into page state and notifications

mod api;
mod app;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use iot_client::contracts::ContractSet;
use iot_client::pages::PageContext;
use iot_client::storage::Web3Storage;
use iot_client::{Config, NotificationLog, RpcWallet, Wallet};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::AppState;

#[derive(Parser, Debug)]
#[command(name = "iot-dashboard")]
#[command(about = "IoT device ledger dashboard", long_about = None)]
struct Cli {
    /// Address to serve the API on
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Do not subscribe to contract events
    #[arg(long, default_value_t = false)]
    no_events: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.validate()?;
    info!("IoT dashboard starting - RPC: {}", config.rpc_url);

    let wallet = Arc::new(
        RpcWallet::connect(&config)
            .await
            .context("Failed to connect wallet")?,
    );
    let context = wallet.context();
    if !context.is_connected() {
        warn!("No account available; pages will reject submissions");
    }

    let contracts = ContractSet::from_config(&config)?;
    let store = Arc::new(Web3Storage::from_config(&config)?);
    if config.web3_storage_token.is_none() {
        warn!("WEB3_STORAGE_TOKEN not set; device registration will fail");
    }

    let notifications = Arc::new(NotificationLog::default());
    let ctx = PageContext::new(
        wallet.clone(),
        wallet.clone(),
        notifications.clone(),
        config.poll_interval(),
    );
    let state = Arc::new(AppState::new(ctx, contracts, store, notifications));

    let _feeds = if cli.no_events {
        warn!("Event feeds disabled");
        Vec::new()
    } else {
        state
            .spawn_event_feeds(wallet.clone(), config.poll_interval())
            .await
            .context("Failed to subscribe to contract events")?
    };

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("Listening on {}", cli.bind);

    axum::serve(listener, app::router(state)).await?;

    Ok(())
}
