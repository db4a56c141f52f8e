//! Basic swap walkthrough: prefetch, execute, and a fast-path swap
//!
//! This example shows how to drive the swap executor the way an interactive
//! front end would: fill the form, watch the session, execute the prepared
//! swap.
//!
//! # Setup
//!
//! Set the following environment variables before running:
//!
//! ```bash
//! export SWAP_EXECUTOR_SHARED__RPC_URL="https://api.mainnet-beta.solana.com"
//! export SWAP_EXECUTOR_SHARED__WALLET_KEYPAIR="your_keypair_here"
//! export SWAP_EXECUTOR_JUPITER__API_KEY="your_jupiter_api_key"
//! # optional: custodial signer instead of the local keypair
//! export SWAP_EXECUTOR_SIGNER__ENDPOINT="https://signer.example.com"
//! ```
//!
//! # Running
//!
//! ```bash
//! cargo run --example basic_swap
//! ```

use anyhow::Result;
use solana_swap_executor::{
    config::{ClientConfig, FeeLevel, SwapSettings},
    quote::Asset,
    Notification, SwapExecutorClient,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with INFO level by default if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // Load .env file if it exists (ignore errors if it doesn't exist)
    let _ = dotenvy::dotenv();

    let config = ClientConfig::from_env()?;

    tracing::info!("Validating configuration");
    if let Err(errors) = config.validate().await {
        for error in errors {
            tracing::error!(error = %error, "Configuration error");
        }
        return Err(anyhow::anyhow!("Invalid configuration"));
    }
    tracing::info!("Configuration valid");

    let client = SwapExecutorClient::from_config(config)?;

    // Print every phase change and notice as it happens
    let mut snapshots = client.subscribe();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            tracing::info!(
                phase = ?snapshot.phase,
                output_estimate = ?snapshot.output_estimate,
                signature = ?snapshot.signature,
                "Session"
            );
        }
    });
    let mut notices = client.notifications();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                Notification::Error(message) => tracing::error!(%message, "Notice"),
                Notification::Loading(message)
                | Notification::Success(message)
                | Notification::Info(message) => tracing::info!(%message, "Notice"),
            }
        }
    });

    // Example 1: standard path
    // Filling the form starts a debounced quote and, once it settles, a
    // prebuilt transaction. Executing then only signs and submits.
    tracing::info!("Example 1: Standard path swap");
    client.set_input_asset(Asset::sol());
    client.set_output_asset(Asset::usdc());
    client.set_amount("0.0001");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let receipt = client.execute_swap().await?;
    tracing::info!(
        signature = %receipt.signature,
        path = ?receipt.path,
        "Swap successful"
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    if let Some(balances) = client.balances() {
        tracing::info!(
            lamports = balances.lamports,
            usdc = balances.token_amount,
            "Wallet balances"
        );
    }

    // Example 2: fast path with a higher fee level
    // The signed swap is bundled with a tip; if the bundler is unavailable the
    // same signed transaction goes out over RPC instead.
    tracing::info!("Example 2: Fast path swap");
    tokio::time::sleep(Duration::from_secs(4)).await;
    client.update_settings(SwapSettings {
        priority_fee: FeeLevel::High,
        enable_fast_path: true,
        fast_path_tip_sol: 0.0001,
        ..client.settings()
    });
    client.set_amount("0.0001");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let receipt = client.execute_swap().await?;
    tracing::info!(
        signature = %receipt.signature,
        path = ?receipt.path,
        bundle_id = ?receipt.bundle_id,
        "Swap successful"
    );

    Ok(())
}
