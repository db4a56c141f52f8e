use anyhow::{anyhow, Result};
use solana_swap_executor::quote::{Asset, SOL_MINT, USDC_MINT};
use solana_swap_executor::{ClientConfig, SwapExecutorClient};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (useful for local runs)
    let _ = dotenvy::dotenv();

    // Logging: default to info unless RUST_LOG is set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = ClientConfig::from_env().map_err(|e| anyhow!("Failed to load config: {e}"))?;
    let debounce = config.timing.quote_debounce();
    let client = SwapExecutorClient::from_config(config)?;

    // Tiny default amount for a smoke-test swap
    let amount = std::env::var("BENCH_AMOUNT").unwrap_or_else(|_| "0.0001".to_string());
    let input_mint = std::env::var("BENCH_INPUT_MINT").unwrap_or_else(|_| SOL_MINT.to_string());
    let output_mint = std::env::var("BENCH_OUTPUT_MINT").unwrap_or_else(|_| USDC_MINT.to_string());
    let execute = std::env::var("BENCH_EXECUTE").is_ok_and(|v| v == "1" || v == "true");

    let input = asset_for(&input_mint);
    let output = asset_for(&output_mint);
    tracing::info!(
        input = %input.symbol,
        output = %output.symbol,
        amount = %amount,
        execute,
        "Starting bench"
    );

    let mut snapshots = client.subscribe();
    let started = Instant::now();
    client.set_input_asset(input);
    client.set_output_asset(output);
    client.set_amount(&amount);

    tokio::time::timeout(
        Duration::from_secs(30),
        snapshots.wait_for(|snapshot| snapshot.quote.is_some()),
    )
    .await
    .map_err(|_| anyhow!("No quote within 30s"))?
    .map_err(|e| anyhow!("Session closed: {e}"))?;

    let snapshot = client.snapshot();
    let quote_ms = started.elapsed().as_secs_f64() * 1000.0;
    if let Some(quote) = snapshot.quote.as_ref() {
        tracing::info!(
            quote_id = quote.id.0,
            out_amount = quote.quote.out_amount,
            output_estimate = ?snapshot.output_estimate,
            price_impact_pct = quote.quote.price_impact_percent(),
            quote_ms,
            fetch_ms = quote_ms - debounce.as_secs_f64() * 1000.0,
            "Quote ready"
        );
    }

    if !execute {
        tracing::info!("BENCH_EXECUTE not set, skipping execution");
        return Ok(());
    }

    // give the background prebuild a chance to land
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    let receipt = client.execute_swap().await?;
    tracing::info!(
        signature = %receipt.signature,
        path = ?receipt.path,
        bundle_id = ?receipt.bundle_id,
        execution_ms = started.elapsed().as_secs_f64() * 1000.0,
        "Swap complete"
    );

    Ok(())
}

fn asset_for(mint: &str) -> Asset {
    match mint {
        SOL_MINT => Asset::sol(),
        USDC_MINT => Asset::usdc(),
        other => {
            let decimals = std::env::var("BENCH_MINT_DECIMALS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6);
            Asset::new(other, "TOKEN", decimals)
        }
    }
}
