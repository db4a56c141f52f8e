//! Jito block engine bundler
//!
//! Implements [`BundleProvider`] over the block engine JSON-RPC API
//! (`sendBundle`, `getBundleStatuses`).

use crate::config::ClientConfig;
use crate::providers::{BundleProvider, BundleStatus};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::time::Duration;

/// Jito bundle client
pub struct JitoBundler {
    /// `{block_engine_url}/bundles`
    bundles_url: String,
    tip_accounts: Vec<Pubkey>,
    http_client: Client,
}

impl JitoBundler {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_config(
            &config.jito.block_engine_url,
            config.jito.tip_pubkeys(),
            Duration::from_millis(config.jito.request_timeout_ms),
        )
    }

    pub fn with_config(
        block_engine_url: &str,
        tip_accounts: Vec<Pubkey>,
        timeout: Duration,
    ) -> Result<Self> {
        if tip_accounts.is_empty() {
            return Err(anyhow!("Jito bundler requires at least one tip account"));
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            bundles_url: format!("{}/bundles", block_engine_url.trim_end_matches('/')),
            tip_accounts,
            http_client,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(&self.bundles_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Jito {} request failed: {}", method, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("Jito rate limited (429) on {}", method));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Jito API error ({}): {}", status, text));
        }

        let reply: JsonRpcReply = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Jito {} response: {}", method, e))?;

        if let Some(error) = reply.error {
            return Err(anyhow!("Jito {} error: {}", method, error));
        }
        reply
            .result
            .ok_or_else(|| anyhow!("Jito {} returned no result", method))
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BundleStatusesResult {
    #[serde(default)]
    value: Vec<Option<BundleStatusEntry>>,
}

#[derive(Debug, Deserialize)]
struct BundleStatusEntry {
    #[serde(default)]
    confirmation_status: Option<String>,
    #[serde(default)]
    err: Option<Value>,
}

/// Interpret a `getBundleStatuses` result for a single bundle
fn interpret_bundle_status(result: Value) -> Result<BundleStatus> {
    let parsed: BundleStatusesResult = serde_json::from_value(result)
        .map_err(|e| anyhow!("Failed to parse bundle status: {}", e))?;

    let entry = match parsed.value.into_iter().next().flatten() {
        Some(entry) => entry,
        None => return Ok(BundleStatus::default()),
    };

    // the block engine reports success as {"Ok": null}
    let error = entry.err.filter(|err| match err {
        Value::Null => false,
        Value::Object(map) => !(map.len() == 1 && map.get("Ok").is_some_and(Value::is_null)),
        _ => true,
    });
    if let Some(err) = error {
        return Ok(BundleStatus {
            landed: false,
            error: Some(err.to_string()),
        });
    }

    let landed = matches!(
        entry.confirmation_status.as_deref(),
        Some("confirmed") | Some("finalized")
    );
    Ok(BundleStatus {
        landed,
        error: None,
    })
}

#[async_trait]
impl BundleProvider for JitoBundler {
    fn tip_accounts(&self) -> Vec<Pubkey> {
        self.tip_accounts.clone()
    }

    async fn submit_bundle(&self, transactions: &[VersionedTransaction]) -> Result<String> {
        let encoded = transactions
            .iter()
            .map(|tx| {
                bincode::serialize(tx)
                    .map(|bytes| bs58::encode(bytes).into_string())
                    .map_err(|e| anyhow!("Failed to serialize bundle transaction: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let result = self.call("sendBundle", json!([encoded])).await?;

        let bundle_id = result
            .as_str()
            .ok_or_else(|| anyhow!("Jito sendBundle returned a non-string bundle id"))?
            .to_string();

        tracing::debug!(bundle_id = %bundle_id, transactions = transactions.len(), "Bundle submitted");
        Ok(bundle_id)
    }

    async fn get_bundle_status(&self, bundle_id: &str) -> Result<BundleStatus> {
        let result = self.call("getBundleStatuses", json!([[bundle_id]])).await?;
        interpret_bundle_status(result)
    }
}
