//! Priority fee estimation from recent prioritization fees
//!
//! Uses the standard `getRecentPrioritizationFees` RPC method, which Helius
//! and most other providers serve, and maps percentiles onto fee levels.

use crate::config::{ClientConfig, FeeLevel};
use crate::providers::FeeProvider;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Fee tiers in micro-lamports per compute unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFeeTiers {
    pub min: u64,
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub very_high: u64,
    pub unsafe_max: u64,
}

impl PriorityFeeTiers {
    /// Tiers used when the network reports no recent fees
    pub const FALLBACK: PriorityFeeTiers = PriorityFeeTiers {
        min: 0,
        low: 1_000,
        medium: 10_000,
        high: 50_000,
        very_high: 100_000,
        unsafe_max: 1_000_000,
    };

    /// Build tiers from raw fee samples (any order). Empty samples yield `FALLBACK`.
    pub fn from_samples(mut fees: Vec<u64>) -> Self {
        if fees.is_empty() {
            return Self::FALLBACK;
        }
        fees.sort_unstable();

        let len = fees.len();
        let pick = |p: f64| fees[(len - 1).min((len as f64 * p).floor() as usize)];

        Self {
            min: fees[0],
            low: pick(0.25),
            medium: pick(0.5),
            high: pick(0.75),
            very_high: pick(0.9),
            unsafe_max: fees[len - 1],
        }
    }

    pub fn for_level(&self, level: FeeLevel) -> u64 {
        match level {
            FeeLevel::Low => self.low,
            FeeLevel::Medium => self.medium,
            FeeLevel::High => self.high,
            FeeLevel::Turbo => self.very_high,
        }
    }
}

/// `getRecentPrioritizationFees` response
#[derive(Debug, Deserialize)]
struct RpcFeesResponse {
    #[serde(default)]
    result: Option<Vec<PrioritizationFeeSample>>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrioritizationFeeSample {
    #[allow(dead_code)]
    slot: u64,
    prioritization_fee: u64,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Fee provider backed by the RPC endpoint
pub struct RpcPriorityFeeProvider {
    rpc_url: String,
    client: Client,
}

impl RpcPriorityFeeProvider {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_url(&config.shared.rpc_endpoint())
    }

    pub fn with_url(rpc_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            client,
        })
    }

    /// Fetch the current fee tiers for the given writable accounts
    pub async fn get_priority_fees(&self, account_keys: &[String]) -> Result<PriorityFeeTiers> {
        let keys: Vec<&str> = account_keys
            .iter()
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .collect();

        let body = json!({
            "jsonrpc": "2.0",
            "id": "recent-priority-fees",
            "method": "getRecentPrioritizationFees",
            "params": [keys],
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to request priority fees: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Priority fee request failed ({}): {}", status, text));
        }

        let parsed: RpcFeesResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse priority fee response: {}", e))?;

        if let Some(error) = parsed.error {
            return Err(anyhow!("RPC error {}: {}", error.code, error.message));
        }

        let samples = parsed
            .result
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.prioritization_fee)
            .collect::<Vec<_>>();

        if samples.is_empty() {
            tracing::debug!("No recent prioritization fees reported, using fallback tiers");
        }

        Ok(PriorityFeeTiers::from_samples(samples))
    }
}

#[async_trait]
impl FeeProvider for RpcPriorityFeeProvider {
    async fn get_fee_for_level(
        &self,
        level: FeeLevel,
        relevant_accounts: &[String],
    ) -> Result<u64> {
        let tiers = self.get_priority_fees(relevant_accounts).await?;
        Ok(tiers.for_level(level))
    }
}
