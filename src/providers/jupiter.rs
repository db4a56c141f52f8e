//! Jupiter quote provider
//!
//! Implements [`QuoteProvider`] against the Jupiter Swap API (`/quote` and `/swap`).

use crate::config::ClientConfig;
use crate::providers::QuoteProvider;
use crate::quote::{Quote, QuoteRequest};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::str::FromStr;
use std::time::Duration;

/// Jupiter Swap API client
pub struct JupiterQuoteProvider {
    api_url: String,
    api_key: Option<String>,
    client: Client,
}

impl JupiterQuoteProvider {
    /// Create a new Jupiter provider from configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_config(
            &config.jupiter.api_url,
            config.jupiter.api_key.clone(),
            Duration::from_millis(config.jupiter.request_timeout_ms),
        )
    }

    /// Create a new Jupiter provider with explicit configuration
    pub fn with_config(api_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    fn with_api_key(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref api_key) => request.header("x-api-key", api_key),
            None => request,
        }
    }
}

#[async_trait]
impl QuoteProvider for JupiterQuoteProvider {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let input_pubkey = Pubkey::from_str(&request.input_mint)
            .map_err(|e| anyhow!("Invalid input mint address: {}", e))?;
        let output_pubkey = Pubkey::from_str(&request.output_mint)
            .map_err(|e| anyhow!("Invalid output mint address: {}", e))?;

        if input_pubkey == output_pubkey {
            return Err(anyhow!("Input and output mints cannot be the same"));
        }

        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}&onlyDirectRoutes=false&asLegacyTransaction=false",
            self.api_url, request.input_mint, request.output_mint, request.amount, request.slippage_bps
        );

        tracing::debug!(
            input = %request.input_mint,
            output = %request.output_mint,
            amount = request.amount,
            slippage_bps = request.slippage_bps,
            "Requesting Jupiter quote"
        );

        let response = self
            .with_api_key(self.client.get(&url))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to request Jupiter quote: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Jupiter API error ({}): {}", status, text));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Jupiter quote response: {}", e))?;

        parse_quote(raw)
    }

    async fn build_swap_transaction(
        &self,
        quote: &Quote,
        payer: &Pubkey,
        fee_per_unit: Option<u64>,
    ) -> Result<VersionedTransaction> {
        let swap_url = format!("{}/swap", self.api_url);

        let swap_request = JupiterSwapRequest {
            quote_response: &quote.route,
            user_public_key: payer.to_string(),
            wrap_and_unwrap_sol: true,
            compute_unit_price_micro_lamports: fee_per_unit.filter(|fee| *fee > 0),
            dynamic_compute_unit_limit: true,
        };

        let response = self
            .with_api_key(self.client.post(&swap_url))
            .json(&swap_request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to request Jupiter swap: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Jupiter swap API error ({}): {}", status, text));
        }

        let swap_response: JupiterSwapResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Jupiter swap response: {}", e))?;

        decode_transaction(&swap_response.swap_transaction)
    }
}

/// Turn a raw `/quote` body into a [`Quote`], keeping the body as the route descriptor
fn parse_quote(raw: serde_json::Value) -> Result<Quote> {
    let parsed: JupiterQuoteResponse = serde_json::from_value(raw.clone())
        .map_err(|e| anyhow!("Failed to parse Jupiter quote response: {}", e))?;

    let parse_amount = |field: &str, value: &str| {
        value
            .parse::<u64>()
            .map_err(|e| anyhow!("Invalid {} in Jupiter quote: {}", field, e))
    };

    Ok(Quote {
        in_amount: parse_amount("inAmount", &parsed.in_amount)?,
        out_amount: parse_amount("outAmount", &parsed.out_amount)?,
        other_amount_threshold: parse_amount(
            "otherAmountThreshold",
            &parsed.other_amount_threshold,
        )?,
        input_mint: parsed.input_mint,
        output_mint: parsed.output_mint,
        price_impact_pct: parsed.price_impact_pct,
        slippage_bps: parsed.slippage_bps,
        route: raw,
    })
}

/// Decode a base64 wire transaction
pub(crate) fn decode_transaction(encoded: &str) -> Result<VersionedTransaction> {
    let tx_bytes = STANDARD
        .decode(encoded)
        .map_err(|e| anyhow!("Failed to decode base64 transaction: {}", e))?;

    bincode::deserialize(&tx_bytes)
        .map_err(|e| anyhow!("Failed to deserialize Jupiter transaction: {}", e))
}

/// Custom deserializer for price_impact_pct that accepts both string and number
fn deserialize_price_impact<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct PriceImpactVisitor;

    impl<'de> Visitor<'de> for PriceImpactVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or number for price impact")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value as f64)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value as f64)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value.parse::<f64>().map_err(de::Error::custom)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(0.0)
        }
    }

    deserializer.deserialize_any(PriceImpactVisitor)
}

/// Jupiter quote response structure (fields this crate reads)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterQuoteResponse {
    input_mint: String,
    in_amount: String,
    output_mint: String,
    out_amount: String,
    other_amount_threshold: String,
    #[serde(default)]
    slippage_bps: u16,
    #[serde(default, deserialize_with = "deserialize_price_impact")]
    price_impact_pct: f64,
}

/// Jupiter swap request structure
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JupiterSwapRequest<'a> {
    quote_response: &'a serde_json::Value,
    user_public_key: String,
    wrap_and_unwrap_sol: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_unit_price_micro_lamports: Option<u64>,
    dynamic_compute_unit_limit: bool,
}

/// Jupiter swap response structure
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterSwapResponse {
    swap_transaction: String, // Base64 encoded transaction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{SOL_MINT, USDC_MINT};
    use serde_json::json;
    use solana_sdk::{
        hash::Hash,
        message::{v0, VersionedMessage},
        signature::{Keypair, Signature, Signer},
        system_instruction,
    };

    fn sample_quote_body() -> serde_json::Value {
        json!({
            "inputMint": SOL_MINT,
            "inAmount": "1000000",
            "outputMint": USDC_MINT,
            "outAmount": "50000",
            "otherAmountThreshold": "49500",
            "swapMode": "ExactIn",
            "slippageBps": 100,
            "priceImpactPct": "0.0012",
            "routePlan": [{"swapInfo": {"label": "Whirlpool"}, "percent": 100}],
            "contextSlot": 1234
        })
    }

    #[test]
    fn test_parse_quote() {
        let quote = parse_quote(sample_quote_body()).unwrap();
        assert_eq!(quote.in_amount, 1_000_000);
        assert_eq!(quote.out_amount, 50_000);
        assert_eq!(quote.minimum_output_amount(), 49_500);
        assert_eq!(quote.slippage_bps, 100);
        assert!((quote.price_impact_percent() - 0.12).abs() < 1e-9);
        // the raw body is kept for the swap request
        assert_eq!(quote.route["contextSlot"], 1234);
    }

    #[test]
    fn test_parse_quote_numeric_price_impact() {
        let mut body = sample_quote_body();
        body["priceImpactPct"] = json!(0);
        let quote = parse_quote(body).unwrap();
        assert_eq!(quote.price_impact_pct, 0.0);
    }

    #[test]
    fn test_parse_quote_rejects_bad_amount() {
        let mut body = sample_quote_body();
        body["outAmount"] = json!("lots");
        let err = parse_quote(body).unwrap_err();
        assert!(err.to_string().contains("outAmount"));
    }

    #[test]
    fn test_swap_request_shape() {
        let route = sample_quote_body();
        let request = JupiterSwapRequest {
            quote_response: &route,
            user_public_key: "payer".to_string(),
            wrap_and_unwrap_sol: true,
            compute_unit_price_micro_lamports: None,
            dynamic_compute_unit_limit: true,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["userPublicKey"], "payer");
        assert_eq!(body["wrapAndUnwrapSol"], true);
        assert_eq!(body["dynamicComputeUnitLimit"], true);
        assert_eq!(body["quoteResponse"]["outAmount"], "50000");
        assert!(body.get("computeUnitPriceMicroLamports").is_none());
    }

    #[test]
    fn test_decode_transaction() {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let message =
            v0::Message::try_compile(&payer.pubkey(), &[ix], &[], Hash::default()).unwrap();
        let tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::V0(message),
        };
        let encoded = STANDARD.encode(bincode::serialize(&tx).unwrap());

        let decoded = decode_transaction(&encoded).unwrap();
        assert_eq!(decoded, tx);
        assert!(decode_transaction("%%%").is_err());
    }
}
