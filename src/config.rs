use crate::retry::RetryPolicy;
use figment::{providers::Env, Figment};
use serde::{Deserialize, Deserializer, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
    signature::Keypair,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;

/// Public mainnet RPC, used when neither an RPC URL nor a Helius key is configured
pub const PUBLIC_MAINNET_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Jito tip accounts on mainnet
pub const DEFAULT_TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

/// Priority fee level, ordered from cheapest to most aggressive
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeeLevel {
    Low,
    #[default]
    Medium,
    High,
    /// Maps to the 90th percentile of recent fees
    Turbo,
}

impl From<&str> for FeeLevel {
    /// Unknown names fall back to `Medium`
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" => FeeLevel::Low,
            "high" => FeeLevel::High,
            "turbo" | "veryhigh" | "very_high" => FeeLevel::Turbo,
            _ => FeeLevel::Medium,
        }
    }
}

impl<'de> Deserialize<'de> for FeeLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(FeeLevel::from(value.as_str()))
    }
}

/// Custom deserializer for wallet_keypair that accepts both strings and sequences
///
/// When figment parses a JSON array string like "[1,2,3,...]", it treats it as a sequence.
/// This deserializer accepts both formats and converts sequences back to JSON strings.
fn deserialize_wallet_keypair<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct WalletKeypairVisitor;

    impl<'de> Visitor<'de> for WalletKeypairVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of bytes")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(WalletKeypairVisitor)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut bytes = Vec::new();
            while let Some(byte) = seq.next_element::<u8>()? {
                bytes.push(byte);
            }
            Ok(Some(
                serde_json::to_string(&bytes).map_err(de::Error::custom)?,
            ))
        }
    }

    deserializer.deserialize_option(WalletKeypairVisitor)
}

/// Custom deserializer for CommitmentLevel that accepts string values
fn deserialize_commitment_level<'de, D>(deserializer: D) -> Result<CommitmentLevel, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct CommitmentLevelVisitor;

    impl<'de> Visitor<'de> for CommitmentLevelVisitor {
        type Value = CommitmentLevel;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string: \"processed\", \"confirmed\", or \"finalized\"")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            match value.to_lowercase().as_str() {
                "processed" => Ok(CommitmentLevel::Processed),
                "confirmed" => Ok(CommitmentLevel::Confirmed),
                "finalized" => Ok(CommitmentLevel::Finalized),
                _ => Err(de::Error::custom(format!(
                    "Invalid commitment level: {}. Must be one of: processed, confirmed, finalized",
                    value
                ))),
            }
        }
    }

    deserializer.deserialize_str(CommitmentLevelVisitor)
}

/// Connection and wallet settings shared by every collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConfig {
    /// Solana RPC endpoint URL. Takes precedence over `helius_api_key`.
    pub rpc_url: Option<String>,
    /// Helius API key; builds `https://mainnet.helius-rpc.com/?api-key=...` when no RPC URL is set
    pub helius_api_key: Option<String>,
    /// WebSocket endpoint for signature subscriptions (derived from the RPC URL when unset)
    pub ws_url: Option<String>,
    /// Commitment level for status checks and confirmation (defaults to Confirmed)
    #[serde(deserialize_with = "deserialize_commitment_level")]
    pub commitment_level: CommitmentLevel,
    /// Wallet keypair for the local signer (base58 encoded string, JSON array, or comma-separated bytes)
    /// Optional - a remote signer can be configured instead
    #[serde(deserialize_with = "deserialize_wallet_keypair")]
    pub wallet_keypair: Option<String>,
    /// Explorer base used in confirmation-timeout messages
    pub explorer_url: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            helius_api_key: None,
            ws_url: None,
            commitment_level: CommitmentLevel::Confirmed,
            wallet_keypair: None,
            explorer_url: "https://solscan.io/tx".to_string(),
        }
    }
}

impl SharedConfig {
    /// RPC endpoint in effect
    pub fn rpc_endpoint(&self) -> String {
        if let Some(url) = self.rpc_url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }
        match self.helius_api_key.as_ref().filter(|k| !k.is_empty()) {
            Some(key) => format!("https://mainnet.helius-rpc.com/?api-key={}", key),
            None => PUBLIC_MAINNET_RPC_URL.to_string(),
        }
    }

    /// WebSocket endpoint in effect
    pub fn ws_endpoint(&self) -> String {
        if let Some(url) = self.ws_url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }
        let rpc = self.rpc_endpoint();
        if let Some(rest) = rpc.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = rpc.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            rpc
        }
    }

    pub fn commitment(&self) -> CommitmentConfig {
        CommitmentConfig {
            commitment: self.commitment_level,
        }
    }
}

/// Explorer link for a transaction signature under `explorer_url`
pub fn explorer_link(explorer_url: &str, signature: &str) -> String {
    format!("{}/{}", explorer_url.trim_end_matches('/'), signature)
}

/// Jupiter-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JupiterConfig {
    /// Jupiter Swap API URL
    pub api_url: String,
    /// Jupiter API key, sent as `x-api-key` when present
    /// Get your API key from https://portal.jup.ag/
    pub api_key: Option<String>,
    /// HTTP timeout for quote and swap requests, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.jup.ag/v6".to_string(),
            api_key: None,
            request_timeout_ms: 15_000,
        }
    }
}

/// Jito block engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitoConfig {
    /// Block engine API base (bundles are posted to `{url}/bundles`)
    pub block_engine_url: String,
    /// Tip accounts to choose from
    pub tip_accounts: Vec<String>,
    /// HTTP timeout for bundle requests, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for JitoConfig {
    fn default() -> Self {
        Self {
            block_engine_url: "https://mainnet.block-engine.jito.wtf/api/v1".to_string(),
            tip_accounts: DEFAULT_TIP_ACCOUNTS.iter().map(|s| s.to_string()).collect(),
            request_timeout_ms: 10_000,
        }
    }
}

impl JitoConfig {
    /// Parsed tip accounts, skipping malformed entries
    pub fn tip_pubkeys(&self) -> Vec<Pubkey> {
        self.tip_accounts
            .iter()
            .filter_map(|s| Pubkey::from_str(s).ok())
            .collect()
    }
}

/// Remote signing service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Base URL of the signing service. When unset the local wallet keypair signs.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

/// User-facing swap settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwapSettings {
    /// Slippage tolerance in percent (0.5 = 0.5%)
    pub slippage_percent: f64,
    pub priority_fee: FeeLevel,
    /// Tip paid on the bundled fast path, in SOL
    pub fast_path_tip_sol: f64,
    /// Deliver through the tipped bundle path. Off by default.
    pub enable_fast_path: bool,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            slippage_percent: 0.5,
            priority_fee: FeeLevel::Medium,
            fast_path_tip_sol: 0.0001,
            enable_fast_path: false,
        }
    }
}

impl SwapSettings {
    pub fn slippage_bps(&self) -> u16 {
        crate::quote::slippage_to_bps(self.slippage_percent)
    }

    /// Tip in lamports, floored
    pub fn fast_path_tip_lamports(&self) -> u64 {
        sol_to_lamports(self.fast_path_tip_sol)
    }
}

/// SOL to lamports, floored
pub fn sol_to_lamports(sol: f64) -> u64 {
    if !sol.is_finite() || sol <= 0.0 {
        return 0;
    }
    let scaled = (sol * 1e9 * 1e3).round() / 1e3;
    scaled.floor() as u64
}

/// Delays, windows and attempt bounds of the pipeline (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub quote_debounce_ms: u64,
    pub quote_retry_attempts: u32,
    pub quote_retry_base_ms: u64,
    pub fee_ttl_ms: u64,
    pub template_settle_ms: u64,
    pub template_ttl_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub bundle_submit_attempts: u32,
    pub bundle_submit_delay_ms: u64,
    pub bundle_poll_attempts: u32,
    pub bundle_poll_delay_ms: u64,
    /// How long `success` stays on screen before the session resets
    pub success_reset_ms: u64,
    /// Delay before refetching a quote after a recoverable failure
    pub recovery_refetch_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            quote_debounce_ms: 500,
            quote_retry_attempts: 3,
            quote_retry_base_ms: 500,
            fee_ttl_ms: 60_000,
            template_settle_ms: 100,
            template_ttl_ms: 30_000,
            confirmation_timeout_ms: 60_000,
            bundle_submit_attempts: 3,
            bundle_submit_delay_ms: 1_000,
            bundle_poll_attempts: 3,
            bundle_poll_delay_ms: 2_000,
            success_reset_ms: 3_000,
            recovery_refetch_ms: 500,
        }
    }
}

impl TimingConfig {
    pub fn quote_debounce(&self) -> Duration {
        Duration::from_millis(self.quote_debounce_ms)
    }

    pub fn quote_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.quote_retry_attempts,
            Duration::from_millis(self.quote_retry_base_ms),
        )
    }

    pub fn fee_ttl(&self) -> Duration {
        Duration::from_millis(self.fee_ttl_ms)
    }

    pub fn template_settle(&self) -> Duration {
        Duration::from_millis(self.template_settle_ms)
    }

    pub fn template_ttl(&self) -> Duration {
        Duration::from_millis(self.template_ttl_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn bundle_submit_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.bundle_submit_attempts,
            Duration::from_millis(self.bundle_submit_delay_ms),
        )
    }

    pub fn bundle_poll_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.bundle_poll_attempts,
            Duration::from_millis(self.bundle_poll_delay_ms),
        )
    }

    pub fn success_reset(&self) -> Duration {
        Duration::from_millis(self.success_reset_ms)
    }

    pub fn recovery_refetch(&self) -> Duration {
        Duration::from_millis(self.recovery_refetch_ms)
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub jupiter: JupiterConfig,
    #[serde(default)]
    pub jito: JitoConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub swap: SwapSettings,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables using figment
    ///
    /// Environment variables are prefixed with `SWAP_EXECUTOR_` and use `__` to separate nested keys.
    /// Examples:
    /// - `SWAP_EXECUTOR_SHARED__RPC_URL` for `shared.rpc_url`
    /// - `SWAP_EXECUTOR_SHARED__HELIUS_API_KEY` for `shared.helius_api_key`
    /// - `SWAP_EXECUTOR_JUPITER__API_KEY` for `jupiter.api_key`
    /// - `SWAP_EXECUTOR_SWAP__ENABLE_FAST_PATH` for `swap.enable_fast_path`
    /// - `SWAP_EXECUTOR_TIMING__CONFIRMATION_TIMEOUT_MS` for `timing.confirmation_timeout_ms`
    pub fn from_env() -> Result<Self, figment::Error> {
        let config: Self = Figment::new()
            .merge(Env::prefixed("SWAP_EXECUTOR_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Validate the configuration, including RPC and Jupiter reachability
    ///
    /// Returns Ok(()) if valid, Err(Vec<String>) with validation errors if invalid
    pub async fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.validate_static();

        if let Err(e) = self.validate_rpc_url().await {
            errors.push(format!(
                "RPC URL validation failed ({}): {}",
                self.shared.rpc_endpoint(),
                e
            ));
        }

        if !self.jupiter.api_url.is_empty() {
            if let Err(e) = self.validate_jupiter_url().await {
                errors.push(format!(
                    "Jupiter API URL validation failed ({}): {}",
                    self.jupiter.api_url, e
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Checks that need no network access
    pub fn validate_static(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(ref wallet_keypair) = self.shared.wallet_keypair {
            if wallet_keypair.is_empty() {
                errors.push("Wallet keypair is set but empty".to_string());
            } else if let Err(e) = self.get_keypair() {
                errors.push(format!("Invalid wallet keypair format: {}", e));
            }
        }

        if self.jupiter.api_url.is_empty() {
            errors.push("Jupiter API URL is required".to_string());
        }

        let slippage = self.swap.slippage_percent;
        if !slippage.is_finite() || slippage <= 0.0 || slippage > 50.0 {
            errors.push(format!(
                "Slippage must be between 0 and 50 percent, got {}",
                slippage
            ));
        }

        if !self.swap.fast_path_tip_sol.is_finite() || self.swap.fast_path_tip_sol < 0.0 {
            errors.push("Fast path tip must be a non-negative amount of SOL".to_string());
        }

        if self.swap.enable_fast_path && self.jito.tip_pubkeys().is_empty() {
            errors.push("Fast path is enabled but no valid tip accounts are configured".to_string());
        }

        if let Some(ref endpoint) = self.signer.endpoint {
            if reqwest::Url::parse(endpoint).is_err() {
                errors.push(format!("Signer endpoint is not a valid URL: {}", endpoint));
            }
        }

        errors
    }

    async fn validate_rpc_url(&self) -> anyhow::Result<()> {
        let rpc_client = RpcClient::new_with_commitment(
            self.shared.rpc_endpoint(),
            self.shared.commitment(),
        );

        timeout(Duration::from_secs(5), rpc_client.get_version())
            .await
            .map_err(|_| anyhow::anyhow!("RPC connection timeout"))?
            .map_err(|e| anyhow::anyhow!("Failed to connect to RPC: {}", e))?;

        Ok(())
    }

    async fn validate_jupiter_url(&self) -> anyhow::Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        timeout(Duration::from_secs(5), client.get(&self.jupiter.api_url).send())
            .await
            .map_err(|_| anyhow::anyhow!("Jupiter API request timeout"))?
            .map_err(|e| anyhow::anyhow!("Failed to connect to Jupiter API: {}", e))?;

        Ok(())
    }

    /// Get the wallet keypair from the configuration
    /// Returns None if no keypair is configured (a remote signer is used instead)
    pub fn get_keypair(&self) -> anyhow::Result<Option<Keypair>> {
        let wallet_keypair = match &self.shared.wallet_keypair {
            Some(kp) => kp,
            None => return Ok(None),
        };

        let bytes: Vec<u8> = if wallet_keypair.starts_with('[') {
            serde_json::from_str(wallet_keypair)
                .map_err(|e| anyhow::anyhow!("Failed to parse wallet keypair as JSON: {}", e))?
        } else if let Ok(decoded) = bs58::decode(wallet_keypair).into_vec() {
            decoded
        } else if wallet_keypair.contains(',') {
            wallet_keypair
                .split(',')
                .map(|s| s.trim().parse::<u8>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow::anyhow!("Failed to parse wallet keypair bytes: {}", e))?
        } else {
            return Err(anyhow::anyhow!(
                "Invalid wallet keypair format. Expected base58 string, JSON array, or comma-separated bytes"
            ));
        };

        if bytes.len() != 64 {
            return Err(anyhow::anyhow!(
                "Invalid keypair length: expected 64 bytes, got {} bytes",
                bytes.len()
            ));
        }

        // 32 secret bytes followed by 32 public bytes
        let keypair = Keypair::from_bytes(&bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create keypair from bytes: {}", e))?;
        Ok(Some(keypair))
    }
}
