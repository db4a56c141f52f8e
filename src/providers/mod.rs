//! Collaborator contracts and their concrete adapters
//!
//! The executor only talks to the outside world through the traits in this
//! module. Concrete adapters for Jupiter, Solana RPC, Jito and remote signing
//! services live in the submodules; tests substitute in-memory doubles.

use crate::config::FeeLevel;
use crate::providers::balances::WalletBalances;
use crate::quote::{Quote, QuoteRequest};
use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction,
};
use std::time::Duration;
use tokio::sync::watch;

pub mod balances;
pub mod fees;
pub mod jito;
pub mod jupiter;
pub mod rpc;
pub mod signer;

/// Landing status of a transaction as reported by a one-shot status query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStatus {
    /// Reached the configured commitment
    pub landed: bool,
    /// Execution error reported by the runtime (raw payload)
    pub execution_error: Option<String>,
}

/// Outcome of waiting for a push notification on a signature
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmationResult {
    /// A landing notification arrived before the timeout
    pub confirmed: bool,
    /// Execution error carried by the notification
    pub error: Option<String>,
}

/// Status of a submitted bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleStatus {
    pub landed: bool,
    /// Error reported by the bundler. Rate-limit errors are retryable.
    pub error: Option<String>,
}

/// Address format tag carried by Solana signer accounts
pub const ADDRESS_FORMAT_SOLANA: &str = "ADDRESS_FORMAT_SOLANA";

/// Account descriptor returned by the external signer
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerAccount {
    pub address: String,
    pub address_format: String,
    /// Provider-specific account reference, passed back on sign requests
    #[serde(default)]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Normalized signer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerResponse {
    /// Wire bytes of the signed transaction
    pub signed_bytes: Vec<u8>,
}

/// Price quotes and swap transaction construction
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch a quote for the request
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote>;

    /// Build the unsigned swap transaction for a quote
    ///
    /// # Arguments
    /// * `quote` - Quote to execute
    /// * `payer` - Fee payer and swap authority
    /// * `fee_per_unit` - Priority fee in micro-lamports per compute unit, if known
    async fn build_swap_transaction(
        &self,
        quote: &Quote,
        payer: &Pubkey,
        fee_per_unit: Option<u64>,
    ) -> Result<VersionedTransaction>;
}

/// Network congestion based priority fee estimates
#[async_trait]
pub trait FeeProvider: Send + Sync {
    /// Priority fee in micro-lamports per compute unit for the level
    async fn get_fee_for_level(&self, level: FeeLevel, relevant_accounts: &[String])
        -> Result<u64>;
}

/// Transaction submission and status over a shared RPC connection
#[async_trait]
pub trait RpcProvider: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Submit an already signed transaction once
    async fn submit_raw(&self, transaction: &VersionedTransaction) -> Result<Signature>;

    async fn get_status(&self, signature: &Signature) -> Result<TransactionStatus>;

    /// Wait for a landing notification, giving up after `timeout`
    async fn subscribe_to_status(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<ConfirmationResult>;

    /// Estimate compute units consumed by the transaction
    async fn simulate(&self, transaction: &VersionedTransaction) -> Result<u64>;
}

/// Tipped bundle delivery
#[async_trait]
pub trait BundleProvider: Send + Sync {
    /// Addresses that accept tips
    fn tip_accounts(&self) -> Vec<Pubkey>;

    /// Submit transactions as one atomic bundle, returning the bundle id
    async fn submit_bundle(&self, transactions: &[VersionedTransaction]) -> Result<String>;

    async fn get_bundle_status(&self, bundle_id: &str) -> Result<BundleStatus>;
}

/// External (custodial or local) transaction signer
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Whether the signer session is usable yet
    fn is_ready(&self) -> bool {
        true
    }

    async fn list_accounts(&self) -> Result<Vec<SignerAccount>>;

    /// Sign serialized unsigned transaction bytes with the given account
    async fn sign(&self, unsigned: &[u8], account: &SignerAccount) -> Result<SignerResponse>;
}

/// Wallet balance refresh, fired after a transaction lands
#[async_trait]
pub trait BalanceRefresher: Send + Sync {
    /// Re-read balances for `owner` and publish them to subscribers
    async fn refresh(&self, owner: &Pubkey) -> Result<()>;

    /// Latest published balances
    fn subscribe(&self) -> watch::Receiver<WalletBalances>;
}
