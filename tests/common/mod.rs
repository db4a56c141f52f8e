//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    hash::Hash,
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::{Transaction, VersionedTransaction},
};
use solana_swap_executor::config::{ClientConfig, FeeLevel};
use solana_swap_executor::providers::signer::KeypairSigner;
use solana_swap_executor::providers::{
    BalanceRefresher, BundleProvider, BundleStatus, ConfirmationResult, FeeProvider,
    QuoteProvider, RemoteSigner, RpcProvider, TransactionStatus,
};
use solana_swap_executor::quote::{Quote, QuoteRequest};
use solana_swap_executor::{Collaborators, SwapExecutorClient, WalletBalances};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Unsigned single-instruction transaction paid by `payer`
pub fn unsigned_transfer(payer: &Pubkey, lamports: u64) -> VersionedTransaction {
    let ix = system_instruction::transfer(payer, &Pubkey::new_unique(), lamports);
    let message = Message::new_with_blockhash(&[ix], Some(payer), &Hash::new_unique());
    VersionedTransaction::from(Transaction::new_unsigned(message))
}

/// Quote provider answering `out = in * 2`, with scripted failures
#[derive(Default)]
pub struct MockQuotes {
    pub quote_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
    pub latency: Mutex<Duration>,
    pub quote_failures: Mutex<VecDeque<String>>,
    pub build_failures: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<QuoteRequest>>,
    /// Fee passed to each build
    pub build_fees: Mutex<Vec<Option<u64>>>,
}

impl MockQuotes {
    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub fn fail_quotes(&self, times: usize, message: &str) {
        let mut failures = self.quote_failures.lock();
        for _ in 0..times {
            failures.push_back(message.to_string());
        }
    }

    pub fn fail_builds(&self, times: usize, message: &str) {
        let mut failures = self.build_failures.lock();
        for _ in 0..times {
            failures.push_back(message.to_string());
        }
    }
}

#[async_trait]
impl QuoteProvider for MockQuotes {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = self.quote_failures.lock().pop_front() {
            return Err(anyhow!(message));
        }

        let out_amount = request.amount * 2;
        Ok(Quote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount: request.amount,
            out_amount,
            other_amount_threshold: out_amount - out_amount * request.slippage_bps as u64 / 10_000,
            price_impact_pct: 0.001,
            slippage_bps: request.slippage_bps,
            route: serde_json::json!({ "inAmount": request.amount.to_string() }),
        })
    }

    async fn build_swap_transaction(
        &self,
        _quote: &Quote,
        payer: &Pubkey,
        fee_per_unit: Option<u64>,
    ) -> Result<VersionedTransaction> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        self.build_fees.lock().push(fee_per_unit);
        if let Some(message) = self.build_failures.lock().pop_front() {
            return Err(anyhow!(message));
        }
        Ok(unsigned_transfer(payer, 1))
    }
}

/// Fee provider with one fixed fee per unit
pub struct MockFees {
    pub fee: u64,
    pub calls: AtomicUsize,
    pub latency: Mutex<Duration>,
}

impl MockFees {
    pub fn new(fee: u64) -> Self {
        Self {
            fee,
            calls: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeeProvider for MockFees {
    async fn get_fee_for_level(&self, _level: FeeLevel, _accounts: &[String]) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(self.fee)
    }
}

/// How [`MockRpc::subscribe_to_status`] answers
#[derive(Debug, Clone)]
pub enum Subscription {
    Confirm(ConfirmationResult),
    /// Never resolves; only the caller's timeout ends the wait
    Never,
    Fail(String),
}

pub struct MockRpc {
    pub submitted: Mutex<Vec<VersionedTransaction>>,
    pub submit_error: Mutex<Option<String>>,
    pub status: Mutex<TransactionStatus>,
    pub status_calls: AtomicUsize,
    pub subscription: Mutex<Subscription>,
    pub simulate_calls: AtomicUsize,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            submit_error: Mutex::new(None),
            status: Mutex::new(TransactionStatus {
                landed: true,
                execution_error: None,
            }),
            status_calls: AtomicUsize::new(0),
            subscription: Mutex::new(Subscription::Confirm(ConfirmationResult {
                confirmed: true,
                error: None,
            })),
            simulate_calls: AtomicUsize::new(0),
        }
    }
}

impl MockRpc {
    pub fn submitted(&self) -> Vec<VersionedTransaction> {
        self.submitted.lock().clone()
    }

    pub fn set_subscription(&self, subscription: Subscription) {
        *self.subscription.lock() = subscription;
    }

    pub fn set_status(&self, landed: bool, execution_error: Option<&str>) {
        *self.status.lock() = TransactionStatus {
            landed,
            execution_error: execution_error.map(str::to_string),
        };
    }
}

#[async_trait]
impl RpcProvider for MockRpc {
    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }

    async fn submit_raw(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        if let Some(message) = self.submit_error.lock().clone() {
            return Err(anyhow!(message));
        }
        self.submitted.lock().push(transaction.clone());
        Ok(transaction.signatures[0])
    }

    async fn get_status(&self, _signature: &Signature) -> Result<TransactionStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.lock().clone())
    }

    async fn subscribe_to_status(
        &self,
        _signature: &Signature,
        _timeout: Duration,
    ) -> Result<ConfirmationResult> {
        let subscription = self.subscription.lock().clone();
        match subscription {
            Subscription::Confirm(result) => Ok(result),
            Subscription::Never => std::future::pending().await,
            Subscription::Fail(message) => Err(anyhow!(message)),
        }
    }

    async fn simulate(&self, _transaction: &VersionedTransaction) -> Result<u64> {
        self.simulate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(150_000)
    }
}

/// Bundler with scripted submit and status answers; lands by default
pub struct MockBundler {
    pub tip_accounts: Vec<Pubkey>,
    pub submit_results: Mutex<VecDeque<std::result::Result<String, String>>>,
    pub status_results: Mutex<VecDeque<std::result::Result<BundleStatus, String>>>,
    pub bundles: Mutex<Vec<Vec<VersionedTransaction>>>,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl Default for MockBundler {
    fn default() -> Self {
        Self {
            tip_accounts: vec![Pubkey::new_unique(), Pubkey::new_unique()],
            submit_results: Mutex::new(VecDeque::new()),
            status_results: Mutex::new(VecDeque::new()),
            bundles: Mutex::new(Vec::new()),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }
}

impl MockBundler {
    pub fn fail_submits(&self, times: usize, message: &str) {
        let mut results = self.submit_results.lock();
        for _ in 0..times {
            results.push_back(Err(message.to_string()));
        }
    }

    pub fn push_status(&self, status: std::result::Result<BundleStatus, String>) {
        self.status_results.lock().push_back(status);
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleProvider for MockBundler {
    fn tip_accounts(&self) -> Vec<Pubkey> {
        self.tip_accounts.clone()
    }

    async fn submit_bundle(&self, transactions: &[VersionedTransaction]) -> Result<String> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(Err(message)) = self.submit_results.lock().pop_front() {
            return Err(anyhow!(message));
        }
        self.bundles.lock().push(transactions.to_vec());
        Ok(format!("bundle-{}", call))
    }

    async fn get_bundle_status(&self, _bundle_id: &str) -> Result<BundleStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.status_results.lock().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(BundleStatus {
                landed: true,
                error: None,
            }),
        }
    }
}

/// Balance refresher reporting a fixed 5 SOL for whoever asks
pub struct MockBalances {
    pub refreshes: AtomicUsize,
    pub balances: watch::Sender<WalletBalances>,
}

impl Default for MockBalances {
    fn default() -> Self {
        Self {
            refreshes: AtomicUsize::new(0),
            balances: watch::channel(WalletBalances::default()).0,
        }
    }
}

impl MockBalances {
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceRefresher for MockBalances {
    async fn refresh(&self, owner: &Pubkey) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.balances.send_replace(WalletBalances {
            owner: Some(*owner),
            lamports: 5_000_000_000,
            token_amount: 0,
        });
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<WalletBalances> {
        self.balances.subscribe()
    }
}

/// A client over mocks, with handles to every double
pub struct Harness {
    pub client: SwapExecutorClient,
    pub payer: Pubkey,
    pub keypair: Arc<Keypair>,
    pub quotes: Arc<MockQuotes>,
    pub fees: Arc<MockFees>,
    pub rpc: Arc<MockRpc>,
    pub bundler: Arc<MockBundler>,
    pub balances: Arc<MockBalances>,
}

impl Harness {
    pub fn new(config: ClientConfig) -> Self {
        let keypair = Keypair::new();
        let payer = keypair.pubkey();
        let signer = KeypairSigner::new(keypair.insecure_clone());

        let quotes = Arc::new(MockQuotes::default());
        let fees = Arc::new(MockFees::new(10_000));
        let rpc = Arc::new(MockRpc::default());
        let bundler = Arc::new(MockBundler::default());
        let balances = Arc::new(MockBalances::default());

        let client = SwapExecutorClient::new(
            config,
            Collaborators {
                quotes: quotes.clone(),
                fees: fees.clone(),
                rpc: rpc.clone(),
                bundler: Some(bundler.clone() as Arc<dyn BundleProvider>),
                signer: Arc::new(signer) as Arc<dyn RemoteSigner>,
                balances: Some(balances.clone() as Arc<dyn BalanceRefresher>),
            },
        );

        Self {
            client,
            payer,
            keypair: Arc::new(keypair),
            quotes,
            fees,
            rpc,
            bundler,
            balances,
        }
    }
}

/// Let spawned tasks run without moving the paused clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
