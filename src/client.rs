use crate::cache::{FeeEstimatorCache, QuoteCache, TransactionTemplateCache};
use crate::config::{ClientConfig, FeeLevel, SwapSettings};
use crate::delivery::{
    select_path, DeliveryPath, DeliveryReceipt, DeliveryRequest, EngineSettings, SubmissionEngine,
};
use crate::error::SwapError;
use crate::providers::balances::{RpcBalanceRefresher, WalletBalances};
use crate::providers::fees::RpcPriorityFeeProvider;
use crate::providers::jito::JitoBundler;
use crate::providers::jupiter::JupiterQuoteProvider;
use crate::providers::rpc::{SolanaRpc, DEFAULT_COMPUTE_UNITS};
use crate::providers::signer::{sign_with, HttpRemoteSigner, KeypairSigner};
use crate::providers::{
    BalanceRefresher, BundleProvider, FeeProvider, QuoteProvider, RemoteSigner, RpcProvider,
};
use crate::quote::{from_base_units, to_base_units, Asset, QuoteRequest, QuoteSnapshot, USDC_MINT};
use crate::session::{ExecutionSlot, Notification, SessionStore, SwapPhase, SwapSnapshot};
use crate::transfer::TransferExecutor;
use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// External services the executor talks to
pub struct Collaborators {
    pub quotes: Arc<dyn QuoteProvider>,
    pub fees: Arc<dyn FeeProvider>,
    pub rpc: Arc<dyn RpcProvider>,
    /// Fast path bundler; without one the fast path degrades to the standard path
    pub bundler: Option<Arc<dyn BundleProvider>>,
    pub signer: Arc<dyn RemoteSigner>,
    pub balances: Option<Arc<dyn BalanceRefresher>>,
}

/// User input the next swap is built from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapForm {
    /// Connected wallet
    pub payer: Option<Pubkey>,
    pub input: Option<Asset>,
    pub output: Option<Asset>,
    /// Input amount in display units, as typed
    pub amount: String,
}

impl SwapForm {
    /// The quote question this form asks, if it is complete
    pub fn quote_request(&self, slippage_bps: u16) -> Option<QuoteRequest> {
        let input = self.input.as_ref()?;
        let output = self.output.as_ref()?;
        let amount = to_base_units(&self.amount, input.decimals).filter(|units| *units > 0)?;
        Some(QuoteRequest {
            input_mint: input.mint.clone(),
            output_mint: output.mint.clone(),
            amount,
            slippage_bps,
        })
    }
}

/// Everything an execution needs, captured before any I/O
struct ExecutionContext {
    payer: Pubkey,
    quote: QuoteSnapshot,
    settings: SwapSettings,
}

struct ClientInner {
    config: ClientConfig,
    settings: RwLock<SwapSettings>,
    form: Mutex<SwapForm>,
    quotes: QuoteCache,
    fees: FeeEstimatorCache,
    templates: TransactionTemplateCache,
    engine: SubmissionEngine,
    rpc: Arc<dyn RpcProvider>,
    signer: Arc<dyn RemoteSigner>,
    balances: Option<Arc<dyn BalanceRefresher>>,
    session: SessionStore,
    executing: ExecutionSlot,
    transfers: TransferExecutor,
}

/// Swap orchestrator: owns the caches, the session and the delivery engine
///
/// Cheap to clone; clones share one session. Background work (debounced
/// prefetch, template prebuild, auto-reset) is spawned on the current tokio
/// runtime, so methods that schedule it must run inside one.
#[derive(Clone)]
pub struct SwapExecutorClient {
    inner: Arc<ClientInner>,
}

impl SwapExecutorClient {
    /// Create a client from configuration and explicit collaborators
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Self {
        let timing = &config.timing;
        let engine_settings = EngineSettings::from_config(&config);

        let transfers = TransferExecutor::new(
            Arc::clone(&collaborators.rpc),
            Arc::clone(&collaborators.signer),
            collaborators.balances.clone(),
            engine_settings.clone(),
            timing.success_reset(),
        );

        let inner = ClientInner {
            settings: RwLock::new(config.swap.clone()),
            form: Mutex::new(SwapForm::default()),
            quotes: QuoteCache::new(
                Arc::clone(&collaborators.quotes),
                timing.quote_retry_policy(),
            ),
            fees: FeeEstimatorCache::new(Arc::clone(&collaborators.fees), timing.fee_ttl()),
            templates: TransactionTemplateCache::new(
                Arc::clone(&collaborators.quotes),
                timing.template_ttl(),
            ),
            engine: SubmissionEngine::new(
                Arc::clone(&collaborators.rpc),
                collaborators.bundler.clone(),
                Arc::clone(&collaborators.signer),
                engine_settings,
            ),
            rpc: collaborators.rpc,
            signer: collaborators.signer,
            balances: collaborators.balances,
            session: SessionStore::new(),
            executing: ExecutionSlot::default(),
            transfers,
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create a client wired to Jupiter, Solana RPC, Jito and the configured signer
    ///
    /// One RPC connection is shared by submission, confirmation, simulation
    /// and balance refresh. With no remote signer endpoint the wallet keypair
    /// signs locally and is connected as the payer.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let rpc = Arc::new(SolanaRpc::new(&config));
        let quotes = Arc::new(JupiterQuoteProvider::new(&config)?);
        let fees = Arc::new(RpcPriorityFeeProvider::new(&config)?);
        let bundler: Option<Arc<dyn BundleProvider>> = match JitoBundler::new(&config) {
            Ok(bundler) => Some(Arc::new(bundler)),
            Err(e) => {
                tracing::warn!(error = %e, "Jito bundler unavailable, fast path disabled");
                None
            }
        };

        let (signer, local_payer): (Arc<dyn RemoteSigner>, Option<Pubkey>) =
            match config.signer.endpoint.as_ref().filter(|e| !e.is_empty()) {
                Some(_) => (Arc::new(HttpRemoteSigner::new(&config)?), None),
                None => {
                    let signer = KeypairSigner::from_config(&config)?;
                    let payer = signer.pubkey();
                    (Arc::new(signer), Some(payer))
                }
            };

        let usdc = Pubkey::from_str(USDC_MINT).map_err(|e| anyhow!("Invalid USDC mint: {}", e))?;
        let balances: Arc<dyn BalanceRefresher> =
            Arc::new(RpcBalanceRefresher::new(Arc::clone(&rpc), usdc));

        let client = Self::new(
            config,
            Collaborators {
                quotes,
                fees,
                rpc,
                bundler,
                signer,
                balances: Some(balances),
            },
        );
        if let Some(payer) = local_payer {
            client.inner.form.lock().payer = Some(payer);
        }
        Ok(client)
    }

    /// Create a client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = ClientConfig::from_env()?;
        Self::from_config(config)
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> SwapSettings {
        self.inner.settings.read().clone()
    }

    pub fn form(&self) -> SwapForm {
        self.inner.form.lock().clone()
    }

    pub fn snapshot(&self) -> SwapSnapshot {
        self.inner.session.snapshot()
    }

    /// Session snapshots, latest value always available
    pub fn subscribe(&self) -> watch::Receiver<SwapSnapshot> {
        self.inner.session.subscribe()
    }

    /// Transient notices (loading, success, error, info)
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.session.notifications()
    }

    /// Latest wallet balances, refreshed after every landed swap or transfer
    ///
    /// `None` when the client was built without a balance refresher.
    pub fn balances(&self) -> Option<WalletBalances> {
        let balances = self.inner.balances.as_ref()?.subscribe();
        let current = balances.borrow().clone();
        Some(current)
    }

    pub fn subscribe_balances(&self) -> Option<watch::Receiver<WalletBalances>> {
        self.inner.balances.as_ref().map(|balances| balances.subscribe())
    }

    /// Transfer flow sharing this client's signer and RPC connection
    pub fn transfers(&self) -> &TransferExecutor {
        &self.inner.transfers
    }

    pub fn connect_wallet(&self, payer: Pubkey) {
        self.inner.form.lock().payer = Some(payer);
        tracing::info!(payer = %payer, "Wallet connected");
        self.schedule_prefetch();
    }

    pub fn disconnect_wallet(&self) {
        self.inner.form.lock().payer = None;
        self.inner.templates.clear();
    }

    pub fn set_input_asset(&self, asset: Asset) {
        self.inner.form.lock().input = Some(asset);
        self.schedule_prefetch();
    }

    pub fn set_output_asset(&self, asset: Asset) {
        self.inner.form.lock().output = Some(asset);
        self.schedule_prefetch();
    }

    /// Update the typed amount; a quote follows after the debounce window
    pub fn set_amount(&self, amount: &str) {
        self.inner.form.lock().amount = amount.to_string();
        self.schedule_prefetch();
    }

    /// Flip input and output assets
    ///
    /// The quoted output amount becomes the new input amount; without a quote
    /// the amount is cleared.
    pub fn swap_assets(&self) {
        let quoted_output = self
            .inner
            .quotes
            .current()
            .map(|snapshot| snapshot.quote.out_amount);
        {
            let mut form = self.inner.form.lock();
            let form = &mut *form;
            std::mem::swap(&mut form.input, &mut form.output);
            form.amount = match (quoted_output, form.input.as_ref()) {
                (Some(amount), Some(input)) => from_base_units(amount, input.decimals),
                _ => String::new(),
            };
        }
        self.discard_quote();
        self.schedule_prefetch();
    }

    /// Replace the swap settings
    ///
    /// A slippage change asks a new quote question; a fee level change
    /// refreshes the fee estimate.
    pub fn update_settings(&self, settings: SwapSettings) {
        let previous = std::mem::replace(&mut *self.inner.settings.write(), settings.clone());

        if previous.slippage_bps() != settings.slippage_bps() {
            self.schedule_prefetch();
        }
        if previous.priority_fee != settings.priority_fee {
            if let Some(accounts) = self.fee_accounts() {
                self.spawn_fee_refresh(settings.priority_fee, accounts);
            }
        }
    }

    /// Fetch a quote for the current form right away, without debounce
    ///
    /// Returns `Ok(None)` when a newer request superseded this one.
    pub async fn fetch_quote(&self) -> Result<Option<QuoteSnapshot>, SwapError> {
        let request = self
            .current_request()
            .ok_or_else(|| SwapError::Precondition("select both tokens and enter an amount".to_string()))?;
        let token = self.inner.quotes.begin();
        self.fetch_and_publish(request, token).await
    }

    /// Check everything an execution needs. No I/O, no state change.
    pub fn check_preconditions(&self) -> Result<(), SwapError> {
        self.execution_context().map(|_| ())
    }

    /// Build, sign, deliver and confirm a swap of the current quote
    ///
    /// Every failure resolves to a session transition: provider rejections
    /// return to idle and refetch, everything else lands in `error`.
    pub async fn execute_swap(&self) -> Result<DeliveryReceipt, SwapError> {
        let ctx = match self.execution_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::debug!(error = %e, "Swap preconditions not met");
                self.inner.session.notify(Notification::Error(
                    "Missing requirements for swap".to_string(),
                ));
                return Err(e);
            }
        };

        let _permit = self.inner.executing.try_acquire().ok_or_else(|| {
            SwapError::Precondition("a swap is already in progress".to_string())
        })?;

        let session = &self.inner.session;
        let generation = session.begin_attempt();
        session.set_phase(SwapPhase::BuildingTransaction);
        session.notify(Notification::Loading("Building transaction...".to_string()));

        let started = Instant::now();
        match self.run_execution(&ctx).await {
            Ok(receipt) => {
                tracing::info!(
                    signature = %receipt.signature,
                    path = ?receipt.path,
                    bundle_id = ?receipt.bundle_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Swap confirmed"
                );
                session.set_phase(SwapPhase::Success);
                let via = match receipt.path {
                    DeliveryPath::FastPath => " (via Jito)",
                    DeliveryPath::Standard => "",
                };
                session.notify(Notification::Success(format!(
                    "Swap completed successfully!{}",
                    via
                )));
                self.refresh_balances(ctx.payer);
                self.schedule_reset(generation);
                Ok(receipt)
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "Quote or build rejected, refetching quote");
                session.update(|snapshot| {
                    snapshot.phase = SwapPhase::Idle;
                    snapshot.error = None;
                });
                session.notify(Notification::Info(
                    "Quote expired or Jupiter error. Refetching quote...".to_string(),
                ));
                self.schedule_refetch();
                Err(e)
            }
            Err(e) => {
                session.fail(&e.to_string());
                Err(e)
            }
        }
    }

    /// Cancel pending work and return to a blank idle session
    pub fn reset(&self) {
        self.clear_swap_inputs();
        self.inner.session.reset();
    }

    fn clear_swap_inputs(&self) {
        self.inner.quotes.clear();
        self.inner.templates.clear();
        self.inner.form.lock().amount.clear();
    }

    async fn run_execution(&self, ctx: &ExecutionContext) -> Result<DeliveryReceipt, SwapError> {
        let inner = &self.inner;

        let fee = inner.fees.best_available(ctx.settings.priority_fee);
        let template = inner
            .templates
            .template_for_execution(&ctx.quote, ctx.payer, fee)
            .await?;

        match inner.rpc.simulate(&template.transaction).await {
            Ok(units) => tracing::debug!(units, "Simulation passed"),
            Err(e) => tracing::warn!(
                error = %e,
                default_units = DEFAULT_COMPUTE_UNITS,
                "Simulation failed, proceeding with default compute budget"
            ),
        }

        inner.session.set_phase(SwapPhase::Signing);
        inner
            .session
            .notify(Notification::Loading("Signing transaction...".to_string()));
        let (signed, account) =
            sign_with(inner.signer.as_ref(), &template.transaction, &ctx.payer).await?;
        tracing::info!(signature = %signed.signature, "Transaction signed");

        let tip_lamports = ctx.settings.fast_path_tip_lamports();
        let path = select_path(ctx.settings.enable_fast_path, tip_lamports);
        tracing::info!(path = ?path, tip_lamports, "Delivering transaction");

        inner
            .engine
            .deliver(
                DeliveryRequest {
                    signed: &signed,
                    account: &account,
                    payer: ctx.payer,
                    path,
                    tip_lamports,
                },
                &inner.session,
            )
            .await
    }

    fn execution_context(&self) -> Result<ExecutionContext, SwapError> {
        let settings = self.settings();
        let form = self.form();

        let payer = form
            .payer
            .ok_or_else(|| SwapError::Precondition("wallet not connected".to_string()))?;
        if form.input.is_none() || form.output.is_none() {
            return Err(SwapError::Precondition("select both tokens".to_string()));
        }
        let request = form
            .quote_request(settings.slippage_bps())
            .ok_or_else(|| SwapError::Precondition("enter an amount".to_string()))?;
        let entry = self
            .inner
            .quotes
            .current_entry()
            .ok_or_else(|| SwapError::Precondition("no quote available".to_string()))?;
        if entry.key_fingerprint != request {
            return Err(SwapError::Precondition(
                "quote does not match the current input".to_string(),
            ));
        }

        Ok(ExecutionContext {
            payer,
            quote: entry.value,
            settings,
        })
    }

    fn current_request(&self) -> Option<QuoteRequest> {
        let slippage_bps = self.inner.settings.read().slippage_bps();
        self.inner.form.lock().quote_request(slippage_bps)
    }

    fn fee_accounts(&self) -> Option<Vec<String>> {
        let form = self.inner.form.lock();
        match (form.input.as_ref(), form.output.as_ref()) {
            (Some(input), Some(output)) => Some(vec![input.mint.clone(), output.mint.clone()]),
            _ => None,
        }
    }

    /// Cancel the pending prefetch and start a debounced one for the current form
    fn schedule_prefetch(&self) {
        let token = self.inner.quotes.begin();
        let request = match self.current_request() {
            Some(request) => request,
            None => {
                token.cancel();
                self.discard_quote();
                return;
            }
        };

        let client = self.clone();
        let debounce = self.inner.config.timing.quote_debounce();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }
            // failures are already on the session
            let _ = client.fetch_and_publish(request, token).await;
        });
    }

    /// Fetch and publish a quote, then schedule the template prebuild
    ///
    /// The fee estimate refreshes alongside in its own task; the quote is
    /// published as soon as it arrives.
    async fn fetch_and_publish(
        &self,
        request: QuoteRequest,
        token: CancellationToken,
    ) -> Result<Option<QuoteSnapshot>, SwapError> {
        let inner = &self.inner;
        let level = inner.settings.read().priority_fee;
        let accounts = vec![request.input_mint.clone(), request.output_mint.clone()];

        self.set_quote_phase(SwapPhase::FetchingQuote);
        if inner.fees.fresh(level).is_none() {
            self.spawn_fee_refresh(level, accounts);
        }

        match inner.quotes.fetch(&request, &token).await {
            Ok(Some(snapshot)) => {
                let decimals = inner.form.lock().output.as_ref().map(|asset| asset.decimals);
                inner.session.update(|s| {
                    s.output_estimate = decimals.map(|d| snapshot.quote.output_estimate(d));
                    s.quote = Some(snapshot.clone());
                    if !s.phase.is_executing() && s.phase != SwapPhase::Success {
                        s.phase = SwapPhase::Idle;
                        s.error = None;
                    }
                });
                self.schedule_prebuild(snapshot.clone());
                Ok(Some(snapshot))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                if inner.executing.is_busy() {
                    tracing::warn!(error = %e, "Quote refresh failed during execution");
                } else {
                    inner.session.fail(&e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Prebuild once the quote has settled, unless it was superseded meanwhile
    fn schedule_prebuild(&self, snapshot: QuoteSnapshot) {
        let payer = match self.inner.form.lock().payer {
            Some(payer) => payer,
            None => return,
        };
        let client = self.clone();
        let settle = self.inner.config.timing.template_settle();
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let inner = &client.inner;
            if !inner.quotes.is_current(snapshot.id) {
                tracing::debug!(quote_id = snapshot.id.0, "Quote superseded before prebuild");
                return;
            }
            let fee = inner.fees.best_available(inner.settings.read().priority_fee);
            inner.templates.prebuild(&snapshot, payer, fee).await;
        });
    }

    fn spawn_fee_refresh(&self, level: FeeLevel, accounts: Vec<String>) {
        let client = self.clone();
        tokio::spawn(async move {
            client.inner.fees.estimate_fee(level, &accounts).await;
        });
    }

    fn schedule_refetch(&self) {
        let client = self.clone();
        let delay = self.inner.config.timing.recovery_refetch();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = client.fetch_quote().await {
                tracing::debug!(error = %e, "Recovery refetch did not produce a quote");
            }
        });
    }

    fn schedule_reset(&self, generation: u64) {
        let client = self.clone();
        let delay = self.inner.config.timing.success_reset();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if client.inner.session.reset_if_current(generation) {
                client.clear_swap_inputs();
            }
        });
    }

    /// Fire-and-forget; failures are logged
    fn refresh_balances(&self, owner: Pubkey) {
        if let Some(balances) = self.inner.balances.as_ref().map(Arc::clone) {
            tokio::spawn(async move {
                match balances.refresh(&owner).await {
                    Ok(()) => tracing::debug!(owner = %owner, "Balances refreshed"),
                    Err(e) => tracing::warn!(owner = %owner, error = %e, "Balance refresh failed"),
                }
            });
        }
    }

    fn set_quote_phase(&self, phase: SwapPhase) {
        self.inner.session.update(|s| {
            if !s.phase.is_executing() && s.phase != SwapPhase::Success {
                s.phase = phase;
            }
        });
    }

    fn discard_quote(&self) {
        self.inner.quotes.clear();
        self.inner.session.update(|s| {
            s.quote = None;
            s.output_estimate = None;
            if s.phase == SwapPhase::FetchingQuote {
                s.phase = SwapPhase::Idle;
            }
        });
    }
}
