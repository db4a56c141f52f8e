//! SOL and SPL token transfers
//!
//! Transfers share the signer, RPC connection and standard delivery path with
//! swaps but run their own session, so a transfer never disturbs swap state.

use crate::delivery::{EngineSettings, SubmissionEngine};
use crate::error::SwapError;
use crate::providers::signer::sign_with;
use crate::providers::{BalanceRefresher, RemoteSigner, RpcProvider};
use crate::quote::{from_base_units, to_base_units};
use crate::session::{ExecutionSlot, Notification, SessionStore, SwapPhase, SwapSnapshot};
use solana_sdk::{
    instruction::Instruction, message::Message, pubkey::Pubkey, signature::Signature,
    system_instruction, transaction::Transaction, transaction::VersionedTransaction,
};
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const USDC_MINT_PUBKEY: Pubkey = solana_sdk::pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

/// What is being sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferAsset {
    Sol,
    /// SPL token moved between associated token accounts
    Token {
        mint: Pubkey,
        symbol: String,
        decimals: u8,
    },
}

impl TransferAsset {
    pub fn usdc() -> Self {
        TransferAsset::Token {
            mint: USDC_MINT_PUBKEY,
            symbol: "USDC".to_string(),
            decimals: 6,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            TransferAsset::Sol => 9,
            TransferAsset::Token { decimals, .. } => *decimals,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            TransferAsset::Sol => "SOL",
            TransferAsset::Token { symbol, .. } => symbol,
        }
    }
}

/// A transfer that passed its preconditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub from: Pubkey,
    pub recipient: Pubkey,
    /// Amount in base units
    pub amount: u64,
    pub asset: TransferAsset,
}

/// Validate transfer inputs without any I/O
pub fn plan_transfer(
    from: Option<Pubkey>,
    recipient: &str,
    amount: &str,
    asset: TransferAsset,
) -> Result<TransferPlan, SwapError> {
    let from = from.ok_or_else(|| SwapError::Precondition("wallet not connected".to_string()))?;
    let recipient = Pubkey::from_str(recipient.trim()).map_err(|_| {
        SwapError::Precondition(format!("invalid recipient address '{}'", recipient.trim()))
    })?;
    let amount = to_base_units(amount, asset.decimals())
        .filter(|units| *units > 0)
        .ok_or_else(|| SwapError::Precondition("amount must be positive".to_string()))?;

    Ok(TransferPlan {
        from,
        recipient,
        amount,
        asset,
    })
}

/// The instruction moving `plan.amount` from sender to recipient
pub fn transfer_instruction(plan: &TransferPlan) -> Result<Instruction, SwapError> {
    match &plan.asset {
        TransferAsset::Sol => Ok(system_instruction::transfer(
            &plan.from,
            &plan.recipient,
            plan.amount,
        )),
        TransferAsset::Token { mint, .. } => {
            let source = get_associated_token_address(&plan.from, mint);
            let destination = get_associated_token_address(&plan.recipient, mint);
            spl_token::instruction::transfer(
                &spl_token::id(),
                &source,
                &destination,
                &plan.from,
                &[],
                plan.amount,
            )
            .map_err(|e| {
                SwapError::SubmissionFailed(format!("Failed to build transfer instruction: {}", e))
            })
        }
    }
}

fn short_address(address: &Pubkey) -> String {
    let address = address.to_string();
    format!("{}...{}", &address[..4], &address[address.len() - 4..])
}

/// Executes transfers, one at a time
pub struct TransferExecutor {
    rpc: Arc<dyn RpcProvider>,
    signer: Arc<dyn RemoteSigner>,
    balances: Option<Arc<dyn BalanceRefresher>>,
    engine: SubmissionEngine,
    session: Arc<SessionStore>,
    success_reset: Duration,
    executing: ExecutionSlot,
}

impl TransferExecutor {
    pub fn new(
        rpc: Arc<dyn RpcProvider>,
        signer: Arc<dyn RemoteSigner>,
        balances: Option<Arc<dyn BalanceRefresher>>,
        settings: EngineSettings,
        success_reset: Duration,
    ) -> Self {
        let engine = SubmissionEngine::new(Arc::clone(&rpc), None, Arc::clone(&signer), settings);
        Self {
            rpc,
            signer,
            balances,
            engine,
            session: Arc::new(SessionStore::new()),
            success_reset,
            executing: ExecutionSlot::default(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SwapSnapshot> {
        self.session.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.session.notifications()
    }

    pub fn snapshot(&self) -> SwapSnapshot {
        self.session.snapshot()
    }

    /// Send `amount` (display units) of `asset` from `from` to `recipient`
    ///
    /// Failed preconditions are reported without touching the session.
    pub async fn execute(
        &self,
        from: Option<Pubkey>,
        recipient: &str,
        amount: &str,
        asset: TransferAsset,
    ) -> Result<Signature, SwapError> {
        let plan = match plan_transfer(from, recipient, amount, asset) {
            Ok(plan) => plan,
            Err(e) => {
                self.session.notify(Notification::Error(e.to_string()));
                return Err(e);
            }
        };

        let _permit = self.executing.try_acquire().ok_or_else(|| {
            SwapError::Precondition("a transfer is already in progress".to_string())
        })?;
        self.run(&plan).await
    }

    async fn run(&self, plan: &TransferPlan) -> Result<Signature, SwapError> {
        let generation = self.session.begin_attempt();
        self.session.set_phase(SwapPhase::BuildingTransaction);
        self.session
            .notify(Notification::Loading("Building transfer...".to_string()));

        match self.build_sign_deliver(plan).await {
            Ok(signature) => {
                tracing::info!(
                    signature = %signature,
                    amount = plan.amount,
                    asset = plan.asset.symbol(),
                    recipient = %plan.recipient,
                    "Transfer confirmed"
                );
                self.session.set_phase(SwapPhase::Success);
                self.session.notify(Notification::Success(format!(
                    "Successfully sent {} {} to {}",
                    from_base_units(plan.amount, plan.asset.decimals()),
                    plan.asset.symbol(),
                    short_address(&plan.recipient)
                )));
                self.refresh_balances(plan.from);
                self.schedule_reset(generation);
                Ok(signature)
            }
            Err(e) => {
                self.session.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn build_sign_deliver(&self, plan: &TransferPlan) -> Result<Signature, SwapError> {
        let instruction = transfer_instruction(plan)?;
        let blockhash = self
            .rpc
            .latest_blockhash()
            .await
            .map_err(|e| SwapError::SubmissionFailed(e.to_string()))?;

        let message = Message::new_with_blockhash(&[instruction], Some(&plan.from), &blockhash);
        let unsigned = VersionedTransaction::from(Transaction::new_unsigned(message));

        self.session.set_phase(SwapPhase::Signing);
        self.session
            .notify(Notification::Loading("Signing transfer...".to_string()));
        let (signed, _account) = sign_with(self.signer.as_ref(), &unsigned, &plan.from).await?;

        let receipt = self
            .engine
            .deliver_standard(&signed, self.session.as_ref())
            .await?;
        Ok(receipt.signature)
    }

    fn refresh_balances(&self, owner: Pubkey) {
        if let Some(balances) = self.balances.as_ref().map(Arc::clone) {
            tokio::spawn(async move {
                if let Err(e) = balances.refresh(&owner).await {
                    tracing::warn!(error = %e, "Balance refresh failed");
                }
            });
        }
    }

    fn schedule_reset(&self, generation: u64) {
        let session = Arc::clone(&self.session);
        let delay = self.success_reset;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.reset_if_current(generation);
        });
    }
}
