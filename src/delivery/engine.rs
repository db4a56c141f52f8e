//! Dual-path submission and confirmation
//!
//! The primary transaction is signed exactly once, before delivery starts. Its
//! first signature identifies it on both paths, so a bundle that fails after
//! signing can still be confirmed (or resubmitted) by that signature.

use crate::config::{explorer_link, ClientConfig};
use crate::delivery::tip::{build_tip_transaction, choose_tip_account};
use crate::delivery::DeliveryPath;
use crate::error::SwapError;
use crate::providers::signer::{sign_with_account, SignedTransaction};
use crate::providers::{
    BundleProvider, ConfirmationResult, RemoteSigner, RpcProvider, SignerAccount, TransactionStatus,
};
use crate::retry::{self, RetryError, RetryPolicy};
use crate::session::{Notification, ProgressSink, SwapPhase};
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Timing and attempt bounds of the delivery paths
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub confirmation_timeout: Duration,
    pub bundle_submit_policy: RetryPolicy,
    pub bundle_poll_policy: RetryPolicy,
    /// Explorer base used in timeout messages
    pub explorer_url: String,
}

impl EngineSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            confirmation_timeout: config.timing.confirmation_timeout(),
            bundle_submit_policy: config.timing.bundle_submit_policy(),
            bundle_poll_policy: config.timing.bundle_poll_policy(),
            explorer_url: config.shared.explorer_url.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// One delivery of an already signed transaction
pub struct DeliveryRequest<'a> {
    pub signed: &'a SignedTransaction,
    /// Signer account that signed `signed`; also signs the tip
    pub account: &'a SignerAccount,
    pub payer: Pubkey,
    pub path: DeliveryPath,
    pub tip_lamports: u64,
}

/// A landed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub signature: Signature,
    /// Path that actually carried the transaction
    pub path: DeliveryPath,
    pub bundle_id: Option<String>,
}

/// Outcome of one bundle status poll
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundlePollError {
    #[error("Bundle not landed yet")]
    Pending,

    #[error("Jito rate limited: {0}")]
    RateLimited(String),

    #[error("Jito bundle failed: {0}")]
    Failed(String),
}

impl BundlePollError {
    /// Rate-limit errors contain a 429 marker; anything else the bundler reports is final
    pub fn classify(message: String) -> Self {
        if message.contains("429") {
            BundlePollError::RateLimited(message)
        } else {
            BundlePollError::Failed(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BundlePollError::Pending | BundlePollError::RateLimited(_))
    }
}

/// Delivers signed transactions over the standard or fast path
pub struct SubmissionEngine {
    rpc: Arc<dyn RpcProvider>,
    bundler: Option<Arc<dyn BundleProvider>>,
    signer: Arc<dyn RemoteSigner>,
    settings: EngineSettings,
}

impl SubmissionEngine {
    pub fn new(
        rpc: Arc<dyn RpcProvider>,
        bundler: Option<Arc<dyn BundleProvider>>,
        signer: Arc<dyn RemoteSigner>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            rpc,
            bundler,
            signer,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Deliver and confirm `request.signed`
    ///
    /// Succeeds only when the transaction landed without an execution error.
    pub async fn deliver(
        &self,
        request: DeliveryRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<DeliveryReceipt, SwapError> {
        match (request.path, self.bundler.as_ref()) {
            (DeliveryPath::FastPath, Some(bundler)) => {
                self.deliver_fast(bundler.as_ref(), &request, progress).await
            }
            (DeliveryPath::FastPath, None) => {
                tracing::warn!("Fast path requested but no bundler configured, using standard path");
                self.deliver_standard(request.signed, progress).await
            }
            (DeliveryPath::Standard, _) => self.deliver_standard(request.signed, progress).await,
        }
    }

    /// Submit once, then wait for the push confirmation
    pub async fn deliver_standard(
        &self,
        signed: &SignedTransaction,
        progress: &dyn ProgressSink,
    ) -> Result<DeliveryReceipt, SwapError> {
        progress.phase(SwapPhase::Submitting);
        progress.notify(Notification::Loading("Submitting transaction...".to_string()));

        let returned = self
            .rpc
            .submit_raw(&signed.transaction)
            .await
            .map_err(|e| SwapError::SubmissionFailed(e.to_string()))?;
        if returned != signed.signature {
            tracing::warn!(
                signature = %signed.signature,
                returned = %returned,
                "RPC returned a different signature, tracking the signed one"
            );
        }

        tracing::info!(signature = %signed.signature, "Transaction submitted via RPC");
        progress.signature(&signed.signature, DeliveryPath::Standard);

        self.confirm_by_subscription(&signed.signature, progress)
            .await?;

        Ok(DeliveryReceipt {
            signature: signed.signature,
            path: DeliveryPath::Standard,
            bundle_id: None,
        })
    }

    async fn deliver_fast(
        &self,
        bundler: &dyn BundleProvider,
        request: &DeliveryRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<DeliveryReceipt, SwapError> {
        let signed = request.signed;
        progress.phase(SwapPhase::Submitting);
        progress.notify(Notification::Loading(
            "Submitting via Jito bundle...".to_string(),
        ));

        let tip = match self.signed_tip(bundler, request).await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!(error = %e, "Tip transaction unavailable, falling back to RPC");
                progress.notify(Notification::Loading(
                    "Jito unavailable, using RPC...".to_string(),
                ));
                return self.deliver_standard(signed, progress).await;
            }
        };

        let bundle = [signed.transaction.clone(), tip];
        let submitted = retry::retry(
            "bundle submit",
            &self.settings.bundle_submit_policy,
            retry::always,
            |attempt| {
                tracing::debug!(attempt, signature = %signed.signature, "Sending bundle");
                bundler.submit_bundle(&bundle)
            },
        )
        .await;

        let bundle_id = match submitted {
            Ok(bundle_id) => bundle_id,
            Err(e) => {
                // the tip is discarded; the primary goes out exactly as signed
                tracing::warn!(error = %e, "Bundle submission failed, falling back to RPC");
                progress.notify(Notification::Loading(
                    "Jito unavailable, using RPC...".to_string(),
                ));
                return self.deliver_standard(signed, progress).await;
            }
        };

        tracing::info!(bundle_id = %bundle_id, signature = %signed.signature, "Bundle submitted");
        progress.signature(&signed.signature, DeliveryPath::FastPath);
        progress.phase(SwapPhase::Confirming);
        progress.notify(Notification::Loading(
            "Confirming Jito bundle...".to_string(),
        ));

        match self.poll_bundle(bundler, &bundle_id).await {
            Ok(()) => self.verify_landed(&signed.signature, progress).await?,
            Err(RetryError::Fatal(e)) => {
                return Err(SwapError::SubmissionFailed(e.to_string()));
            }
            Err(RetryError::Exhausted { last, .. }) => {
                tracing::warn!(
                    bundle_id = %bundle_id,
                    last = %last,
                    "Bundle status unknown, confirming by signature"
                );
                progress.notify(Notification::Loading(
                    "Confirming transaction via RPC...".to_string(),
                ));
                self.confirm_by_subscription(&signed.signature, progress)
                    .await?;
            }
        }

        Ok(DeliveryReceipt {
            signature: signed.signature,
            path: DeliveryPath::FastPath,
            bundle_id: Some(bundle_id),
        })
    }

    async fn signed_tip(
        &self,
        bundler: &dyn BundleProvider,
        request: &DeliveryRequest<'_>,
    ) -> Result<VersionedTransaction, SwapError> {
        let tip_account = choose_tip_account(&bundler.tip_accounts()).ok_or_else(|| {
            SwapError::SubmissionFailed("No Jito tip accounts available".to_string())
        })?;
        let blockhash = self
            .rpc
            .latest_blockhash()
            .await
            .map_err(|e| SwapError::SubmissionFailed(e.to_string()))?;

        let unsigned = build_tip_transaction(
            &request.payer,
            &tip_account,
            request.tip_lamports,
            blockhash,
        )
        .map_err(|e| SwapError::SubmissionFailed(e.to_string()))?;

        tracing::debug!(
            tip_account = %tip_account,
            tip_lamports = request.tip_lamports,
            "Signing tip transaction"
        );
        let tip = sign_with_account(self.signer.as_ref(), &unsigned, request.account).await?;
        Ok(tip.transaction)
    }

    async fn poll_bundle(
        &self,
        bundler: &dyn BundleProvider,
        bundle_id: &str,
    ) -> Result<(), RetryError<BundlePollError>> {
        retry::retry(
            "bundle status",
            &self.settings.bundle_poll_policy,
            BundlePollError::is_retryable,
            |attempt| async move {
                tracing::debug!(attempt, bundle_id, "Polling bundle status");
                let status = bundler
                    .get_bundle_status(bundle_id)
                    .await
                    .map_err(|e| BundlePollError::classify(e.to_string()))?;

                match status.error {
                    Some(error) => Err(BundlePollError::classify(error)),
                    None if status.landed => Ok(()),
                    None => Err(BundlePollError::Pending),
                }
            },
        )
        .await
    }

    /// The bundle landed; make sure the primary did not fail on-chain
    async fn verify_landed(
        &self,
        signature: &Signature,
        progress: &dyn ProgressSink,
    ) -> Result<(), SwapError> {
        match self.rpc.get_status(signature).await {
            Ok(TransactionStatus {
                execution_error: Some(error),
                ..
            }) => Err(SwapError::OnChainExecution {
                signature: signature.to_string(),
                error,
            }),
            Ok(status) if status.landed => {
                tracing::info!(signature = %signature, "Bundle confirmed");
                Ok(())
            }
            Ok(_) => self.confirm_by_subscription(signature, progress).await,
            Err(e) => {
                tracing::debug!(error = %e, "Status check failed, confirming by subscription");
                self.confirm_by_subscription(signature, progress).await
            }
        }
    }

    /// Wait for a landing notification, never longer than the confirmation timeout
    async fn confirm_by_subscription(
        &self,
        signature: &Signature,
        progress: &dyn ProgressSink,
    ) -> Result<(), SwapError> {
        progress.phase(SwapPhase::Confirming);
        let timeout = self.settings.confirmation_timeout;
        tracing::info!(
            signature = %signature,
            timeout_secs = timeout.as_secs(),
            "Waiting for confirmation"
        );

        let outcome =
            tokio::time::timeout(timeout, self.rpc.subscribe_to_status(signature, timeout)).await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                // status is unknown, ask once before giving up
                tracing::warn!(signature = %signature, error = %e, "Confirmation subscription failed");
                match self.rpc.get_status(signature).await {
                    Ok(status) if status.landed => ConfirmationResult {
                        confirmed: true,
                        error: status.execution_error,
                    },
                    _ => return Err(self.timeout_error(signature)),
                }
            }
            Err(_) => return Err(self.timeout_error(signature)),
        };

        match result {
            ConfirmationResult {
                confirmed: true,
                error: None,
            } => {
                tracing::info!(signature = %signature, "Transaction confirmed");
                Ok(())
            }
            ConfirmationResult {
                confirmed: true,
                error: Some(error),
            } => Err(SwapError::OnChainExecution {
                signature: signature.to_string(),
                error,
            }),
            ConfirmationResult {
                confirmed: false, ..
            } => Err(self.timeout_error(signature)),
        }
    }

    fn timeout_error(&self, signature: &Signature) -> SwapError {
        let signature = signature.to_string();
        tracing::warn!(
            signature = %signature,
            "No confirmation in time, transaction may still land"
        );
        SwapError::ConfirmationTimeout {
            explorer_url: explorer_link(&self.settings.explorer_url, &signature),
            signature,
            timeout_secs: self.settings.confirmation_timeout.as_secs(),
        }
    }
}
