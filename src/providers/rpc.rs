//! Solana RPC provider
//!
//! One lazily created RPC connection and one lazily created pubsub connection
//! are shared by every operation of the executor.

use crate::config::ClientConfig;
use crate::providers::{ConfirmationResult, RpcProvider, TransactionStatus};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use solana_client::{
    nonblocking::{pubsub_client::PubsubClient, rpc_client::RpcClient},
    rpc_config::{RpcSendTransactionConfig, RpcSignatureSubscribeConfig, RpcSimulateTransactionConfig},
    rpc_response::RpcSignatureResult,
};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, signature::Signature,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

/// Compute units assumed when simulation fails or reports nothing
pub const DEFAULT_COMPUTE_UNITS: u64 = 200_000;

/// Shared Solana RPC + pubsub connection
pub struct SolanaRpc {
    rpc_url: String,
    ws_url: String,
    commitment: CommitmentConfig,
    /// Created on first use, never recreated
    client: OnceCell<Arc<RpcClient>>,
    /// Cached pubsub connection (reconnected if a subscription fails)
    pubsub: Mutex<Option<Arc<PubsubClient>>>,
}

impl SolanaRpc {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_urls(
            &config.shared.rpc_endpoint(),
            &config.shared.ws_endpoint(),
            config.shared.commitment(),
        )
    }

    pub fn with_urls(rpc_url: &str, ws_url: &str, commitment: CommitmentConfig) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            ws_url: ws_url.to_string(),
            commitment,
            client: OnceCell::new(),
            pubsub: Mutex::new(None),
        }
    }

    /// The shared RPC client
    pub async fn client(&self) -> Arc<RpcClient> {
        self.client
            .get_or_init(|| async {
                tracing::debug!(rpc_url = %redact(&self.rpc_url), "Opening RPC connection");
                Arc::new(RpcClient::new_with_commitment(
                    self.rpc_url.clone(),
                    self.commitment,
                ))
            })
            .await
            .clone()
    }

    async fn pubsub(&self) -> Result<Arc<PubsubClient>> {
        let mut pubsub_opt = self.pubsub.lock().await;

        if let Some(pubsub) = pubsub_opt.as_ref() {
            return Ok(Arc::clone(pubsub));
        }

        tracing::debug!(ws_url = %redact(&self.ws_url), "Opening pubsub connection");
        let pubsub = Arc::new(
            PubsubClient::new(&self.ws_url)
                .await
                .map_err(|e| anyhow!("Failed to connect to RPC websocket: {}", e))?,
        );
        *pubsub_opt = Some(Arc::clone(&pubsub));
        Ok(pubsub)
    }

    async fn drop_pubsub(&self) {
        self.pubsub.lock().await.take();
    }

    async fn wait_for_notification(
        &self,
        pubsub: &PubsubClient,
        signature: &Signature,
    ) -> Result<ConfirmationResult> {
        let config = RpcSignatureSubscribeConfig {
            commitment: Some(self.commitment),
            enable_received_notification: Some(false),
        };

        let (mut notifications, unsubscribe) = pubsub
            .signature_subscribe(signature, Some(config))
            .await
            .map_err(|e| anyhow!("Failed to subscribe to signature: {}", e))?;

        // The transaction may have landed before the subscription was registered
        let result = match self.get_status(signature).await {
            Ok(status) if status.landed => Ok(ConfirmationResult {
                confirmed: true,
                error: status.execution_error,
            }),
            _ => loop {
                match notifications.next().await {
                    Some(response) => match response.value {
                        RpcSignatureResult::ProcessedSignature(processed) => {
                            break Ok(ConfirmationResult {
                                confirmed: true,
                                error: processed.err.as_ref().map(describe_error),
                            });
                        }
                        RpcSignatureResult::ReceivedSignature(_) => continue,
                    },
                    None => break Err(anyhow!("Signature subscription closed")),
                }
            },
        };

        drop(notifications);
        unsubscribe().await;
        result
    }
}

#[async_trait]
impl RpcProvider for SolanaRpc {
    async fn latest_blockhash(&self) -> Result<Hash> {
        self.client()
            .await
            .get_latest_blockhash()
            .await
            .map_err(|e| anyhow!("Failed to get recent blockhash: {}", e))
    }

    async fn submit_raw(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };

        self.client()
            .await
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| anyhow!("Failed to send transaction: {}", e))
    }

    async fn get_status(&self, signature: &Signature) -> Result<TransactionStatus> {
        let statuses = self
            .client()
            .await
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| anyhow!("Failed to get signature status: {}", e))?;

        let status = match statuses.value.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(TransactionStatus::default()),
        };

        Ok(TransactionStatus {
            landed: status.satisfies_commitment(self.commitment),
            execution_error: status.err.as_ref().map(describe_error),
        })
    }

    async fn subscribe_to_status(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<ConfirmationResult> {
        let pubsub = self.pubsub().await?;

        match tokio::time::timeout(timeout, self.wait_for_notification(&pubsub, signature)).await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                // a broken websocket is rebuilt on the next subscription
                self.drop_pubsub().await;
                Err(e)
            }
            Err(_) => Ok(ConfirmationResult {
                confirmed: false,
                error: None,
            }),
        }
    }

    async fn simulate(&self, transaction: &VersionedTransaction) -> Result<u64> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(self.commitment),
            ..Default::default()
        };

        let simulation = self
            .client()
            .await
            .simulate_transaction_with_config(transaction, config)
            .await
            .map_err(|e| anyhow!("Failed to simulate transaction: {}", e))?;

        if let Some(err) = simulation.value.err.as_ref() {
            if let Some(logs) = simulation.value.logs.as_ref() {
                tracing::debug!(logs = ?logs, "Simulation logs");
            }
            return Err(anyhow!("Simulation failed: {}", describe_error(err)));
        }

        Ok(simulation
            .value
            .units_consumed
            .unwrap_or(DEFAULT_COMPUTE_UNITS))
    }
}

/// Raw JSON form of a runtime error, as the RPC reports it
fn describe_error<E: serde::Serialize + std::fmt::Debug>(err: &E) -> String {
    serde_json::to_string(err).unwrap_or_else(|_| format!("{:?}", err))
}

/// Hide query-string credentials (e.g. `?api-key=`) in logs
fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?<redacted>", base),
        None => url.to_string(),
    }
}
