//! Wallet balance refresh over the shared RPC connection

use crate::providers::rpc::SolanaRpc;
use crate::providers::BalanceRefresher;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::sync::Arc;
use tokio::sync::watch;

/// Latest known balances of the connected wallet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletBalances {
    pub owner: Option<Pubkey>,
    pub lamports: u64,
    /// Balance of the tracked token, in base units
    pub token_amount: u64,
}

/// Reads SOL and one SPL token balance and publishes them on a watch channel
pub struct RpcBalanceRefresher {
    rpc: Arc<SolanaRpc>,
    token_mint: Pubkey,
    balances: watch::Sender<WalletBalances>,
}

impl RpcBalanceRefresher {
    pub fn new(rpc: Arc<SolanaRpc>, token_mint: Pubkey) -> Self {
        let (balances, _) = watch::channel(WalletBalances::default());
        Self {
            rpc,
            token_mint,
            balances,
        }
    }
}

#[async_trait]
impl BalanceRefresher for RpcBalanceRefresher {
    async fn refresh(&self, owner: &Pubkey) -> Result<()> {
        let client = self.rpc.client().await;

        let lamports = client
            .get_balance(owner)
            .await
            .map_err(|e| anyhow!("Failed to get SOL balance: {}", e))?;

        let ata = get_associated_token_address(owner, &self.token_mint);
        // a missing token account is a zero balance
        let token_amount = match client.get_token_account_balance(&ata).await {
            Ok(balance) => balance.amount.parse::<u64>().unwrap_or(0),
            Err(e) => {
                tracing::debug!(account = %ata, error = %e, "Token account balance unavailable");
                0
            }
        };

        tracing::debug!(owner = %owner, lamports, token_amount, "Balances refreshed");
        self.balances.send_replace(WalletBalances {
            owner: Some(*owner),
            lamports,
            token_amount,
        });
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<WalletBalances> {
        self.balances.subscribe()
    }
}
