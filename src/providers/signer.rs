//! External signers
//!
//! Two implementations of [`RemoteSigner`]: a local keypair and an HTTP
//! custodial signing service. Whatever shape the service answers with is
//! normalized by [`normalize_signer_payload`] and nowhere else.

use crate::config::ClientConfig;
use crate::error::SwapError;
use crate::providers::{RemoteSigner, SignerAccount, SignerResponse, ADDRESS_FORMAT_SOLANA};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transaction signed by the external signer, with its identifier
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction: VersionedTransaction,
    /// First signature; identifies the transaction on every delivery path
    pub signature: Signature,
}

impl SignedTransaction {
    /// Decode signer output, rejecting transactions that came back unsigned
    pub fn from_response(response: &SignerResponse) -> Result<Self, SwapError> {
        let transaction: VersionedTransaction = bincode::deserialize(&response.signed_bytes)
            .map_err(|e| {
                SwapError::SignerRejected(format!("Failed to decode signed transaction: {}", e))
            })?;

        let signature = match transaction.signatures.first() {
            Some(sig) if *sig != Signature::default() => *sig,
            _ => {
                return Err(SwapError::SignerRejected(
                    "Signer returned an unsigned transaction".to_string(),
                ))
            }
        };

        Ok(Self {
            transaction,
            signature,
        })
    }
}

/// Normalize the heterogeneous payloads signing services answer with
///
/// Accepted shapes, all hex encoded: a bare string, `{"signedTransaction": ..}`,
/// `{"signedTransactionHex": ..}`, optionally nested under `"activity"`/`"result"`.
pub fn normalize_signer_payload(payload: &Value) -> Result<SignerResponse> {
    let encoded = extract_signed_hex(payload)
        .map(|s| s.trim().trim_start_matches("0x"))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("Signer returned no signed transaction."))?;

    let signed_bytes =
        hex::decode(encoded).map_err(|e| anyhow!("Signer returned invalid hex: {}", e))?;

    Ok(SignerResponse { signed_bytes })
}

fn extract_signed_hex(payload: &Value) -> Option<&str> {
    match payload {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("signedTransaction")
            .or_else(|| map.get("signedTransactionHex"))
            .and_then(Value::as_str)
            .or_else(|| {
                map.get("result")
                    .or_else(|| map.get("activity"))
                    .and_then(extract_signed_hex)
            }),
        _ => None,
    }
}

/// Pick the Solana account that pays for the transaction
pub fn select_account(accounts: &[SignerAccount], payer: &Pubkey) -> Option<SignerAccount> {
    let payer = payer.to_string();
    accounts
        .iter()
        .find(|account| account.address_format == ADDRESS_FORMAT_SOLANA && account.address == payer)
        .cloned()
}

/// Resolve the payer's account and sign `unsigned` with it
pub async fn sign_with(
    signer: &dyn RemoteSigner,
    unsigned: &VersionedTransaction,
    payer: &Pubkey,
) -> Result<(SignedTransaction, SignerAccount), SwapError> {
    if !signer.is_ready() {
        return Err(SwapError::SignerNotReady);
    }

    let accounts = signer
        .list_accounts()
        .await
        .map_err(|e| SwapError::SignerRejected(format!("Failed to list signer accounts: {}", e)))?;
    let account =
        select_account(&accounts, payer).ok_or_else(|| SwapError::NoSignerAccount(payer.to_string()))?;

    let signed = sign_with_account(signer, unsigned, &account).await?;
    Ok((signed, account))
}

/// Sign with an already resolved account
pub async fn sign_with_account(
    signer: &dyn RemoteSigner,
    unsigned: &VersionedTransaction,
    account: &SignerAccount,
) -> Result<SignedTransaction, SwapError> {
    let unsigned_bytes = bincode::serialize(unsigned)
        .map_err(|e| SwapError::SignerRejected(format!("Failed to serialize transaction: {}", e)))?;

    let response = signer
        .sign(&unsigned_bytes, account)
        .await
        .map_err(|e| SwapError::SignerRejected(e.to_string()))?;

    SignedTransaction::from_response(&response)
}

/// Signs with a local keypair
pub struct KeypairSigner {
    keypair: Arc<Keypair>,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Signer for the configured wallet keypair
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let keypair = config
            .get_keypair()?
            .ok_or_else(|| anyhow!("Wallet keypair is required for the local signer"))?;
        Ok(Self::new(keypair))
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

#[async_trait]
impl RemoteSigner for KeypairSigner {
    async fn list_accounts(&self) -> Result<Vec<SignerAccount>> {
        Ok(vec![SignerAccount {
            address: self.keypair.pubkey().to_string(),
            address_format: ADDRESS_FORMAT_SOLANA.to_string(),
            wallet_id: None,
            path: None,
        }])
    }

    async fn sign(&self, unsigned: &[u8], account: &SignerAccount) -> Result<SignerResponse> {
        if account.address != self.keypair.pubkey().to_string() {
            return Err(anyhow!("Account {} is not held by this signer", account.address));
        }

        let tx: VersionedTransaction = bincode::deserialize(unsigned)
            .map_err(|e| anyhow!("Failed to deserialize transaction: {}", e))?;
        let signed = VersionedTransaction::try_new(tx.message, &[self.keypair.as_ref()])
            .map_err(|e| anyhow!("Failed to sign transaction: {}", e))?;
        let signed_bytes = bincode::serialize(&signed)
            .map_err(|e| anyhow!("Failed to serialize signed transaction: {}", e))?;

        Ok(SignerResponse { signed_bytes })
    }
}

/// Custodial signing service reached over HTTP
///
/// `GET {endpoint}/accounts` lists accounts; `POST {endpoint}/sign` signs a
/// hex encoded unsigned transaction.
pub struct HttpRemoteSigner {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
    ready: AtomicBool,
}

impl HttpRemoteSigner {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let endpoint = config
            .signer
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("Signer endpoint is not configured"))?;
        Self::with_config(endpoint, config.signer.api_key.clone())
    }

    pub fn with_config(endpoint: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
            ready: AtomicBool::new(true),
        })
    }

    /// Mark the signing session usable or not (e.g. while a login refreshes)
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref api_key) => request.header("x-api-key", api_key),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteSigner for HttpRemoteSigner {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn list_accounts(&self) -> Result<Vec<SignerAccount>> {
        let response = self
            .authorized(self.client.get(format!("{}/accounts", self.endpoint)))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to request signer accounts: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Signer API error ({}): {}", status, text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse signer accounts: {}", e))?;

        // either a bare list or {"accounts": [...]}
        let accounts = body.get("accounts").cloned().unwrap_or(body);
        serde_json::from_value(accounts).map_err(|e| anyhow!("Failed to parse signer accounts: {}", e))
    }

    async fn sign(&self, unsigned: &[u8], account: &SignerAccount) -> Result<SignerResponse> {
        let request = json!({
            "unsignedTransaction": hex::encode(unsigned),
            "transactionType": "TRANSACTION_TYPE_SOLANA",
            "walletAccount": account,
        });

        let response = self
            .authorized(self.client.post(format!("{}/sign", self.endpoint)))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to request signature: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Signer API error ({}): {}", status, text));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse signer response: {}", e))?;

        normalize_signer_payload(&payload)
    }
}
