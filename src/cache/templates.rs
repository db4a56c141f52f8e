//! Prebuilt unsigned swap transactions
//!
//! A template is bound to the quote identity and payer it was built for.
//! Reuse is decided at execution time by [`TransactionTemplateCache::fresh_for`];
//! stale templates are never aborted, just ignored.

use crate::cache::{is_fresh, CacheEntry};
use crate::error::SwapError;
use crate::providers::QuoteProvider;
use crate::quote::{QuoteId, QuoteSnapshot};
use parking_lot::Mutex;
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What a template was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub quote_id: QuoteId,
    pub payer: Pubkey,
}

impl TemplateKey {
    pub fn new(quote: &QuoteSnapshot, payer: Pubkey) -> Self {
        Self {
            quote_id: quote.id,
            payer,
        }
    }
}

/// Unsigned swap transaction with the fee baked in at build time
#[derive(Debug, Clone)]
pub struct TransactionTemplate {
    pub key: TemplateKey,
    pub fee_per_unit: Option<u64>,
    pub transaction: VersionedTransaction,
}

type TemplateEntry = CacheEntry<Arc<TransactionTemplate>, TemplateKey>;

pub struct TransactionTemplateCache {
    provider: Arc<dyn QuoteProvider>,
    ttl: Duration,
    entry: Mutex<Option<TemplateEntry>>,
    building: AtomicBool,
}

/// Clears the single-flight flag when the build finishes or is dropped
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TransactionTemplateCache {
    pub fn new(provider: Arc<dyn QuoteProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            entry: Mutex::new(None),
            building: AtomicBool::new(false),
        }
    }

    /// Build a template in the background
    ///
    /// Suppressed while another prebuild is running. A failed build keeps the
    /// previous template.
    pub async fn prebuild(
        &self,
        quote: &QuoteSnapshot,
        payer: Pubkey,
        fee_per_unit: Option<u64>,
    ) -> Option<Arc<TransactionTemplate>> {
        if self.building.swap(true, Ordering::AcqRel) {
            tracing::debug!(quote_id = quote.id.0, "Template build already in flight, skipping");
            return None;
        }
        let _guard = BuildGuard(&self.building);

        match self.build(quote, payer, fee_per_unit).await {
            Ok(template) => Some(template),
            Err(e) => {
                tracing::warn!(
                    quote_id = quote.id.0,
                    error = %e,
                    "Template prebuild failed, keeping previous template"
                );
                None
            }
        }
    }

    /// The cached template if it was built for `key` less than a TTL ago
    pub fn fresh_for(&self, key: &TemplateKey) -> Option<Arc<TransactionTemplate>> {
        self.entry
            .lock()
            .as_ref()
            .filter(|entry| is_fresh(entry, self.ttl, Instant::now(), key))
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Template to sign at execution time: the cached one when fresh, otherwise
    /// built inline with `fee_per_unit`
    pub async fn template_for_execution(
        &self,
        quote: &QuoteSnapshot,
        payer: Pubkey,
        fee_per_unit: Option<u64>,
    ) -> Result<Arc<TransactionTemplate>, SwapError> {
        let key = TemplateKey::new(quote, payer);
        if let Some(template) = self.fresh_for(&key) {
            tracing::info!(quote_id = quote.id.0, "Using prebuilt transaction");
            return Ok(template);
        }

        tracing::info!(quote_id = quote.id.0, "No fresh template, building inline");
        self.build(quote, payer, fee_per_unit)
            .await
            .map_err(|e| SwapError::BuildFailed(e.to_string()))
    }

    pub fn clear(&self) {
        self.entry.lock().take();
    }

    async fn build(
        &self,
        quote: &QuoteSnapshot,
        payer: Pubkey,
        fee_per_unit: Option<u64>,
    ) -> anyhow::Result<Arc<TransactionTemplate>> {
        let started = Instant::now();
        let transaction = self
            .provider
            .build_swap_transaction(&quote.quote, &payer, fee_per_unit)
            .await?;

        let key = TemplateKey::new(quote, payer);
        let template = Arc::new(TransactionTemplate {
            key,
            fee_per_unit,
            transaction,
        });
        *self.entry.lock() = Some(CacheEntry::new(Arc::clone(&template), key));

        tracing::debug!(
            quote_id = quote.id.0,
            ?fee_per_unit,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transaction template built"
        );
        Ok(template)
    }
}
