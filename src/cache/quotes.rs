//! Quote cache and prefetcher
//!
//! At most one quote request is live. Starting a new one cancels the previous
//! token, and a cancelled request never commits, so the cache only ever holds
//! the answer to the latest question.

use crate::cache::CacheEntry;
use crate::error::SwapError;
use crate::providers::QuoteProvider;
use crate::quote::{QuoteId, QuoteRequest, QuoteSnapshot};
use crate::retry::{self, RetryPolicy};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct QuoteState {
    current: Option<CacheEntry<QuoteSnapshot, QuoteRequest>>,
    in_flight: Option<CancellationToken>,
}

/// Holds the latest committed quote
pub struct QuoteCache {
    provider: Arc<dyn QuoteProvider>,
    policy: RetryPolicy,
    state: Mutex<QuoteState>,
    next_id: AtomicU64,
}

impl QuoteCache {
    pub fn new(provider: Arc<dyn QuoteProvider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            state: Mutex::new(QuoteState::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Cancel any pending request and issue the token for the next one
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut state = self.state.lock();
        if let Some(previous) = state.in_flight.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Fetch and commit a quote without debounce
    pub async fn request_quote(
        &self,
        request: &QuoteRequest,
    ) -> Result<Option<QuoteSnapshot>, SwapError> {
        let token = self.begin();
        self.fetch(request, &token).await
    }

    /// Fetch with retries under `token`
    ///
    /// Returns `Ok(None)` when the request was superseded; nothing is committed
    /// in that case and no error is reported.
    pub async fn fetch(
        &self,
        request: &QuoteRequest,
        token: &CancellationToken,
    ) -> Result<Option<QuoteSnapshot>, SwapError> {
        let attempt = retry::retry("quote fetch", &self.policy, retry::always, |attempt| {
            tracing::debug!(attempt, amount = request.amount, "Fetching quote");
            self.provider.get_quote(request)
        });

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(amount = request.amount, "Quote request superseded");
                return Ok(None);
            }
            result = attempt => result,
        };

        // `begin` cancels under this lock, so a request that is still live
        // here cannot be superseded before it commits
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return Ok(None);
        }

        match result {
            Ok(quote) => {
                let id = QuoteId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                let snapshot = QuoteSnapshot {
                    id,
                    quote: Arc::new(quote),
                };
                tracing::info!(
                    quote_id = id.0,
                    in_amount = snapshot.quote.in_amount,
                    out_amount = snapshot.quote.out_amount,
                    price_impact_pct = snapshot.quote.price_impact_percent(),
                    "Quote committed"
                );
                state.current = Some(CacheEntry::new(snapshot.clone(), request.clone()));
                Ok(Some(snapshot))
            }
            Err(e) => Err(SwapError::QuoteFailed(e.into_inner().to_string())),
        }
    }

    /// Latest committed quote
    pub fn current(&self) -> Option<QuoteSnapshot> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|entry| entry.value.clone())
    }

    /// Latest committed quote with the request it answers
    pub fn current_entry(&self) -> Option<CacheEntry<QuoteSnapshot, QuoteRequest>> {
        self.state.lock().current.clone()
    }

    pub fn is_current(&self, id: QuoteId) -> bool {
        self.current().is_some_and(|snapshot| snapshot.id == id)
    }

    /// Cancel pending work and drop the committed quote
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.in_flight.take() {
            token.cancel();
        }
        state.current = None;
    }
}
