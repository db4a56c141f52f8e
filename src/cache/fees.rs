//! Priority fee estimate cache
//!
//! Refreshed opportunistically alongside quote fetches. A failed refresh keeps
//! the last good estimate; nothing here ever clears a value. At most one
//! refresh is in flight.

use crate::cache::{is_fresh, CacheEntry};
use crate::config::FeeLevel;
use crate::providers::FeeProvider;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fee per compute unit (micro-lamports) and the level it was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub fee_per_unit: u64,
    pub level: FeeLevel,
}

pub struct FeeEstimatorCache {
    provider: Arc<dyn FeeProvider>,
    ttl: Duration,
    entry: Mutex<Option<CacheEntry<FeeEstimate, FeeLevel>>>,
    refreshing: AtomicBool,
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FeeEstimatorCache {
    pub fn new(provider: Arc<dyn FeeProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            entry: Mutex::new(None),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Ask the provider once for a new estimate
    ///
    /// Returns the new fee, or the last good one if the provider failed.
    /// `None` means no estimate has ever succeeded. While another refresh is
    /// running this returns the cached value without asking the provider.
    pub async fn estimate_fee(&self, level: FeeLevel, relevant_accounts: &[String]) -> Option<u64> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return self.last_good().map(|estimate| estimate.fee_per_unit);
        }
        let result = {
            let _guard = RefreshGuard(&self.refreshing);
            self.provider
                .get_fee_for_level(level, relevant_accounts)
                .await
        };

        match result {
            Ok(fee_per_unit) => {
                tracing::debug!(?level, fee_per_unit, "Fee estimate refreshed");
                *self.entry.lock() = Some(CacheEntry::new(
                    FeeEstimate {
                        fee_per_unit,
                        level,
                    },
                    level,
                ));
                Some(fee_per_unit)
            }
            Err(e) => {
                let kept = self.last_good();
                tracing::warn!(
                    ?level,
                    error = %e,
                    kept = ?kept.map(|estimate| estimate.fee_per_unit),
                    "Fee estimate refresh failed, keeping last value"
                );
                kept.map(|estimate| estimate.fee_per_unit)
            }
        }
    }

    /// Most recent successful estimate, however old
    pub fn last_good(&self) -> Option<FeeEstimate> {
        self.entry.lock().as_ref().map(|entry| entry.value)
    }

    /// The estimate for `level` if it is still inside the TTL
    pub fn fresh(&self, level: FeeLevel) -> Option<FeeEstimate> {
        self.entry
            .lock()
            .as_ref()
            .filter(|entry| is_fresh(entry, self.ttl, Instant::now(), &level))
            .map(|entry| entry.value)
    }

    /// Fee to bake into a build: the fresh estimate for `level`, else the last
    /// good one of any level
    pub fn best_available(&self, level: FeeLevel) -> Option<u64> {
        self.fresh(level)
            .or_else(|| self.last_good())
            .map(|estimate| estimate.fee_per_unit)
    }
}
