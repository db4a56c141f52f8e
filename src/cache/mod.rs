//! Latency-hiding caches
//!
//! Quotes, fee estimates and transaction templates are each held in a
//! [`CacheEntry`] written by exactly one cache component. Freshness is decided
//! by the pure [`is_fresh`] at the point of consumption.

pub mod fees;
pub mod quotes;
pub mod templates;

pub use fees::{FeeEstimate, FeeEstimatorCache};
pub use quotes::QuoteCache;
pub use templates::{TemplateKey, TransactionTemplate, TransactionTemplateCache};

use std::time::Duration;
use tokio::time::Instant;

/// Cached value with the instant it was produced and the key it answers
#[derive(Debug, Clone)]
pub struct CacheEntry<T, K> {
    pub value: T,
    pub built_at: Instant,
    pub key_fingerprint: K,
}

impl<T, K> CacheEntry<T, K> {
    /// Stamp a value with the current instant
    pub fn new(value: T, key_fingerprint: K) -> Self {
        Self::built_at(value, key_fingerprint, Instant::now())
    }

    pub fn built_at(value: T, key_fingerprint: K, built_at: Instant) -> Self {
        Self {
            value,
            built_at,
            key_fingerprint,
        }
    }
}

/// An entry is fresh when it is younger than `ttl` and was built for `current_key`
pub fn is_fresh<T, K: PartialEq>(
    entry: &CacheEntry<T, K>,
    ttl: Duration,
    now: Instant,
    current_key: &K,
) -> bool {
    now.saturating_duration_since(entry.built_at) < ttl && entry.key_fingerprint == *current_key
}
