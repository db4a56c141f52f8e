//! Transaction delivery
//!
//! A signed transaction reaches the chain over one of two paths: the standard
//! path submits it to the RPC once, the fast path bundles it with a tip
//! transaction and falls back to the standard path when the bundler fails.

pub mod engine;
pub mod tip;

pub use engine::{BundlePollError, DeliveryReceipt, DeliveryRequest, EngineSettings, SubmissionEngine};

use serde::{Deserialize, Serialize};

/// How a signed transaction reaches the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryPath {
    /// Single RPC submission, push confirmation
    Standard,
    /// Tipped bundle through the block engine
    FastPath,
}

/// The fast path requires both the setting and a positive tip
pub fn select_path(enable_fast_path: bool, tip_lamports: u64) -> DeliveryPath {
    if enable_fast_path && tip_lamports > 0 {
        DeliveryPath::FastPath
    } else {
        DeliveryPath::Standard
    }
}
