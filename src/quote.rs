//! Quote model and amount helpers

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Native SOL mint (wrapped SOL address used by aggregators)
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC mint on mainnet
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// A fungible token identified by its mint address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Mint address (base58)
    pub mint: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Asset {
    pub fn new(mint: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            mint: mint.into(),
            symbol: symbol.into(),
            decimals,
        }
    }

    pub fn sol() -> Self {
        Self::new(SOL_MINT, "SOL", 9)
    }

    pub fn usdc() -> Self {
        Self::new(USDC_MINT, "USDC", 6)
    }
}

/// The question a quote answers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in base units
    pub amount: u64,
    pub slippage_bps: u16,
}

/// Immutable snapshot of a price quote
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in base units
    pub in_amount: u64,
    /// Expected output amount in base units
    pub out_amount: u64,
    /// Minimum acceptable output after slippage, in base units
    pub other_amount_threshold: u64,
    /// Price impact as a raw ratio (0.0012 = 0.12%)
    pub price_impact_pct: f64,
    pub slippage_bps: u16,
    /// Provider route descriptor, passed back verbatim when building
    pub route: serde_json::Value,
}

impl Quote {
    /// Minimum output the swap accepts, in base units
    pub fn minimum_output_amount(&self) -> u64 {
        self.other_amount_threshold
    }

    /// Price impact as a percentage (raw ratio 0.0012 is 0.12)
    pub fn price_impact_percent(&self) -> f64 {
        self.price_impact_pct * 100.0
    }

    /// Expected output in display units
    pub fn output_estimate(&self, output_decimals: u8) -> f64 {
        self.out_amount as f64 / 10f64.powi(output_decimals as i32)
    }
}

/// Identity of a committed quote. Two quotes with identical content still get
/// distinct ids, so templates built for one never serve the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuoteId(pub u64);

/// A committed quote together with its identity
#[derive(Debug, Clone)]
pub struct QuoteSnapshot {
    pub id: QuoteId,
    pub quote: Arc<Quote>,
}

impl PartialEq for QuoteSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Slippage percentage to basis points (0.5% is 50 bps)
pub fn slippage_to_bps(slippage_percent: f64) -> u16 {
    // round away float noise before flooring (0.29 * 100 = 28.999...)
    let scaled = (slippage_percent * 100.0 * 1e6).round() / 1e6;
    scaled.floor().clamp(0.0, u16::MAX as f64) as u16
}

/// Parses a decimal amount string into base units, truncating excess precision.
/// Returns None for malformed input.
pub fn to_base_units(amount: &str, decimals: u8) -> Option<u64> {
    let amount = amount.trim();
    if amount.is_empty() {
        return None;
    }

    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let scale = 10u64.checked_pow(decimals as u32)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().ok()?.checked_mul(scale)?
    };

    let digits: String = fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(decimals as usize)
        .collect();
    let fraction_units = if digits.is_empty() {
        0
    } else {
        digits.parse::<u64>().ok()?
    };

    whole_units.checked_add(fraction_units)
}

/// Formats base units as a decimal string without trailing zeros
pub fn from_base_units(amount: u64, decimals: u8) -> String {
    let scale = 10u64.pow(decimals as u32);
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
