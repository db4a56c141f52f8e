//! Failure taxonomy surfaced to the swap session
//!
//! Collaborator adapters speak `anyhow`; everything that reaches the session
//! state machine is folded into one of these categories first.

use thiserror::Error;

/// Markers that identify a quote/build provider rejection inside a free-form
/// message. Matched case-sensitively.
const AGGREGATOR_REJECTION_MARKERS: &[&str] = &[
    "Failed to build swap transaction",
    "Jupiter",
    "quote",
    "400",
];

/// Errors produced while executing a swap or transfer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwapError {
    /// Wallet, assets, amount or quote missing. No I/O was attempted.
    #[error("Missing requirements for swap: {0}")]
    Precondition(String),

    #[error("Signer not ready yet. Try again in a second.")]
    SignerNotReady,

    #[error("No Solana wallet account found in signer for {0}. Create one in the signer dashboard.")]
    NoSignerAccount(String),

    #[error("Signer rejected the transaction: {0}")]
    SignerRejected(String),

    #[error("Failed to fetch quote: {0}")]
    QuoteFailed(String),

    /// The quote/build provider refused to produce a transaction
    #[error("Failed to build swap transaction: {0}")]
    BuildFailed(String),

    /// Every delivery path refused the transaction
    #[error("Transaction submission failed: {0}")]
    SubmissionFailed(String),

    /// Submitted, but no verdict inside the confirmation window. The explorer is
    /// the source of truth from here on.
    #[error("Transaction timeout after {timeout_secs}s. View on explorer: {explorer_url}")]
    ConfirmationTimeout {
        signature: String,
        explorer_url: String,
        timeout_secs: u64,
    },

    /// Landed, but the runtime rejected its effects
    #[error("Transaction {signature} failed on-chain: {error}")]
    OnChainExecution { signature: String, error: String },
}

impl SwapError {
    /// True for provider-side rejections the session recovers from by
    /// returning to idle and fetching a new quote
    pub fn is_recoverable(&self) -> bool {
        match self {
            SwapError::BuildFailed(_) | SwapError::QuoteFailed(_) => true,
            SwapError::SubmissionFailed(message) => is_aggregator_rejection(message),
            _ => false,
        }
    }

    /// Transaction signature attached to this error, if the transaction got that far
    pub fn signature(&self) -> Option<&str> {
        match self {
            SwapError::ConfirmationTimeout { signature, .. }
            | SwapError::OnChainExecution { signature, .. } => Some(signature),
            _ => None,
        }
    }
}

/// Whether a free-form error message carries a quote/build provider rejection marker
pub fn is_aggregator_rejection(message: &str) -> bool {
    AGGREGATOR_REJECTION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Shortens a message for transient notifications. Full text stays in the session.
pub fn truncate_for_notice(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let head: String = message.chars().take(max_chars).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failures_are_recoverable() {
        assert!(SwapError::BuildFailed("Jupiter API error (400)".into()).is_recoverable());
        assert!(SwapError::QuoteFailed("timeout".into()).is_recoverable());
    }

    #[test]
    fn test_submission_failure_recoverable_only_with_marker() {
        assert!(SwapError::SubmissionFailed("quote expired".into()).is_recoverable());
        assert!(!SwapError::SubmissionFailed("connection reset".into()).is_recoverable());
    }

    #[test]
    fn test_rejection_markers_are_case_sensitive() {
        assert!(is_aggregator_rejection("Jupiter API error (500): upstream"));
        assert!(is_aggregator_rejection("Failed to build swap transaction: timeout"));
        assert!(is_aggregator_rejection("stale quote"));
        assert!(!is_aggregator_rejection("Quote account closed"));
        assert!(!is_aggregator_rejection("jupiter relay offline"));
        assert!(!is_aggregator_rejection("FAILED TO BUILD SWAP TRANSACTION"));
    }

    #[test]
    fn test_terminal_errors_are_not_recoverable() {
        let timeout = SwapError::ConfirmationTimeout {
            signature: "abc".into(),
            explorer_url: "https://solscan.io/tx/abc".into(),
            timeout_secs: 60,
        };
        assert!(!timeout.is_recoverable());
        assert!(!SwapError::SignerNotReady.is_recoverable());
        assert!(!SwapError::Precondition("wallet".into()).is_recoverable());
        assert!(!SwapError::OnChainExecution {
            signature: "abc".into(),
            error: "{\"InstructionError\":[2,{\"Custom\":400}]}".into(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_timeout_message_names_signature_and_explorer() {
        let err = SwapError::ConfirmationTimeout {
            signature: "5sig".into(),
            explorer_url: "https://solscan.io/tx/5sig".into(),
            timeout_secs: 60,
        };
        let message = err.to_string();
        assert!(message.contains("60s"));
        assert!(message.contains("https://solscan.io/tx/5sig"));
        assert_eq!(err.signature(), Some("5sig"));
    }

    #[test]
    fn test_truncate_for_notice() {
        assert_eq!(truncate_for_notice("short", 100), "short");
        let long = "x".repeat(150);
        let truncated = truncate_for_notice(&long, 100);
        assert_eq!(truncated.len(), 103);
        assert!(truncated.ends_with("..."));
    }
}
