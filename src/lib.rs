pub mod cache;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod providers;
pub mod quote;
pub mod retry;
pub mod session;
pub mod transfer;

pub use client::{Collaborators, SwapExecutorClient, SwapForm};
pub use config::{ClientConfig, FeeLevel, SwapSettings, TimingConfig};
pub use delivery::{DeliveryPath, DeliveryReceipt};
pub use error::SwapError;
pub use providers::balances::WalletBalances;
pub use quote::{Asset, Quote, QuoteId, QuoteRequest, QuoteSnapshot};
pub use session::{Notification, SwapPhase, SwapSnapshot};
pub use transfer::{TransferAsset, TransferExecutor};
