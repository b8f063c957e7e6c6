//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (private key) + ClientConfig (RPC, contracts)
//!     → wallet.rs (key loading, signing)
//!     → client.rs (AlloyLedger: reads with failover, signed writes, wallet requests)
//!     → ledger.rs (ChainLedger trait consumed by the purchase flow)
//!     → transaction.rs (bounded confirmation polling)
//!
//! memory.rs implements the same trait in-process for tests and simulation.
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod contracts;
pub mod ledger;
pub mod memory;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::AlloyLedger;
pub use ledger::{ChainLedger, ChainSubscription, SharedLedger};
pub use memory::InMemoryLedger;
pub use transaction::{wait_for_confirmation, ConfirmationPolicy};
pub use types::{
    AssetDescriptor, ChainId, ConfirmationStatus, LedgerError, LedgerResult, NetworkDescriptor,
    RawError, ReceiptStatus, TokenInfo,
};
pub use wallet::Wallet;
