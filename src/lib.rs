//! Token sale purchase client library.

pub mod blockchain;
pub mod config;
pub mod observability;
pub mod pricing;
pub mod purchase;
pub mod resilience;

pub use blockchain::{AlloyLedger, ChainLedger, InMemoryLedger, SharedLedger, Wallet};
pub use config::ClientConfig;
pub use purchase::{
    ErrorKind, PaymentMethod, PurchaseError, PurchaseOrchestrator, PurchaseOutcome, PurchaseRequest,
};
