//! Purchase orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! PurchaseRequest (amount, rail)
//!     → orchestrator.rs (façade: in-flight check, dispatch, metrics)
//!     → network.rs (NetworkGuard: switch / add / verify target chain)
//!     → sequencer.rs (direct rail: allowance → approval → purchase)
//!       or fiat.rs (fiat rail: onramp → settlement polling → sequencer)
//!     → classifier.rs (raw failures → ErrorKind)
//!     → PurchaseOutcome | PurchaseError
//! ```
//!
//! # Design Decisions
//! - One purchase per account at a time (inflight.rs)
//! - Every decision reads chain state fresh (snapshot.rs); nothing is cached
//! - Every wait is bounded; running out of time is an outcome, not a hang

pub mod classifier;
pub mod fiat;
pub mod inflight;
pub mod network;
pub mod orchestrator;
pub mod sequencer;
pub mod snapshot;
pub mod types;

pub use classifier::{classify, ErrorKind};
pub use fiat::{FiatBridge, FiatOnramp, FiatOrder, OnrampError, SimulatedOnramp};
pub use inflight::InFlightRegistry;
pub use network::{EnforcerHandle, GuardStatus, NetworkGuard};
pub use orchestrator::PurchaseOrchestrator;
pub use sequencer::{ApprovalPurchaseSequencer, SequencerSettings};
pub use snapshot::{AccountSnapshot, PurchaseQuote, Readiness, SaleState, SaleStats};
pub use types::{
    CancelToken, NetworkFailure, PaymentMethod, PurchaseError, PurchaseOutcome, PurchaseReceipt,
    PurchaseRequest, PurchaseStage, SequencerState, TransactionOutcome,
};
