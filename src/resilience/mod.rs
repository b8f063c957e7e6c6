//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Waiting on external state (receipts, fiat settlement):
//!     → backoff.rs (deadline-bounded poll schedule)
//!     → caller reports "settled" or "timed out", never waits indefinitely
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external wait has a deadline
//! - Nothing here retries a failed submission; polling only observes state

pub mod backoff;

pub use backoff::{poll_delay, PollSchedule};
