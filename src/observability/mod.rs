//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Purchase flow, network guard, ledger client produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Every submitted transaction is logged with its hash and request id
//! - Metrics are cheap and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
