//! Price calculation.
//!
//! Pure, stateless functions over fixed-point on-chain integers:
//! - units.rs: minor units ⇄ decimal strings, display formatting
//! - calculator.rs: required payment, token scaling, sale progress

pub mod calculator;
pub mod units;

use thiserror::Error;

pub use calculator::{required_payment, required_payment_minor, sale_progress, tokens_to_minor};
pub use units::{format_fixed, format_token_amount, from_minor_units, to_minor_units};

/// Errors from parsing or scaling amounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("amount is empty")]
    Empty,

    #[error("'{0}' is not a non-negative decimal amount")]
    Invalid(String),

    #[error("amount does not fit in 256 bits")]
    Overflow,
}
