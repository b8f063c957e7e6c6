//! Failure classification.
//!
//! Maps raw provider and contract failures onto a closed set of
//! user-actionable kinds. Structured data is consulted first: the revert
//! selector against the sale contract's custom errors, then the EIP-1193
//! error code. Message text is only a fallback, matched against the
//! contract's error identifiers and standard node wording.

use alloy::primitives::U256;
use alloy::sol_types::SolError;
use thiserror::Error;

use crate::blockchain::contracts::IPresale;
use crate::blockchain::types::{RawError, USER_REJECTED_CODE};
use crate::purchase::types::NetworkFailure;

/// A classified purchase failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("insufficient stablecoin balance for this purchase")]
    InsufficientPaymentBalance,

    #[error("insufficient native currency to pay for gas")]
    InsufficientNativeGas,

    #[error("the sale is sold out or has fewer tokens left than requested")]
    SaleSoldOut,

    #[error("the sale is not active")]
    SaleNotActive,

    #[error("the token amount must be greater than zero")]
    InvalidAmount,

    #[error("the stablecoin transfer to the sale contract failed")]
    TransferFailed,

    #[error("wrong network: {0}")]
    NetworkMismatch(NetworkFailure),

    #[error("request rejected in the wallet")]
    UserRejected,

    /// The fiat leg settled but the token purchase did not complete.
    #[error("stablecoin acquired ({stablecoin_acquired} minor units) but the token purchase failed: {cause}")]
    PartialFiatCompletion {
        stablecoin_acquired: U256,
        cause: Box<ErrorKind>,
    },

    #[error("purchase failed: {message}")]
    PurchaseFailed { message: String },
}

impl ErrorKind {
    /// Stable metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientPaymentBalance => "insufficient_payment_balance",
            ErrorKind::InsufficientNativeGas => "insufficient_native_gas",
            ErrorKind::SaleSoldOut => "sale_sold_out",
            ErrorKind::SaleNotActive => "sale_not_active",
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::TransferFailed => "transfer_failed",
            ErrorKind::NetworkMismatch(_) => "network_mismatch",
            ErrorKind::UserRejected => "user_rejected",
            ErrorKind::PartialFiatCompletion { .. } => "partial_fiat_completion",
            ErrorKind::PurchaseFailed { .. } => "purchase_failed",
        }
    }

    /// What the user can do about it.
    pub fn guidance(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientPaymentBalance => {
                "Top up your stablecoin balance or buy fewer tokens."
            }
            ErrorKind::InsufficientNativeGas => "Add native currency to your wallet to cover gas.",
            ErrorKind::SaleSoldOut => "Reduce the amount to what is still available.",
            ErrorKind::SaleNotActive => "Purchases are currently paused. Try again later.",
            ErrorKind::InvalidAmount => "Enter a token amount greater than zero.",
            ErrorKind::TransferFailed => "Check the stablecoin approval and try again.",
            ErrorKind::NetworkMismatch(_) => "Switch your wallet to the sale network and retry.",
            ErrorKind::UserRejected => "The request was declined in the wallet. Retry when ready.",
            ErrorKind::PartialFiatCompletion { .. } => {
                "Your stablecoin arrived. Complete the purchase with the direct payment option."
            }
            ErrorKind::PurchaseFailed { .. } => "Something went wrong. Try again.",
        }
    }
}

/// Classify a raw failure. Total: anything unrecognised becomes `PurchaseFailed`.
pub fn classify(raw: &RawError) -> ErrorKind {
    if let Some(kind) = raw.selector().and_then(classify_selector) {
        return kind;
    }
    if raw.code == Some(USER_REJECTED_CODE) {
        return ErrorKind::UserRejected;
    }
    if let Some(kind) = classify_message(&raw.message) {
        return kind;
    }
    ErrorKind::PurchaseFailed {
        message: raw.to_string(),
    }
}

/// The sale contract's custom errors: selector, identifier, kind.
fn contract_errors() -> [([u8; 4], &'static str, ErrorKind); 6] {
    [
        (
            IPresale::InsufficientUSDT::SELECTOR,
            IPresale::InsufficientUSDT::SIGNATURE,
            ErrorKind::InsufficientPaymentBalance,
        ),
        (
            IPresale::InsufficientETH::SELECTOR,
            IPresale::InsufficientETH::SIGNATURE,
            ErrorKind::InsufficientNativeGas,
        ),
        (
            IPresale::TokenSoldOut::SELECTOR,
            IPresale::TokenSoldOut::SIGNATURE,
            ErrorKind::SaleSoldOut,
        ),
        (
            IPresale::PresaleNotActive::SELECTOR,
            IPresale::PresaleNotActive::SIGNATURE,
            ErrorKind::SaleNotActive,
        ),
        (
            IPresale::ZeroAmount::SELECTOR,
            IPresale::ZeroAmount::SIGNATURE,
            ErrorKind::InvalidAmount,
        ),
        (
            IPresale::TransferFailed::SELECTOR,
            IPresale::TransferFailed::SIGNATURE,
            ErrorKind::TransferFailed,
        ),
    ]
}

fn classify_selector(selector: [u8; 4]) -> Option<ErrorKind> {
    contract_errors()
        .into_iter()
        .find(|(known, _, _)| *known == selector)
        .map(|(_, _, kind)| kind)
}

fn classify_message(message: &str) -> Option<ErrorKind> {
    // Signatures read "Name()"; match on the bare identifier.
    let by_identifier = contract_errors().into_iter().find(|(_, signature, _)| {
        let identifier = signature.trim_end_matches("()");
        message.contains(identifier)
    });
    if let Some((_, _, kind)) = by_identifier {
        return Some(kind);
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("insufficient funds") {
        return Some(ErrorKind::InsufficientNativeGas);
    }
    if lower.contains("user rejected") || lower.contains("user denied") {
        return Some(ErrorKind::UserRejected);
    }
    None
}
