//! Purchase flow types.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blockchain::types::{ChainId, RawError};
use crate::purchase::classifier::ErrorKind;

/// Rail used to pay for the tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Spend stablecoin already held by the account.
    Direct,
    /// Acquire the stablecoin through the fiat onramp first.
    FiatBridge,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Direct => "direct",
            PaymentMethod::FiatBridge => "fiat_bridge",
        }
    }
}

/// One user action: buy `token_amount` whole tokens over `payment_method`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Correlates log lines and in-flight bookkeeping.
    pub id: Uuid,
    pub token_amount: U256,
    pub payment_method: PaymentMethod,
}

impl PurchaseRequest {
    pub fn new(token_amount: U256, payment_method: PaymentMethod) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_amount,
            payment_method,
        }
    }

    pub fn direct(token_amount: U256) -> Self {
        Self::new(token_amount, PaymentMethod::Direct)
    }

    pub fn fiat(token_amount: U256) -> Self {
        Self::new(token_amount, PaymentMethod::FiatBridge)
    }

    /// Same logical request on another rail.
    pub fn with_method(&self, payment_method: PaymentMethod) -> Self {
        Self {
            payment_method,
            ..self.clone()
        }
    }
}

/// The transaction a step of the flow submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStage {
    Approval,
    Purchase,
}

impl std::fmt::Display for PurchaseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseStage::Approval => write!(f, "approval"),
            PurchaseStage::Purchase => write!(f, "purchase"),
        }
    }
}

/// Resolution of one submitted (or refused) transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Accepted by the wallet, not confirmed when the wait elapsed.
    Pending { tx_hash: TxHash },
    Confirmed { tx_hash: TxHash, block_number: u64 },
    Reverted { tx_hash: TxHash, reason: RawError },
    /// Refused before reaching the chain (simulation revert, wallet rejection, RPC error).
    ProviderRejected { reason: RawError },
}

/// States of the approval/purchase sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    CheckingAllowance,
    Approving,
    AwaitingApprovalConfirmation,
    Purchasing,
    AwaitingPurchaseConfirmation,
    /// Waiting for fiat-rail settlement before the direct rail takes over.
    AwaitingSettlement,
    Done,
    Failed,
}

/// A purchase confirmed on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub request_id: Uuid,
    pub token_amount: U256,
    /// Stablecoin minor units paid.
    pub payment: U256,
    pub approval_tx: Option<TxHash>,
    pub purchase_tx: TxHash,
    pub block_number: u64,
}

/// Non-failure results of a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Completed(PurchaseReceipt),
    /// A submitted transaction had not confirmed when the wait elapsed; it may still land.
    StillPending {
        stage: PurchaseStage,
        tx_hash: TxHash,
        approval_tx: Option<TxHash>,
    },
    /// The fiat leg reported success but the stablecoin balance had not
    /// risen by the expected amount within the settlement wait. No token
    /// purchase was submitted.
    SettlementPending {
        expected_increment: U256,
        observed_increment: U256,
    },
}

impl PurchaseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PurchaseOutcome::Completed(_) => "completed",
            PurchaseOutcome::StillPending { .. } => "still_pending",
            PurchaseOutcome::SettlementPending { .. } => "settlement_pending",
        }
    }
}

/// Why the wallet could not be brought onto the target chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkFailure {
    #[error("user rejected the network switch")]
    UserRejected,

    #[error("network unknown to the wallet and adding it failed: {0}")]
    AddChainFailed(String),

    #[error("unexpected provider error: {0}")]
    Provider(String),

    #[error("wallet still on chain {actual} after switching")]
    StillOffTarget { actual: ChainId },

    #[error("wallet moved from chain {expected} to chain {actual} mid-purchase")]
    ChainChanged { expected: ChainId, actual: ChainId },
}

/// What callers of the purchase flow see on failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurchaseError {
    #[error("a purchase for {0} is already pending")]
    AlreadyPending(Address),

    #[error("purchase cancelled before submission")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] ErrorKind),
}

impl PurchaseError {
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            PurchaseError::Failed(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PurchaseError::AlreadyPending(_) => "already_pending",
            PurchaseError::Cancelled => "cancelled",
            PurchaseError::Failed(kind) => kind.label(),
        }
    }
}

/// User-initiated cancel, honoured only until the first transaction is submitted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_method_keeps_request_identity() {
        let fiat = PurchaseRequest::fiat(U256::from(1000u64));
        let direct = fiat.with_method(PaymentMethod::Direct);
        assert_eq!(direct.id, fiat.id);
        assert_eq!(direct.token_amount, fiat.token_amount);
        assert_eq!(direct.payment_method, PaymentMethod::Direct);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_request_serde_uses_snake_case() {
        let request = PurchaseRequest::fiat(U256::from(5u64));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["payment_method"], "fiat_bridge");
    }
}
