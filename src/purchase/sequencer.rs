//! Approval-then-purchase sequencing for the direct stablecoin rail.
//!
//! # State machine
//! ```text
//! Idle → CheckingAllowance → [Approving → AwaitingApprovalConfirmation]
//!      → Purchasing → AwaitingPurchaseConfirmation → Done | Failed
//! ```
//!
//! # Invariants
//! - A purchase is never submitted unless the allowance covers the cost,
//!   either already or through an approval confirmed in this flow
//! - Balance, allowance and sale state are re-read before each decision
//! - The wallet is re-checked against the target chain before each
//!   submission and watched while confirmations are awaited
//! - Cancellation is honoured only until the first submission

use alloy::primitives::{Address, TxHash, U256};
use futures_util::{FutureExt, StreamExt};
use tracing::Instrument;

use crate::blockchain::ledger::{ChainSubscription, SharedLedger};
use crate::blockchain::transaction::{wait_for_confirmation, ConfirmationPolicy};
use crate::blockchain::types::{ChainId, ConfirmationStatus, LedgerError, RawError};
use crate::config::PurchaseConfig;
use crate::observability::metrics;
use crate::pricing::{required_payment_minor, to_minor_units, PricingError};
use crate::purchase::classifier::{classify, ErrorKind};
use crate::purchase::inflight::{InFlightClaim, InFlightRegistry};
use crate::purchase::snapshot::SaleState;
use crate::purchase::types::{
    CancelToken, NetworkFailure, PurchaseError, PurchaseOutcome, PurchaseReceipt, PurchaseRequest,
    PurchaseStage, SequencerState, TransactionOutcome,
};

/// Sequencer tuning.
#[derive(Debug, Clone, Copy)]
pub struct SequencerSettings {
    /// Allowance granted when an approval is needed (at least the required amount).
    pub approval_ceiling: U256,
    pub confirmation: ConfirmationPolicy,
}

impl SequencerSettings {
    pub fn from_config(config: &PurchaseConfig) -> Result<Self, PricingError> {
        Ok(Self {
            approval_ceiling: to_minor_units(&config.approval_ceiling, 0)?,
            confirmation: ConfirmationPolicy::from(config),
        })
    }
}

/// Why a sequence stopped short of a confirmed purchase.
#[derive(Debug, Clone)]
pub(crate) enum SequenceFailure {
    AlreadyPending(Address),
    Cancelled,
    /// Refused locally from freshly-read state; nothing was submitted.
    Refused(ErrorKind),
    ChainChanged { expected: ChainId, actual: ChainId },
    /// A submitted or refused transaction.
    Transaction {
        stage: PurchaseStage,
        outcome: TransactionOutcome,
    },
    Ledger(LedgerError),
}

impl SequenceFailure {
    /// Classified form of a failure that is not about the request slot.
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            SequenceFailure::AlreadyPending(_) | SequenceFailure::Cancelled => {
                ErrorKind::PurchaseFailed {
                    message: "purchase did not start".to_string(),
                }
            }
            SequenceFailure::Refused(kind) => kind.clone(),
            SequenceFailure::ChainChanged { expected, actual } => {
                ErrorKind::NetworkMismatch(NetworkFailure::ChainChanged {
                    expected: *expected,
                    actual: *actual,
                })
            }
            SequenceFailure::Transaction { outcome, .. } => match outcome {
                TransactionOutcome::Reverted { reason, .. }
                | TransactionOutcome::ProviderRejected { reason } => classify(reason),
                TransactionOutcome::Pending { tx_hash } | TransactionOutcome::Confirmed { tx_hash, .. } => {
                    ErrorKind::PurchaseFailed {
                        message: format!("transaction {} did not fail", tx_hash),
                    }
                }
            },
            SequenceFailure::Ledger(e) => classify(&e.raw()),
        }
    }

    pub(crate) fn into_error(self) -> PurchaseError {
        match self {
            SequenceFailure::AlreadyPending(account) => PurchaseError::AlreadyPending(account),
            SequenceFailure::Cancelled => PurchaseError::Cancelled,
            other => PurchaseError::Failed(other.kind()),
        }
    }
}

impl From<LedgerError> for SequenceFailure {
    fn from(e: LedgerError) -> Self {
        SequenceFailure::Ledger(e)
    }
}

pub(crate) type SequenceResult = Result<PurchaseOutcome, SequenceFailure>;

/// Freshly-read figures a decision is based on.
#[derive(Debug, Clone, Copy)]
struct Evaluation {
    required: U256,
    allowance: U256,
}

/// Drives approval and purchase for one account at a time.
pub struct ApprovalPurchaseSequencer {
    ledger: SharedLedger,
    target: ChainId,
    inflight: InFlightRegistry,
    settings: SequencerSettings,
}

impl ApprovalPurchaseSequencer {
    pub fn new(
        ledger: SharedLedger,
        target: ChainId,
        inflight: InFlightRegistry,
        settings: SequencerSettings,
    ) -> Self {
        Self {
            ledger,
            target,
            inflight,
            settings,
        }
    }

    /// Run a direct-rail purchase for the ledger's account.
    ///
    /// The wallet must already be on the target chain.
    pub async fn execute(
        &self,
        request: &PurchaseRequest,
        cancel: &CancelToken,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let account = self.ledger.account();
        self.inflight.release_if_mined(self.ledger.as_ref(), account).await;
        let claim = self
            .inflight
            .claim(account, request.id)
            .ok_or(PurchaseError::AlreadyPending(account))?;
        self.run(&claim, request, cancel)
            .await
            .map_err(SequenceFailure::into_error)
    }

    /// Run with the account slot already claimed by the caller.
    pub(crate) async fn run(
        &self,
        claim: &InFlightClaim,
        request: &PurchaseRequest,
        cancel: &CancelToken,
    ) -> SequenceResult {
        let span = tracing::info_span!("purchase", request_id = %request.id, tokens = %request.token_amount);

        // Subscribe first so no change after this point is missed.
        let mut chain_events = self.ledger.chain_changes();
        let result = self
            .sequence(claim, request, cancel, &mut chain_events)
            .instrument(span.clone())
            .await;
        let _enter = span.enter();

        match &result {
            Ok(PurchaseOutcome::Completed(receipt)) => {
                claim.transition(SequencerState::Done);
                tracing::info!(tx_hash = %receipt.purchase_tx, block = receipt.block_number, "Purchase confirmed");
            }
            Ok(PurchaseOutcome::StillPending { stage, tx_hash, .. }) => {
                claim.hold_until_mined(*tx_hash);
                tracing::warn!(stage = %stage, tx_hash = %tx_hash, "Purchase not yet confirmed");
            }
            Ok(outcome) => {
                tracing::warn!(outcome = outcome.label(), "Purchase not yet confirmed");
            }
            Err(failure) => {
                claim.transition(SequencerState::Failed);
                tracing::warn!(failure = ?failure, "Purchase failed");
            }
        }
        result
    }

    async fn sequence(
        &self,
        claim: &InFlightClaim,
        request: &PurchaseRequest,
        cancel: &CancelToken,
        chain_events: &mut ChainSubscription,
    ) -> SequenceResult {
        if request.token_amount.is_zero() {
            return Err(SequenceFailure::Refused(ErrorKind::InvalidAmount));
        }

        claim.transition(SequencerState::CheckingAllowance);
        self.ensure_on_target(chain_events).await?;
        let evaluation = self.evaluate(request.token_amount).await?;

        let mut approval_tx = None;
        if evaluation.allowance < evaluation.required {
            if cancel.is_cancelled() {
                return Err(SequenceFailure::Cancelled);
            }
            claim.transition(SequencerState::Approving);
            let amount = self.settings.approval_ceiling.max(evaluation.required);
            match self.approve(claim, amount, chain_events).await? {
                TransactionOutcome::Confirmed { tx_hash, .. } => approval_tx = Some(tx_hash),
                TransactionOutcome::Pending { tx_hash } => {
                    return Ok(PurchaseOutcome::StillPending {
                        stage: PurchaseStage::Approval,
                        tx_hash,
                        approval_tx: None,
                    });
                }
                outcome => {
                    return Err(SequenceFailure::Transaction {
                        stage: PurchaseStage::Approval,
                        outcome,
                    });
                }
            }

            let evaluation = self.evaluate(request.token_amount).await?;
            if evaluation.allowance < evaluation.required {
                tracing::warn!(
                    allowance = %evaluation.allowance,
                    required = %evaluation.required,
                    "Allowance still short after confirmed approval"
                );
                return Err(SequenceFailure::Refused(ErrorKind::TransferFailed));
            }
        } else if cancel.is_cancelled() {
            return Err(SequenceFailure::Cancelled);
        }

        claim.transition(SequencerState::Purchasing);
        self.ensure_on_target(chain_events).await?;

        let tx_hash = match self.ledger.submit_purchase(request.token_amount).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                return Err(SequenceFailure::Transaction {
                    stage: PurchaseStage::Purchase,
                    outcome: TransactionOutcome::ProviderRejected { reason: e.raw() },
                });
            }
        };
        tracing::info!(tx_hash = %tx_hash, "Purchase submitted");

        claim.transition(SequencerState::AwaitingPurchaseConfirmation);
        match self.await_confirmation(tx_hash, chain_events).await? {
            ConfirmationStatus::Confirmed { block_number } => {
                Ok(PurchaseOutcome::Completed(PurchaseReceipt {
                    request_id: request.id,
                    token_amount: request.token_amount,
                    payment: evaluation.required,
                    approval_tx,
                    purchase_tx: tx_hash,
                    block_number,
                }))
            }
            ConfirmationStatus::Reverted { block_number } => Err(SequenceFailure::Transaction {
                stage: PurchaseStage::Purchase,
                outcome: TransactionOutcome::Reverted {
                    tx_hash,
                    reason: self
                        .revert_reason(PurchaseStage::Purchase, tx_hash, block_number)
                        .await,
                },
            }),
            ConfirmationStatus::StillPending => Ok(PurchaseOutcome::StillPending {
                stage: PurchaseStage::Purchase,
                tx_hash,
                approval_tx,
            }),
        }
    }

    /// Submit an approval and wait for it.
    async fn approve(
        &self,
        claim: &InFlightClaim,
        amount: U256,
        chain_events: &mut ChainSubscription,
    ) -> Result<TransactionOutcome, SequenceFailure> {
        self.ensure_on_target(chain_events).await?;

        let spender = self.ledger.sale_contract();
        let tx_hash = match self.ledger.submit_approval(spender, amount).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                metrics::record_approval("rejected");
                return Ok(TransactionOutcome::ProviderRejected { reason: e.raw() });
            }
        };
        tracing::info!(tx_hash = %tx_hash, amount = %amount, "Approval submitted");

        claim.transition(SequencerState::AwaitingApprovalConfirmation);
        let outcome = match self.await_confirmation(tx_hash, chain_events).await? {
            ConfirmationStatus::Confirmed { block_number } => {
                metrics::record_approval("confirmed");
                TransactionOutcome::Confirmed { tx_hash, block_number }
            }
            ConfirmationStatus::Reverted { block_number } => {
                metrics::record_approval("reverted");
                TransactionOutcome::Reverted {
                    tx_hash,
                    reason: self
                        .revert_reason(PurchaseStage::Approval, tx_hash, block_number)
                        .await,
                }
            }
            ConfirmationStatus::StillPending => {
                metrics::record_approval("pending");
                TransactionOutcome::Pending { tx_hash }
            }
        };
        Ok(outcome)
    }

    /// Revert payload of a mined transaction, or a plain description when the node has none.
    async fn revert_reason(&self, stage: PurchaseStage, tx_hash: TxHash, block_number: u64) -> RawError {
        match self.ledger.revert_reason(tx_hash, block_number).await {
            Ok(Some(reason)) => reason,
            Ok(None) => RawError::message(format!(
                "{} transaction {} reverted in block {}",
                stage, tx_hash, block_number
            )),
            Err(e) => {
                tracing::warn!(tx_hash = %tx_hash, error = %e, "Could not replay reverted transaction");
                RawError::message(format!(
                    "{} transaction {} reverted in block {}",
                    stage, tx_hash, block_number
                ))
            }
        }
    }

    /// Re-read sale state, balance and allowance, refusing what cannot succeed.
    async fn evaluate(&self, token_amount: U256) -> Result<Evaluation, SequenceFailure> {
        let account = self.ledger.account();
        let spender = self.ledger.sale_contract();
        let (sale, balance, allowance) = tokio::try_join!(
            SaleState::fetch(self.ledger.as_ref()),
            self.ledger.stablecoin_balance(account),
            self.ledger.stablecoin_allowance(account, spender)
        )?;

        if !sale.accepts_stablecoin() {
            return Err(SequenceFailure::Refused(ErrorKind::SaleNotActive));
        }
        if !sale.can_supply(token_amount) {
            return Err(SequenceFailure::Refused(ErrorKind::SaleSoldOut));
        }
        let required = required_payment_minor(token_amount, sale.price_per_token).map_err(|e| {
            SequenceFailure::Refused(ErrorKind::PurchaseFailed {
                message: e.to_string(),
            })
        })?;
        if balance < required {
            tracing::debug!(balance = %balance, required = %required, "Stablecoin balance short");
            return Err(SequenceFailure::Refused(ErrorKind::InsufficientPaymentBalance));
        }

        tracing::debug!(required = %required, allowance = %allowance, "Allowance checked");
        Ok(Evaluation { required, allowance })
    }

    /// Fail if the wallet reported, or is now on, any chain but the target.
    async fn ensure_on_target(&self, chain_events: &mut ChainSubscription) -> Result<(), SequenceFailure> {
        while let Some(Some(chain)) = chain_events.next().now_or_never() {
            if chain != self.target {
                return Err(self.chain_changed(chain));
            }
        }
        let current = self.ledger.chain_id().await?;
        if current != self.target {
            return Err(self.chain_changed(current));
        }
        Ok(())
    }

    /// Wait for confirmation, failing fast if the wallet leaves the target chain.
    async fn await_confirmation(
        &self,
        tx_hash: TxHash,
        chain_events: &mut ChainSubscription,
    ) -> Result<ConfirmationStatus, SequenceFailure> {
        let wait = wait_for_confirmation(self.ledger.as_ref(), tx_hash, self.settings.confirmation);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                status = &mut wait => return Ok(status),
                Some(chain) = chain_events.next() => {
                    if chain != self.target {
                        return Err(self.chain_changed(chain));
                    }
                }
            }
        }
    }

    fn chain_changed(&self, actual: ChainId) -> SequenceFailure {
        tracing::warn!(expected = %self.target, actual = %actual, "Wallet changed chain mid-purchase");
        SequenceFailure::ChainChanged {
            expected: self.target,
            actual,
        }
    }
}
