//! Fiat rail: buy the stablecoin off-chain, then the tokens on-chain.
//!
//! # Flow
//! ```text
//! baseline balance read
//!     → FiatOnramp::purchase (fiat leg, external provider)
//!     → balance polled with backoff until baseline + cost arrives
//!     → network re-checked, then the direct-rail sequencer runs
//! ```
//!
//! The onramp reporting success is not proof of settlement; only the
//! observed balance increase is. A settlement wait that runs out is
//! reported as such and never as a completed purchase. Once the fiat leg
//! has succeeded the user holds the stablecoin, so any later failure is
//! reported as a partial completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::blockchain::ledger::SharedLedger;
use crate::blockchain::memory::InMemoryLedger;
use crate::blockchain::types::{ChainId, LedgerResult};
use crate::config::{ContractsConfig, FiatConfig};
use crate::observability::metrics;
use crate::pricing::units::scale;
use crate::pricing::{format_fixed, required_payment_minor};
use crate::pricing::calculator::PAYMENT_DISPLAY_DECIMALS;
use crate::purchase::classifier::{classify, ErrorKind};
use crate::purchase::inflight::{InFlightClaim, InFlightRegistry};
use crate::purchase::network::NetworkGuard;
use crate::purchase::sequencer::ApprovalPurchaseSequencer;
use crate::purchase::snapshot::SaleState;
use crate::purchase::types::{
    CancelToken, PaymentMethod, PurchaseError, PurchaseOutcome, PurchaseRequest, SequencerState,
};
use crate::resilience::PollSchedule;

/// What the onramp is asked to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiatOrder {
    pub request_id: Uuid,
    /// Wallet that receives the stablecoin.
    pub recipient: Address,
    pub chain: ChainId,
    pub asset: Address,
    pub asset_symbol: String,
    /// Amount in stablecoin units, rounded up to whole cents.
    pub amount: String,
    /// `amount` in minor units; never below the purchase cost.
    pub amount_minor: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OnrampError {
    #[error("fiat purchase abandoned by the user")]
    Abandoned,

    #[error("fiat provider error: {0}")]
    Provider(String),
}

/// External fiat-to-stablecoin provider.
#[async_trait]
pub trait FiatOnramp: Send + Sync {
    /// Run the fiat leg. Resolves `Ok` once the provider reports success;
    /// the stablecoin may still be in transit.
    async fn purchase(&self, order: &FiatOrder) -> Result<(), OnrampError>;
}

/// Stablecoin the fiat leg buys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StablecoinAsset {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl StablecoinAsset {
    pub fn from_config(config: &ContractsConfig) -> Result<Self, String> {
        let address = config
            .stablecoin_address
            .parse()
            .map_err(|e| format!("invalid stablecoin address '{}': {}", config.stablecoin_address, e))?;
        Ok(Self {
            address,
            symbol: config.stablecoin_symbol.clone(),
            decimals: config.stablecoin_decimals,
        })
    }
}

/// How long and how often to look for the settled balance.
#[derive(Debug, Clone, Copy)]
pub struct SettlementPolicy {
    pub timeout: Duration,
    pub poll_base: Duration,
    pub poll_max: Duration,
}

impl From<&FiatConfig> for SettlementPolicy {
    fn from(config: &FiatConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.settlement_timeout_secs),
            poll_base: Duration::from_millis(config.poll_base_ms),
            poll_max: Duration::from_millis(config.poll_max_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Settled { observed: U256 },
    TimedOut { observed: U256 },
}

/// Two-leg purchase over the fiat rail.
pub struct FiatBridge {
    ledger: SharedLedger,
    guard: Arc<NetworkGuard>,
    sequencer: Arc<ApprovalPurchaseSequencer>,
    inflight: InFlightRegistry,
    onramp: Arc<dyn FiatOnramp>,
    stablecoin: StablecoinAsset,
    policy: SettlementPolicy,
}

impl FiatBridge {
    pub fn new(
        ledger: SharedLedger,
        guard: Arc<NetworkGuard>,
        sequencer: Arc<ApprovalPurchaseSequencer>,
        inflight: InFlightRegistry,
        onramp: Arc<dyn FiatOnramp>,
        stablecoin: StablecoinAsset,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            ledger,
            guard,
            sequencer,
            inflight,
            onramp,
            stablecoin,
            policy,
        }
    }

    /// Run both legs for the ledger's account.
    pub async fn purchase(
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

        if request.token_amount.is_zero() {
            return Err(ErrorKind::InvalidAmount.into());
        }

        let sale = SaleState::fetch(self.ledger.as_ref()).await.map_err(ledger_error)?;
        if !sale.accepts_stablecoin() {
            return Err(ErrorKind::SaleNotActive.into());
        }
        if !sale.can_supply(request.token_amount) {
            return Err(ErrorKind::SaleSoldOut.into());
        }
        let required = required_payment_minor(request.token_amount, sale.price_per_token)
            .map_err(|e| ErrorKind::PurchaseFailed { message: e.to_string() })?;
        let baseline = self
            .ledger
            .stablecoin_balance(account)
            .await
            .map_err(ledger_error)?;

        if cancel.is_cancelled() {
            return Err(PurchaseError::Cancelled);
        }

        let order = self.order(request, account, required);
        tracing::info!(
            request_id = %request.id,
            amount = %order.amount,
            asset = %order.asset_symbol,
            "Starting fiat purchase"
        );
        self.onramp.purchase(&order).await.map_err(|e| {
            tracing::warn!(request_id = %request.id, error = %e, "Fiat leg failed");
            let kind = match e {
                OnrampError::Abandoned => ErrorKind::UserRejected,
                OnrampError::Provider(message) => ErrorKind::PurchaseFailed { message },
            };
            PurchaseError::Failed(kind)
        })?;
        tracing::info!(request_id = %request.id, "Fiat leg reported success");

        self.settle_and_buy(&claim, request, baseline, required).await
    }

    /// Finish a purchase whose fiat leg was driven elsewhere.
    ///
    /// `baseline` is the stablecoin balance read before the fiat leg and
    /// `stablecoin_amount` the increase it is expected to deliver.
    pub async fn complete_fiat_purchase(
        &self,
        request: &PurchaseRequest,
        baseline: U256,
        stablecoin_amount: U256,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let account = self.ledger.account();
        self.inflight.release_if_mined(self.ledger.as_ref(), account).await;
        let claim = self
            .inflight
            .claim(account, request.id)
            .ok_or(PurchaseError::AlreadyPending(account))?;
        self.settle_and_buy(&claim, request, baseline, stablecoin_amount).await
    }

    fn order(&self, request: &PurchaseRequest, recipient: Address, required: U256) -> FiatOrder {
        let amount_minor = round_up_to_cents(required, self.stablecoin.decimals);
        FiatOrder {
            request_id: request.id,
            recipient,
            chain: self.guard.target(),
            asset: self.stablecoin.address,
            asset_symbol: self.stablecoin.symbol.clone(),
            amount: format_fixed(amount_minor, self.stablecoin.decimals, PAYMENT_DISPLAY_DECIMALS),
            amount_minor,
        }
    }

    async fn settle_and_buy(
        &self,
        claim: &InFlightClaim,
        request: &PurchaseRequest,
        baseline: U256,
        expected: U256,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        claim.transition(SequencerState::AwaitingSettlement);
        match self.await_settlement(claim.account(), baseline, expected).await {
            Settlement::Settled { observed } => {
                tracing::info!(request_id = %request.id, received = %observed, "Fiat settlement observed");
            }
            Settlement::TimedOut { observed } => {
                tracing::warn!(
                    request_id = %request.id,
                    expected = %expected,
                    observed = %observed,
                    "Fiat settlement not observed in time"
                );
                return Ok(PurchaseOutcome::SettlementPending {
                    expected_increment: expected,
                    observed_increment: observed,
                });
            }
        }

        let partial = |cause: ErrorKind| {
            PurchaseError::Failed(ErrorKind::PartialFiatCompletion {
                stablecoin_acquired: expected,
                cause: Box::new(cause),
            })
        };

        if let Err(failure) = self.guard.ensure_target_chain().await {
            return Err(partial(ErrorKind::NetworkMismatch(failure)));
        }

        // The stablecoin is already bought; the token leg is not cancellable.
        let direct = request.with_method(PaymentMethod::Direct);
        self.sequencer
            .run(claim, &direct, &CancelToken::new())
            .await
            .map_err(|failure| partial(failure.kind()))
    }

    async fn await_settlement(&self, account: Address, baseline: U256, expected: U256) -> Settlement {
        let target = baseline.saturating_add(expected);
        let started = Instant::now();
        let mut schedule = PollSchedule::new(self.policy.poll_base, self.policy.poll_max, self.policy.timeout);
        let mut observed = U256::ZERO;

        loop {
            match self.ledger.stablecoin_balance(account).await {
                Ok(balance) => {
                    observed = balance.saturating_sub(baseline);
                    if balance >= target {
                        metrics::record_settlement_wait(started.elapsed(), true);
                        return Settlement::Settled { observed };
                    }
                    tracing::debug!(
                        observed = %observed,
                        expected = %expected,
                        attempt = schedule.attempts(),
                        "Awaiting fiat settlement"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Balance read failed during settlement wait");
                }
            }

            match schedule.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    metrics::record_settlement_wait(started.elapsed(), false);
                    return Settlement::TimedOut { observed };
                }
            }
        }
    }
}

fn ledger_error(e: crate::blockchain::types::LedgerError) -> PurchaseError {
    PurchaseError::Failed(classify(&e.raw()))
}

/// Round minor units up to the next whole cent.
fn round_up_to_cents(amount: U256, decimals: u8) -> U256 {
    let Some(cent) = decimals
        .checked_sub(PAYMENT_DISPLAY_DECIMALS as u8)
        .and_then(scale)
    else {
        return amount;
    };
    let remainder = amount % cent;
    if remainder.is_zero() {
        amount
    } else {
        amount.saturating_add(cent - remainder)
    }
}

/// Onramp backed by the in-memory ledger: on success the ordered stablecoin
/// is credited to the recipient after a delay.
#[derive(Clone)]
pub struct SimulatedOnramp {
    ledger: InMemoryLedger,
    settle_after: Option<Duration>,
    result: Result<(), OnrampError>,
}

impl SimulatedOnramp {
    /// Succeeds and settles after `delay`.
    pub fn settling(ledger: InMemoryLedger, delay: Duration) -> Self {
        Self {
            ledger,
            settle_after: Some(delay),
            result: Ok(()),
        }
    }

    /// Reports success but the stablecoin never arrives.
    pub fn never_settling(ledger: InMemoryLedger) -> Self {
        Self {
            ledger,
            settle_after: None,
            result: Ok(()),
        }
    }

    pub fn failing(ledger: InMemoryLedger, error: OnrampError) -> Self {
        Self {
            ledger,
            settle_after: None,
            result: Err(error),
        }
    }
}

#[async_trait]
impl FiatOnramp for SimulatedOnramp {
    async fn purchase(&self, order: &FiatOrder) -> Result<(), OnrampError> {
        self.result.clone()?;
        if let Some(delay) = self.settle_after {
            self.ledger
                .credit_stablecoin_after(order.recipient, order.amount_minor, delay);
        }
        Ok(())
    }
}

/// Balance the fiat leg starts from; exposed for externally-driven onramps.
pub async fn settlement_baseline(ledger: &SharedLedger) -> LedgerResult<U256> {
    ledger.stablecoin_balance(ledger.account()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::blockchain::memory::Submission;
    use crate::blockchain::types::{LedgerError, NetworkDescriptor};
    use crate::blockchain::transaction::ConfirmationPolicy;
    use crate::blockchain::ChainLedger;
    use crate::config::{ClientConfig, NetworkConfig};
    use crate::purchase::sequencer::SequencerSettings;

    struct RecordingOnramp {
        inner: SimulatedOnramp,
        orders: Mutex<Vec<FiatOrder>>,
    }

    #[async_trait]
    impl FiatOnramp for RecordingOnramp {
        async fn purchase(&self, order: &FiatOrder) -> Result<(), OnrampError> {
            self.orders.lock().unwrap().push(order.clone());
            self.inner.purchase(order).await
        }
    }

    fn bridge(ledger: &InMemoryLedger, onramp: Arc<dyn FiatOnramp>) -> FiatBridge {
        let shared: SharedLedger = Arc::new(ledger.clone());
        let inflight = InFlightRegistry::new();
        let guard = Arc::new(NetworkGuard::new(
            shared.clone(),
            NetworkDescriptor::from(&NetworkConfig::default()),
        ));
        let sequencer = Arc::new(ApprovalPurchaseSequencer::new(
            shared.clone(),
            guard.target(),
            inflight.clone(),
            SequencerSettings {
                approval_ceiling: U256::from(1_000_000_000_000u64),
                confirmation: ConfirmationPolicy {
                    required_blocks: 1,
                    timeout: Duration::from_millis(200),
                    poll_interval: Duration::from_millis(5),
                },
            },
        ));
        let config = ClientConfig::default();
        FiatBridge::new(
            shared,
            guard,
            sequencer,
            inflight,
            onramp,
            StablecoinAsset::from_config(&config.contracts).unwrap(),
            SettlementPolicy {
                timeout: Duration::from_millis(300),
                poll_base: Duration::from_millis(5),
                poll_max: Duration::from_millis(20),
            },
        )
    }

    #[tokio::test]
    async fn test_settles_then_buys_on_direct_rail() {
        let ledger = InMemoryLedger::builder().build();
        let onramp = Arc::new(RecordingOnramp {
            inner: SimulatedOnramp::settling(ledger.clone(), Duration::from_millis(30)),
            orders: Mutex::new(Vec::new()),
        });
        let bridge = bridge(&ledger, onramp.clone());

        let outcome = bridge
            .purchase(&PurchaseRequest::fiat(U256::from(1000u64)), &CancelToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, PurchaseOutcome::Completed(_)));

        let orders = onramp.orders.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount, "10.00");
        assert_eq!(orders[0].chain, ChainId(8453));
        assert_eq!(orders[0].recipient, ledger.account());
        assert_eq!(ledger.token_balance_of(ledger.account()), U256::from(100_000u64));
    }

    #[tokio::test]
    async fn test_settlement_timeout_is_not_success() {
        let ledger = InMemoryLedger::builder().build();
        let bridge = bridge(&ledger, Arc::new(SimulatedOnramp::never_settling(ledger.clone())));

        let outcome = bridge
            .purchase(&PurchaseRequest::fiat(U256::from(1000u64)), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PurchaseOutcome::SettlementPending {
                expected_increment: U256::from(10_000_000u64),
                observed_increment: U256::ZERO,
            }
        );
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_second_leg_failure_is_partial_completion() {
        let ledger = InMemoryLedger::builder().build();
        ledger.fail_next_approval(LedgerError::UserRejected(
            crate::blockchain::types::RawError::with_code(4001, "User rejected"),
        ));
        let bridge = bridge(
            &ledger,
            Arc::new(SimulatedOnramp::settling(ledger.clone(), Duration::from_millis(10))),
        );

        let err = bridge
            .purchase(&PurchaseRequest::fiat(U256::from(1000u64)), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PurchaseError::Failed(ErrorKind::PartialFiatCompletion {
                stablecoin_acquired: U256::from(10_000_000u64),
                cause: Box::new(ErrorKind::UserRejected),
            })
        );
        assert_eq!(ledger.stablecoin_balance_of(ledger.account()), U256::from(10_000_000u64));
    }

    #[tokio::test]
    async fn test_abandoned_fiat_leg_is_user_rejected() {
        let ledger = InMemoryLedger::builder().build();
        let bridge = bridge(
            &ledger,
            Arc::new(SimulatedOnramp::failing(ledger.clone(), OnrampError::Abandoned)),
        );
        let err = bridge
            .purchase(&PurchaseRequest::fiat(U256::from(1000u64)), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PurchaseError::Failed(ErrorKind::UserRejected));
    }

    #[tokio::test]
    async fn test_complete_fiat_purchase_from_callback() {
        let ledger = InMemoryLedger::builder().build();
        let bridge = bridge(&ledger, Arc::new(SimulatedOnramp::never_settling(ledger.clone())));
        let shared: SharedLedger = Arc::new(ledger.clone());
        let baseline = settlement_baseline(&shared).await.unwrap();

        ledger.credit_stablecoin(ledger.account(), U256::from(10_000_000u64));
        let outcome = bridge
            .complete_fiat_purchase(
                &PurchaseRequest::fiat(U256::from(1000u64)),
                baseline,
                U256::from(10_000_000u64),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PurchaseOutcome::Completed(_)));
        assert!(matches!(ledger.submissions().last(), Some(Submission::Purchase { .. })));
    }

    #[tokio::test]
    async fn test_inactive_sale_skips_fiat_leg() {
        let ledger = InMemoryLedger::builder().presale_active(false).build();
        let onramp = Arc::new(RecordingOnramp {
            inner: SimulatedOnramp::settling(ledger.clone(), Duration::ZERO),
            orders: Mutex::new(Vec::new()),
        });
        let bridge = bridge(&ledger, onramp.clone());
        let err = bridge
            .purchase(&PurchaseRequest::fiat(U256::from(1000u64)), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PurchaseError::Failed(ErrorKind::SaleNotActive));
        assert!(onramp.orders.lock().unwrap().is_empty());
    }

    #[test]
    fn test_round_up_to_cents() {
        assert_eq!(round_up_to_cents(U256::from(9_999u64), 6), U256::from(10_000u64));
        assert_eq!(round_up_to_cents(U256::from(10_000_000u64), 6), U256::from(10_000_000u64));
        assert_eq!(round_up_to_cents(U256::from(7u64), 2), U256::from(7u64));
        assert_eq!(round_up_to_cents(U256::from(7u64), 0), U256::from(7u64));
    }
}
