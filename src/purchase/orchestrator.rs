//! Purchase façade.
//!
//! The single entry point the presentation layer talks to. Every purchase
//! passes the network guard first, then goes to the rail its request names.
//! Failures leave here classified; raw provider errors never do.

use std::sync::Arc;

use alloy::primitives::U256;

use crate::blockchain::ledger::SharedLedger;
use crate::blockchain::types::{AssetDescriptor, LedgerError, NetworkDescriptor};
use crate::config::{validate_config, ClientConfig, ConfigError, ValidationError};
use crate::observability::metrics;
use crate::purchase::classifier::{classify, ErrorKind};
use crate::purchase::fiat::{FiatBridge, FiatOnramp, SettlementPolicy, StablecoinAsset};
use crate::purchase::inflight::InFlightRegistry;
use crate::purchase::network::{EnforcerHandle, GuardStatus, NetworkGuard};
use crate::purchase::sequencer::{ApprovalPurchaseSequencer, SequencerSettings};
use crate::purchase::snapshot::{AccountSnapshot, PurchaseQuote, SaleState, SaleStats};
use crate::purchase::types::{
    CancelToken, PaymentMethod, PurchaseError, PurchaseOutcome, PurchaseRequest, SequencerState,
};

/// Orchestrates network enforcement, approval/purchase sequencing and the fiat rail.
pub struct PurchaseOrchestrator {
    ledger: SharedLedger,
    guard: Arc<NetworkGuard>,
    sequencer: Arc<ApprovalPurchaseSequencer>,
    bridge: FiatBridge,
    inflight: InFlightRegistry,
    stablecoin: StablecoinAsset,
    sale_token: AssetDescriptor,
}

impl PurchaseOrchestrator {
    /// Wire the components over `ledger` from a validated configuration.
    pub fn new(
        ledger: SharedLedger,
        config: &ClientConfig,
        onramp: Arc<dyn FiatOnramp>,
    ) -> Result<Self, ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let invalid = |field: &'static str, message: String| {
            ConfigError::Validation(vec![ValidationError::new(field, message)])
        };
        let settings = SequencerSettings::from_config(&config.purchase)
            .map_err(|e| invalid("purchase.approval_ceiling", e.to_string()))?;
        let stablecoin = StablecoinAsset::from_config(&config.contracts)
            .map_err(|e| invalid("contracts.stablecoin_address", e))?;
        let sale_token = AssetDescriptor::sale_token(&config.contracts)
            .map_err(|e| invalid("contracts.token_address", e.to_string()))?;

        let inflight = InFlightRegistry::new();
        let guard = Arc::new(NetworkGuard::new(
            ledger.clone(),
            NetworkDescriptor::from(&config.network),
        ));
        let sequencer = Arc::new(ApprovalPurchaseSequencer::new(
            ledger.clone(),
            guard.target(),
            inflight.clone(),
            settings,
        ));
        let bridge = FiatBridge::new(
            ledger.clone(),
            guard.clone(),
            sequencer.clone(),
            inflight.clone(),
            onramp,
            stablecoin.clone(),
            SettlementPolicy::from(&config.fiat),
        );

        Ok(Self {
            ledger,
            guard,
            sequencer,
            bridge,
            inflight,
            stablecoin,
            sale_token,
        })
    }

    /// Buy tokens for the connected account.
    pub async fn buy(&self, request: PurchaseRequest) -> Result<PurchaseOutcome, PurchaseError> {
        self.buy_with_cancel(request, &CancelToken::new()).await
    }

    /// Buy tokens; `cancel` is honoured until the first transaction is submitted.
    pub async fn buy_with_cancel(
        &self,
        request: PurchaseRequest,
        cancel: &CancelToken,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let rail = request.payment_method.as_str();
        let account = self.ledger.account();
        tracing::info!(
            request_id = %request.id,
            account = %account,
            tokens = %request.token_amount,
            rail,
            "Purchase requested"
        );

        let result = self.dispatch(&request, cancel).await;
        match &result {
            Ok(outcome) => metrics::record_purchase(rail, outcome.label()),
            Err(e) => {
                metrics::record_purchase(rail, e.label());
                if let Some(kind) = e.kind() {
                    tracing::warn!(request_id = %request.id, error = %kind, hint = kind.guidance(), "Purchase failed");
                }
            }
        }
        result
    }

    async fn dispatch(
        &self,
        request: &PurchaseRequest,
        cancel: &CancelToken,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let account = self.ledger.account();
        self.inflight.release_if_mined(self.ledger.as_ref(), account).await;
        if self.inflight.is_pending(account) {
            return Err(PurchaseError::AlreadyPending(account));
        }
        if cancel.is_cancelled() {
            return Err(PurchaseError::Cancelled);
        }

        match self.guard.ensure_target_chain().await {
            Ok(GuardStatus::Ready) => {}
            Ok(GuardStatus::Switched) => tracing::debug!(request_id = %request.id, "Switched before purchase"),
            Err(failure) => return Err(ErrorKind::NetworkMismatch(failure).into()),
        }

        match request.payment_method {
            PaymentMethod::Direct => self.sequencer.execute(request, cancel).await,
            PaymentMethod::FiatBridge => self.bridge.purchase(request, cancel).await,
        }
    }

    /// Finish a fiat purchase whose onramp was driven outside this process.
    pub async fn complete_fiat_purchase(
        &self,
        request: PurchaseRequest,
        baseline: U256,
        stablecoin_amount: U256,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let result = self
            .bridge
            .complete_fiat_purchase(&request, baseline, stablecoin_amount)
            .await;
        let rail = PaymentMethod::FiatBridge.as_str();
        match &result {
            Ok(outcome) => metrics::record_purchase(rail, outcome.label()),
            Err(e) => metrics::record_purchase(rail, e.label()),
        }
        result
    }

    /// Bring the wallet onto the target chain.
    pub async fn ensure_target_chain(&self) -> Result<GuardStatus, ErrorKind> {
        self.guard
            .ensure_target_chain()
            .await
            .map_err(ErrorKind::NetworkMismatch)
    }

    /// Keep the wallet on the target chain until the handle drops.
    pub fn enforce_target_chain(&self) -> EnforcerHandle {
        self.guard.spawn_enforcer()
    }

    /// State of the connected account's in-flight purchase, if any.
    pub fn pending_state(&self) -> Option<SequencerState> {
        self.inflight.state_of(self.ledger.account())
    }

    pub async fn sale_state(&self) -> Result<SaleState, ErrorKind> {
        SaleState::fetch(self.ledger.as_ref()).await.map_err(classified)
    }

    pub async fn sale_stats(&self) -> Result<SaleStats, ErrorKind> {
        let state = self.sale_state().await?;
        Ok(SaleStats::new(&state, self.stablecoin.decimals))
    }

    /// Percentage of the sale sold, in `[0, 100]`.
    pub async fn sale_progress(&self) -> Result<f64, ErrorKind> {
        Ok(self.sale_state().await?.progress())
    }

    pub async fn account_snapshot(&self) -> Result<AccountSnapshot, ErrorKind> {
        AccountSnapshot::fetch(self.ledger.as_ref(), self.ledger.account())
            .await
            .map_err(classified)
    }

    /// Price `token_amount` against the current sale and account state.
    pub async fn quote(&self, token_amount: U256) -> Result<PurchaseQuote, ErrorKind> {
        let (sale, account) = tokio::try_join!(self.sale_state(), self.account_snapshot())?;
        PurchaseQuote::new(token_amount, &sale, &account, self.stablecoin.decimals).map_err(|e| {
            ErrorKind::PurchaseFailed {
                message: e.to_string(),
            }
        })
    }

    /// Ask the wallet to track the sale token, switching to the target chain first.
    ///
    /// Returns whether the user accepted.
    pub async fn register_sale_token(&self) -> Result<bool, ErrorKind> {
        self.ensure_target_chain().await?;
        let accepted = self
            .ledger
            .watch_asset(&self.sale_token)
            .await
            .map_err(classified)?;
        tracing::info!(token = %self.sale_token.symbol, accepted, "Sale token registration answered");
        Ok(accepted)
    }

    pub fn stablecoin(&self) -> &StablecoinAsset {
        &self.stablecoin
    }

    pub fn sale_token(&self) -> &AssetDescriptor {
        &self.sale_token
    }
}

fn classified(e: LedgerError) -> ErrorKind {
    classify(&e.raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::blockchain::memory::WalletBehavior;
    use crate::blockchain::types::ChainId;
    use crate::blockchain::{ChainLedger, InMemoryLedger};
    use crate::purchase::fiat::SimulatedOnramp;
    use crate::purchase::types::NetworkFailure;

    fn orchestrator(ledger: &InMemoryLedger) -> PurchaseOrchestrator {
        let mut config = ClientConfig::default();
        config.contracts.sale_address = ledger.sale_contract().to_string();
        PurchaseOrchestrator::new(
            Arc::new(ledger.clone()),
            &config,
            Arc::new(SimulatedOnramp::settling(ledger.clone(), Duration::from_millis(10))),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_buy_switches_network_first() {
        let ledger = InMemoryLedger::builder()
            .chain(ChainId(1))
            .stablecoin_balance(U256::from(10_000_000u64))
            .build();
        let outcome = orchestrator(&ledger)
            .buy(PurchaseRequest::direct(U256::from(1000u64)))
            .await
            .unwrap();
        assert!(matches!(outcome, PurchaseOutcome::Completed(_)));
        assert_eq!(ledger.switch_requests(), vec![ChainId(8453)]);
    }

    #[tokio::test]
    async fn test_rejected_switch_is_network_mismatch() {
        let ledger = InMemoryLedger::builder()
            .chain(ChainId(1))
            .switch_behavior(WalletBehavior::Reject)
            .stablecoin_balance(U256::from(10_000_000u64))
            .build();
        let err = orchestrator(&ledger)
            .buy(PurchaseRequest::direct(U256::from(1000u64)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PurchaseError::Failed(ErrorKind::NetworkMismatch(NetworkFailure::UserRejected))
        );
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_read_side_accessors() {
        let ledger = InMemoryLedger::builder()
            .stablecoin_balance(U256::from(10_000_000u64))
            .build();
        let orchestrator = orchestrator(&ledger);

        assert_eq!(orchestrator.sale_progress().await.unwrap(), 10.0);
        let quote = orchestrator.quote(U256::from(1000u64)).await.unwrap();
        assert_eq!(quote.cost, "10.00");
        let snapshot = orchestrator.account_snapshot().await.unwrap();
        assert_eq!(snapshot.stablecoin_balance, U256::from(10_000_000u64));
        assert_eq!(orchestrator.pending_state(), None);
    }

    #[tokio::test]
    async fn test_register_sale_token_ensures_chain() {
        let ledger = InMemoryLedger::builder().chain(ChainId(1)).build();
        let accepted = orchestrator(&ledger).register_sale_token().await.unwrap();
        assert!(accepted);
        assert_eq!(ledger.chain_id().await.unwrap(), ChainId(8453));

        let watched = ledger.watch_requests();
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].symbol, "MOTRA");
        assert_eq!(watched[0].decimals, 2);
    }

    #[tokio::test]
    async fn test_register_sale_token_rejection_is_classified() {
        let ledger = InMemoryLedger::builder()
            .watch_behavior(WalletBehavior::Reject)
            .build();
        let err = orchestrator(&ledger).register_sale_token().await.unwrap_err();
        assert_eq!(err, ErrorKind::UserRejected);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let ledger = InMemoryLedger::builder().build();
        let mut config = ClientConfig::default();
        config.purchase.approval_ceiling = "lots".to_string();
        let result = PurchaseOrchestrator::new(
            Arc::new(ledger.clone()),
            &config,
            Arc::new(SimulatedOnramp::never_settling(ledger)),
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
