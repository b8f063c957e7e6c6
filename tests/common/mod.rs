//! Shared utilities for purchase-flow integration tests.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use presale_client::blockchain::{ChainLedger, InMemoryLedger};
use presale_client::config::ClientConfig;
use presale_client::purchase::{FiatOnramp, PurchaseOrchestrator, SimulatedOnramp};

/// 1000 tokens at 0.01 USDC with 6 decimals.
pub const SCENARIO_TOKENS: u64 = 1000;
pub const SCENARIO_COST: u64 = 10_000_000;

/// Config wired to the in-memory ledger with short waits.
pub fn test_config(ledger: &InMemoryLedger) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.contracts.sale_address = ledger.sale_contract().to_string();
    config.purchase.confirmation_timeout_secs = 1;
    config.purchase.receipt_poll_interval_ms = 5;
    config.fiat.settlement_timeout_secs = 1;
    config.fiat.poll_base_ms = 5;
    config.fiat.poll_max_ms = 50;
    config
}

/// Orchestrator over `ledger` whose fiat leg settles after a short delay.
pub fn orchestrator(ledger: &InMemoryLedger) -> PurchaseOrchestrator {
    let onramp = SimulatedOnramp::settling(ledger.clone(), Duration::from_millis(20));
    orchestrator_with(ledger, Arc::new(onramp))
}

pub fn orchestrator_with(ledger: &InMemoryLedger, onramp: Arc<dyn FiatOnramp>) -> PurchaseOrchestrator {
    PurchaseOrchestrator::new(Arc::new(ledger.clone()), &test_config(ledger), onramp).unwrap()
}

/// Ledger holding exactly the scenario cost and no allowance.
pub fn funded_ledger() -> InMemoryLedger {
    InMemoryLedger::builder()
        .stablecoin_balance(U256::from(SCENARIO_COST))
        .build()
}

/// Poll `condition` until it holds or `timeout` passes.
#[allow(dead_code)]
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
