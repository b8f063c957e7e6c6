//! End-to-end purchase flows against the in-memory ledger.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use presale_client::blockchain::memory::Submission;
use presale_client::blockchain::{ChainId, ChainLedger, InMemoryLedger, LedgerError, RawError};
use presale_client::purchase::{
    CancelToken, ErrorKind, NetworkFailure, OnrampError, PurchaseError, PurchaseOutcome,
    PurchaseRequest, PurchaseStage, Readiness, SequencerState, SimulatedOnramp,
};

mod common;

use common::{SCENARIO_COST, SCENARIO_TOKENS};

fn scenario_request() -> PurchaseRequest {
    PurchaseRequest::direct(U256::from(SCENARIO_TOKENS))
}

#[tokio::test]
async fn test_scenario_quote_and_progress() {
    let ledger = common::funded_ledger();
    let orchestrator = common::orchestrator(&ledger);

    let quote = orchestrator.quote(U256::from(SCENARIO_TOKENS)).await.unwrap();
    assert_eq!(quote.cost, "10.00");
    assert_eq!(quote.cost_minor, U256::from(SCENARIO_COST));
    assert_eq!(quote.readiness, Readiness::NeedsApproval);

    assert_eq!(orchestrator.sale_progress().await.unwrap(), 10.0);
    let stats = orchestrator.sale_stats().await.unwrap();
    assert_eq!(stats.price, "0.01");
}

#[tokio::test]
async fn test_direct_purchase_approves_then_buys() {
    let ledger = common::funded_ledger();
    let orchestrator = common::orchestrator(&ledger);

    let outcome = orchestrator.buy(scenario_request()).await.unwrap();
    let PurchaseOutcome::Completed(receipt) = outcome else {
        panic!("expected a confirmed purchase, got {:?}", outcome);
    };
    assert!(receipt.approval_tx.is_some());
    assert_eq!(receipt.payment, U256::from(SCENARIO_COST));

    let submissions = ledger.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(matches!(submissions[0], Submission::Approval { .. }));
    assert!(matches!(submissions[1], Submission::Purchase { .. }));

    let account = ledger.account();
    assert_eq!(ledger.stablecoin_balance_of(account), U256::ZERO);
    assert_eq!(ledger.token_balance_of(account), U256::from(100_000u64));
    assert_eq!(orchestrator.pending_state(), None);
}

#[tokio::test]
async fn test_existing_allowance_skips_approval() {
    let ledger = InMemoryLedger::builder()
        .stablecoin_balance(U256::from(SCENARIO_COST))
        .allowance(U256::from(SCENARIO_COST))
        .build();
    let orchestrator = common::orchestrator(&ledger);

    orchestrator.buy(scenario_request()).await.unwrap();
    assert_eq!(
        ledger.submissions(),
        vec![Submission::Purchase {
            token_amount: U256::from(SCENARIO_TOKENS)
        }]
    );
}

#[tokio::test]
async fn test_second_purchase_while_pending_is_refused() {
    let ledger = InMemoryLedger::builder()
        .stablecoin_balance(U256::from(SCENARIO_COST))
        .hold_receipts()
        .build();
    let orchestrator = Arc::new(common::orchestrator(&ledger));

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.buy(scenario_request()).await })
    };

    assert!(
        common::eventually(Duration::from_secs(1), || {
            orchestrator.pending_state() == Some(SequencerState::AwaitingApprovalConfirmation)
        })
        .await
    );

    let second = orchestrator.buy(scenario_request()).await;
    assert_eq!(second, Err(PurchaseError::AlreadyPending(ledger.account())));

    ledger.release_receipts();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Completed(_)));
    assert_eq!(ledger.submissions().len(), 2);
}

#[tokio::test]
async fn test_chain_change_mid_flight_fails_without_purchase() {
    let ledger = InMemoryLedger::builder()
        .stablecoin_balance(U256::from(SCENARIO_COST))
        .hold_receipts()
        .build();
    let orchestrator = Arc::new(common::orchestrator(&ledger));

    let flow = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.buy(scenario_request()).await })
    };
    assert!(
        common::eventually(Duration::from_secs(1), || {
            orchestrator.pending_state() == Some(SequencerState::AwaitingApprovalConfirmation)
        })
        .await
    );

    ledger.set_wallet_chain(ChainId(1));
    let err = flow.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        PurchaseError::Failed(ErrorKind::NetworkMismatch(NetworkFailure::ChainChanged {
            expected: ChainId(8453),
            actual: ChainId(1),
        }))
    );
    assert!(ledger
        .submissions()
        .iter()
        .all(|s| matches!(s, Submission::Approval { .. })));
    assert_eq!(orchestrator.pending_state(), None);
}

#[tokio::test]
async fn test_unconfirmed_purchase_keeps_account_pending() {
    let ledger = InMemoryLedger::builder()
        .stablecoin_balance(U256::from(SCENARIO_COST))
        .allowance(U256::from(SCENARIO_COST))
        .hold_receipts()
        .build();
    let orchestrator = common::orchestrator(&ledger);

    let outcome = orchestrator.buy(scenario_request()).await.unwrap();
    assert!(matches!(
        outcome,
        PurchaseOutcome::StillPending {
            stage: PurchaseStage::Purchase,
            ..
        }
    ));
    assert_eq!(
        orchestrator.pending_state(),
        Some(SequencerState::AwaitingPurchaseConfirmation)
    );

    let second = orchestrator.buy(scenario_request()).await;
    assert_eq!(second, Err(PurchaseError::AlreadyPending(ledger.account())));
    let purchases = ledger
        .submissions()
        .into_iter()
        .filter(|s| matches!(s, Submission::Purchase { .. }))
        .count();
    assert_eq!(purchases, 1);

    // Once mined, the account is free; the first purchase spent the balance.
    ledger.release_receipts();
    let third = orchestrator.buy(scenario_request()).await;
    assert_eq!(
        third,
        Err(PurchaseError::Failed(ErrorKind::InsufficientPaymentBalance))
    );
    assert_eq!(orchestrator.pending_state(), None);
}

#[tokio::test]
async fn test_chain_change_while_purchase_confirms_fails() {
    let ledger = InMemoryLedger::builder()
        .stablecoin_balance(U256::from(SCENARIO_COST))
        .allowance(U256::from(SCENARIO_COST))
        .hold_receipts()
        .build();
    let orchestrator = Arc::new(common::orchestrator(&ledger));

    let flow = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.buy(scenario_request()).await })
    };
    assert!(
        common::eventually(Duration::from_secs(1), || {
            orchestrator.pending_state() == Some(SequencerState::AwaitingPurchaseConfirmation)
        })
        .await
    );

    ledger.set_wallet_chain(ChainId(1));
    let err = flow.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        PurchaseError::Failed(ErrorKind::NetworkMismatch(NetworkFailure::ChainChanged {
            expected: ChainId(8453),
            actual: ChainId(1),
        }))
    );
    assert_eq!(
        ledger.submissions(),
        vec![Submission::Purchase {
            token_amount: U256::from(SCENARIO_TOKENS)
        }]
    );
}

#[tokio::test]
async fn test_unknown_network_is_added_before_buying() {
    let ledger = InMemoryLedger::builder()
        .chain(ChainId(1))
        .unknown_chain(ChainId(8453))
        .stablecoin_balance(U256::from(SCENARIO_COST))
        .build();
    let orchestrator = common::orchestrator(&ledger);

    let outcome = orchestrator.buy(scenario_request()).await.unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Completed(_)));
    assert_eq!(ledger.add_requests().len(), 1);
    assert_eq!(ledger.chain_id().await.unwrap(), ChainId(8453));
}

#[tokio::test]
async fn test_cancel_before_submission_has_no_side_effects() {
    let ledger = common::funded_ledger();
    let orchestrator = common::orchestrator(&ledger);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = orchestrator
        .buy_with_cancel(scenario_request(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, PurchaseError::Cancelled);
    assert!(ledger.submissions().is_empty());
    assert!(ledger.switch_requests().is_empty());
}

#[tokio::test]
async fn test_failed_purchase_releases_account() {
    let ledger = common::funded_ledger();
    ledger.fail_next_approval(LedgerError::UserRejected(RawError::with_code(
        4001,
        "User rejected the request.",
    )));
    let orchestrator = common::orchestrator(&ledger);

    let err = orchestrator.buy(scenario_request()).await.unwrap_err();
    assert_eq!(err, PurchaseError::Failed(ErrorKind::UserRejected));
    assert_eq!(orchestrator.pending_state(), None);

    let retry = orchestrator.buy(scenario_request()).await.unwrap();
    assert!(matches!(retry, PurchaseOutcome::Completed(_)));
}

#[tokio::test]
async fn test_fiat_purchase_completes_after_settlement() {
    let ledger = InMemoryLedger::builder().build();
    let orchestrator = common::orchestrator(&ledger);

    let outcome = orchestrator
        .buy(PurchaseRequest::fiat(U256::from(SCENARIO_TOKENS)))
        .await
        .unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Completed(_)));
    assert_eq!(ledger.token_balance_of(ledger.account()), U256::from(100_000u64));
}

#[tokio::test]
async fn test_fiat_second_leg_failure_is_partial_completion() {
    let ledger = InMemoryLedger::builder()
        .allowance(U256::from(SCENARIO_COST))
        .build();
    ledger.fail_next_purchase(LedgerError::Rpc(RawError::message(
        "execution reverted: TokenSoldOut()",
    )));
    let orchestrator = common::orchestrator(&ledger);

    let err = orchestrator
        .buy(PurchaseRequest::fiat(U256::from(SCENARIO_TOKENS)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PurchaseError::Failed(ErrorKind::PartialFiatCompletion {
            stablecoin_acquired: U256::from(SCENARIO_COST),
            cause: Box::new(ErrorKind::SaleSoldOut),
        })
    );
    assert_eq!(
        ledger.stablecoin_balance_of(ledger.account()),
        U256::from(SCENARIO_COST)
    );
}

#[tokio::test]
async fn test_fiat_second_leg_unclassified_revert_is_partial_completion() {
    let ledger = InMemoryLedger::builder()
        .allowance(U256::from(SCENARIO_COST))
        .build();
    ledger.revert_next_purchase();
    let orchestrator = common::orchestrator(&ledger);

    let err = orchestrator
        .buy(PurchaseRequest::fiat(U256::from(SCENARIO_TOKENS)))
        .await
        .unwrap_err();
    let PurchaseError::Failed(ErrorKind::PartialFiatCompletion {
        stablecoin_acquired,
        cause,
    }) = err
    else {
        panic!("expected partial completion, got {:?}", err);
    };
    assert_eq!(stablecoin_acquired, U256::from(SCENARIO_COST));
    assert!(matches!(*cause, ErrorKind::PurchaseFailed { .. }));
    assert_eq!(ledger.token_balance_of(ledger.account()), U256::ZERO);
}

#[tokio::test]
async fn test_fiat_settlement_timeout_is_reported() {
    let ledger = InMemoryLedger::builder().build();
    let orchestrator = common::orchestrator_with(
        &ledger,
        Arc::new(SimulatedOnramp::never_settling(ledger.clone())),
    );

    let outcome = orchestrator
        .buy(PurchaseRequest::fiat(U256::from(SCENARIO_TOKENS)))
        .await
        .unwrap();
    assert!(matches!(outcome, PurchaseOutcome::SettlementPending { .. }));
    assert!(ledger.submissions().is_empty());
    assert_eq!(orchestrator.pending_state(), None);
}

#[tokio::test]
async fn test_fiat_provider_error_is_classified() {
    let ledger = InMemoryLedger::builder().build();
    let orchestrator = common::orchestrator_with(
        &ledger,
        Arc::new(SimulatedOnramp::failing(
            ledger.clone(),
            OnrampError::Provider("card declined".to_string()),
        )),
    );

    let err = orchestrator
        .buy(PurchaseRequest::fiat(U256::from(SCENARIO_TOKENS)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PurchaseError::Failed(ErrorKind::PurchaseFailed {
            message: "card declined".to_string()
        })
    );
}

#[tokio::test]
async fn test_enforcer_returns_wallet_to_target() {
    let ledger = InMemoryLedger::builder().build();
    let orchestrator = common::orchestrator(&ledger);
    let _enforcer = orchestrator.enforce_target_chain();

    ledger.set_wallet_chain(ChainId(1));
    let wallet = ledger.clone();
    assert!(
        common::eventually(Duration::from_secs(1), || {
            wallet.switch_requests() == vec![ChainId(8453)]
        })
        .await
    );
    assert_eq!(ledger.chain_id().await.unwrap(), ChainId(8453));
}
