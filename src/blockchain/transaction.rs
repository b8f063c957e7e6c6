//! Transaction confirmation monitoring.
//!
//! # Responsibilities
//! - Poll receipts of submitted transactions
//! - Count confirmation depth
//! - Bound every wait with a deadline and report "still pending" when it elapses

use std::time::Duration;

use alloy::primitives::TxHash;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::blockchain::ledger::ChainLedger;
use crate::blockchain::types::{ConfirmationStatus, ReceiptStatus};
use crate::config::PurchaseConfig;

/// How long and how deep to wait for a transaction.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    /// Blocks required, counting the inclusion block (1 = mined).
    pub required_blocks: u32,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&PurchaseConfig> for ConfirmationPolicy {
    fn from(config: &PurchaseConfig) -> Self {
        Self {
            required_blocks: config.confirmation_blocks.max(1),
            timeout: Duration::from_secs(config.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
        }
    }
}

/// Wait for a transaction to be confirmed.
///
/// Transient read failures are logged and polling continues until the
/// deadline; the wait itself never fails, it resolves to `StillPending`.
pub async fn wait_for_confirmation(
    ledger: &dyn ChainLedger,
    tx_hash: TxHash,
    policy: ConfirmationPolicy,
) -> ConfirmationStatus {
    let result = timeout(policy.timeout, async {
        let mut ticker = interval(policy.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let receipt = match ledger.receipt_status(tx_hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => {
                    tracing::debug!(tx_hash = %tx_hash, "Transaction pending");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed");
                    continue;
                }
            };

            let tx_block = match receipt {
                ReceiptStatus::Reverted { block_number } => {
                    return ConfirmationStatus::Reverted { block_number };
                }
                ReceiptStatus::Success { block_number } => block_number,
            };

            if policy.required_blocks <= 1 {
                return ConfirmationStatus::Confirmed {
                    block_number: tx_block,
                };
            }

            let current_block = match ledger.block_number().await {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(error = %e, "Block number lookup failed");
                    continue;
                }
            };
            let confirmations = current_block.saturating_sub(tx_block).saturating_add(1);

            if confirmations >= policy.required_blocks as u64 {
                return ConfirmationStatus::Confirmed {
                    block_number: tx_block,
                };
            }

            tracing::debug!(
                tx_hash = %tx_hash,
                confirmations = confirmations,
                required = policy.required_blocks,
                "Waiting for confirmations"
            );
        }
    })
    .await;

    match result {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(
                tx_hash = %tx_hash,
                timeout_secs = policy.timeout.as_secs_f64(),
                "Transaction still pending after confirmation timeout"
            );
            ConfirmationStatus::StillPending
        }
    }
}
