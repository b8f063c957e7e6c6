//! Per-account in-flight purchase registry.
//!
//! At most one purchase per account runs at a time. A claim is an RAII
//! guard: the account is released when the claim drops, however the flow
//! ends, unless the flow left a submitted transaction unmined. Such an
//! account stays pending until a receipt for that transaction shows up.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::blockchain::ledger::ChainLedger;
use crate::purchase::types::SequencerState;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request_id: Uuid,
    state: SequencerState,
    /// Submitted transaction whose confirmation wait ran out.
    unresolved: Option<TxHash>,
}

/// Shared registry of accounts with a purchase in progress.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    entries: Arc<DashMap<Address, InFlight>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `account` for `request_id`, or `None` if a purchase is already pending.
    pub fn claim(&self, account: Address, request_id: Uuid) -> Option<InFlightClaim> {
        match self.entries.entry(account) {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    account = %account,
                    pending = %existing.get().request_id,
                    rejected = %request_id,
                    "Purchase already in flight"
                );
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    request_id,
                    state: SequencerState::Idle,
                    unresolved: None,
                });
                Some(InFlightClaim {
                    registry: self.clone(),
                    account,
                    request_id,
                })
            }
        }
    }

    /// Transaction the account is still waiting on, if its last flow ended unmined.
    pub fn unresolved_tx(&self, account: Address) -> Option<TxHash> {
        self.entries.get(&account).and_then(|entry| entry.unresolved)
    }

    /// Release the account if its unresolved transaction has been mined since.
    ///
    /// A failed receipt lookup keeps the account pending.
    pub async fn release_if_mined(&self, ledger: &dyn ChainLedger, account: Address) {
        let Some(tx_hash) = self.unresolved_tx(account) else {
            return;
        };
        match ledger.receipt_status(tx_hash).await {
            Ok(Some(receipt)) => {
                tracing::info!(
                    account = %account,
                    tx_hash = %tx_hash,
                    receipt = ?receipt,
                    "Unresolved transaction mined, releasing account"
                );
                self.entries
                    .remove_if(&account, |_, entry| entry.unresolved == Some(tx_hash));
            }
            Ok(None) => {
                tracing::debug!(account = %account, tx_hash = %tx_hash, "Transaction still unmined");
            }
            Err(e) => {
                tracing::warn!(account = %account, tx_hash = %tx_hash, error = %e, "Receipt lookup failed");
            }
        }
    }

    pub fn is_pending(&self, account: Address) -> bool {
        self.entries.contains_key(&account)
    }

    /// Current state of the account's in-flight purchase.
    pub fn state_of(&self, account: Address) -> Option<SequencerState> {
        self.entries.get(&account).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exclusive hold on an account's purchase slot.
#[derive(Debug)]
pub struct InFlightClaim {
    registry: InFlightRegistry,
    account: Address,
    request_id: Uuid,
}

impl InFlightClaim {
    pub fn account(&self) -> Address {
        self.account
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Publish a state transition.
    pub fn transition(&self, next: SequencerState) {
        if let Some(mut entry) = self.registry.entries.get_mut(&self.account) {
            if entry.state != next {
                tracing::debug!(
                    request_id = %self.request_id,
                    from = ?entry.state,
                    to = ?next,
                    "Purchase state transition"
                );
                entry.state = next;
            }
        }
    }

    /// Keep the account pending after this claim drops, until `tx_hash` is mined.
    pub fn hold_until_mined(&self, tx_hash: TxHash) {
        if let Some(mut entry) = self.registry.entries.get_mut(&self.account) {
            if entry.request_id == self.request_id {
                tracing::warn!(
                    request_id = %self.request_id,
                    tx_hash = %tx_hash,
                    "Account stays pending until the transaction is mined"
                );
                entry.unresolved = Some(tx_hash);
            }
        }
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.registry.entries.remove_if(&self.account, |_, entry| {
            entry.request_id == self.request_id && entry.unresolved.is_none()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_refused() {
        let registry = InFlightRegistry::new();
        let account = Address::repeat_byte(1);

        let claim = registry.claim(account, Uuid::new_v4()).unwrap();
        assert!(registry.claim(account, Uuid::new_v4()).is_none());
        assert!(registry.is_pending(account));

        drop(claim);
        assert!(!registry.is_pending(account));
        assert!(registry.claim(account, Uuid::new_v4()).is_some());
    }

    #[test]
    fn test_accounts_are_independent() {
        let registry = InFlightRegistry::new();
        let _a = registry.claim(Address::repeat_byte(1), Uuid::new_v4()).unwrap();
        let _b = registry.claim(Address::repeat_byte(2), Uuid::new_v4()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_transition_is_visible() {
        let registry = InFlightRegistry::new();
        let account = Address::repeat_byte(3);
        let claim = registry.claim(account, Uuid::new_v4()).unwrap();
        assert_eq!(registry.state_of(account), Some(SequencerState::Idle));

        claim.transition(SequencerState::Approving);
        assert_eq!(registry.state_of(account), Some(SequencerState::Approving));

        drop(claim);
        assert_eq!(registry.state_of(account), None);
    }

    #[tokio::test]
    async fn test_unmined_transaction_keeps_account_pending() {
        use crate::blockchain::InMemoryLedger;
        use alloy::primitives::U256;

        let ledger = InMemoryLedger::builder()
            .stablecoin_balance(U256::from(10_000_000u64))
            .allowance(U256::from(10_000_000u64))
            .hold_receipts()
            .build();
        let account = ledger.account();
        let tx_hash = ledger.submit_purchase(U256::from(1000u64)).await.unwrap();

        let registry = InFlightRegistry::new();
        let claim = registry.claim(account, Uuid::new_v4()).unwrap();
        claim.transition(SequencerState::AwaitingPurchaseConfirmation);
        claim.hold_until_mined(tx_hash);
        drop(claim);

        assert!(registry.is_pending(account));
        assert_eq!(registry.unresolved_tx(account), Some(tx_hash));
        assert_eq!(
            registry.state_of(account),
            Some(SequencerState::AwaitingPurchaseConfirmation)
        );
        assert!(registry.claim(account, Uuid::new_v4()).is_none());

        registry.release_if_mined(&ledger, account).await;
        assert!(registry.is_pending(account));

        ledger.release_receipts();
        registry.release_if_mined(&ledger, account).await;
        assert!(!registry.is_pending(account));
        assert!(registry.claim(account, Uuid::new_v4()).is_some());
    }
}
