//! Target-chain enforcement.
//!
//! # Responsibilities
//! - Bring the wallet onto the configured chain before any stateful call
//! - Add the chain to the wallet when it is unknown, then switch again
//! - Verify the switch by re-reading the chain id
//! - Optionally re-enforce in the background whenever the wallet moves away

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::blockchain::ledger::SharedLedger;
use crate::blockchain::types::{ChainId, LedgerError, NetworkDescriptor};
use crate::observability::metrics;
use crate::purchase::types::NetworkFailure;

/// Result of a successful [`NetworkGuard::ensure_target_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    /// Already on the target chain.
    Ready,
    /// Switched (and possibly added) during this call.
    Switched,
}

/// Keeps the wallet on the target chain.
pub struct NetworkGuard {
    ledger: SharedLedger,
    target: NetworkDescriptor,
}

impl NetworkGuard {
    pub fn new(ledger: SharedLedger, target: NetworkDescriptor) -> Self {
        Self { ledger, target }
    }

    pub fn target(&self) -> ChainId {
        self.target.chain_id
    }

    pub fn descriptor(&self) -> &NetworkDescriptor {
        &self.target
    }

    /// Make sure the wallet is on the target chain.
    ///
    /// Idempotent: when already there no wallet request is made.
    pub async fn ensure_target_chain(&self) -> Result<GuardStatus, NetworkFailure> {
        let target = self.target();
        let current = self.current_chain().await?;
        if current == target {
            return Ok(GuardStatus::Ready);
        }

        tracing::info!(current = %current, target = %target, "Switching wallet to target chain");
        let result = self.switch_or_add(target).await;
        let result = match result {
            Ok(()) => self.verify(target).await,
            Err(failure) => Err(failure),
        };

        match &result {
            Ok(_) => {
                metrics::record_network_switch("switched");
                tracing::info!(chain = %target, "Wallet on target chain");
            }
            Err(failure) => {
                metrics::record_network_switch(failure_label(failure));
                tracing::warn!(target = %target, error = %failure, "Network switch failed");
            }
        }
        result
    }

    async fn current_chain(&self) -> Result<ChainId, NetworkFailure> {
        self.ledger
            .chain_id()
            .await
            .map_err(|e| NetworkFailure::Provider(e.to_string()))
    }

    async fn switch_or_add(&self, target: ChainId) -> Result<(), NetworkFailure> {
        match self.ledger.switch_chain(target).await {
            Ok(()) => Ok(()),
            Err(LedgerError::UserRejected(_)) => Err(NetworkFailure::UserRejected),
            Err(LedgerError::UnrecognizedChain(_)) => {
                tracing::info!(chain = %target, name = %self.target.chain_name, "Adding chain to wallet");
                self.ledger
                    .add_chain(&self.target)
                    .await
                    .map_err(|e| NetworkFailure::AddChainFailed(e.to_string()))?;

                match self.ledger.switch_chain(target).await {
                    Ok(()) => Ok(()),
                    Err(LedgerError::UserRejected(_)) => Err(NetworkFailure::UserRejected),
                    Err(e) => Err(NetworkFailure::Provider(e.to_string())),
                }
            }
            Err(e) => Err(NetworkFailure::Provider(e.to_string())),
        }
    }

    async fn verify(&self, target: ChainId) -> Result<GuardStatus, NetworkFailure> {
        let actual = self.current_chain().await?;
        if actual == target {
            Ok(GuardStatus::Switched)
        } else {
            Err(NetworkFailure::StillOffTarget { actual })
        }
    }

    /// Re-enforce the target chain each time the wallet reports another one.
    ///
    /// The subscription is taken before this returns, so no change after the
    /// call is missed. The latest failure, if any, is published on the handle.
    pub fn spawn_enforcer(self: &Arc<Self>) -> EnforcerHandle {
        let mut changes = self.ledger.chain_changes();
        let (failures_tx, failures_rx) = watch::channel(None);
        let guard = Arc::clone(self);

        let task = tokio::spawn(async move {
            while let Some(chain) = changes.next().await {
                if chain == guard.target() {
                    let _ = failures_tx.send(None);
                    continue;
                }
                tracing::warn!(chain = %chain, target = %guard.target(), "Wallet left target chain");
                let failure = guard.ensure_target_chain().await.err();
                let _ = failures_tx.send(failure);
            }
            tracing::debug!("Chain change stream closed; enforcer exiting");
        });

        EnforcerHandle {
            task,
            failures: failures_rx,
        }
    }
}

fn failure_label(failure: &NetworkFailure) -> &'static str {
    match failure {
        NetworkFailure::UserRejected => "user_rejected",
        NetworkFailure::AddChainFailed(_) => "add_failed",
        NetworkFailure::Provider(_) => "provider_error",
        NetworkFailure::StillOffTarget { .. } => "still_off_target",
        NetworkFailure::ChainChanged { .. } => "chain_changed",
    }
}

/// Background enforcement task. Stops when dropped or cancelled.
#[derive(Debug)]
pub struct EnforcerHandle {
    task: JoinHandle<()>,
    failures: watch::Receiver<Option<NetworkFailure>>,
}

impl EnforcerHandle {
    /// Latest enforcement failure; cleared once the wallet is back on target.
    pub fn last_failure(&self) -> Option<NetworkFailure> {
        self.failures.borrow().clone()
    }

    /// Receiver to await enforcement results.
    pub fn failures(&self) -> watch::Receiver<Option<NetworkFailure>> {
        self.failures.clone()
    }

    /// Stop enforcing.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for EnforcerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
