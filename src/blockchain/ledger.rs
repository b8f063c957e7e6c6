//! The ledger seam consumed by the purchase flow.
//!
//! Everything the purchase flow knows about the chain, the wallet and the
//! three contracts goes through [`ChainLedger`]. Handles are injected through
//! constructors; there are no global contract bindings.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::blockchain::types::{
    AssetDescriptor, ChainId, LedgerResult, NetworkDescriptor, RawError, ReceiptStatus, TokenInfo,
};

/// Stream of chain ids reported by the wallet after each network change.
///
/// Dropping the stream unsubscribes.
pub type ChainSubscription = BoxStream<'static, ChainId>;

/// Read/write access to the designated chain and its wallet.
#[async_trait]
pub trait ChainLedger: Send + Sync {
    /// Chain the wallet is currently connected to.
    async fn chain_id(&self) -> LedgerResult<ChainId>;

    /// Subscribe to network-change notifications.
    fn chain_changes(&self) -> ChainSubscription;

    /// Ask the wallet to switch to `chain`.
    async fn switch_chain(&self, chain: ChainId) -> LedgerResult<()>;

    /// Ask the wallet to add (and usually select) a network.
    async fn add_chain(&self, network: &NetworkDescriptor) -> LedgerResult<()>;

    /// Ask the wallet to track an ERC-20 asset. Returns whether the user accepted.
    async fn watch_asset(&self, asset: &AssetDescriptor) -> LedgerResult<bool>;

    /// Account the wallet signs for.
    fn account(&self) -> Address;

    /// Address of the sale contract (spender of the stablecoin allowance).
    fn sale_contract(&self) -> Address;

    /// `getTokenInfo()` on the sale contract.
    async fn token_info(&self) -> LedgerResult<TokenInfo>;

    /// `totalSoldTokens()` on the sale contract.
    async fn total_sold(&self) -> LedgerResult<U256>;

    /// Stablecoin `balanceOf(holder)`.
    async fn stablecoin_balance(&self, holder: Address) -> LedgerResult<U256>;

    /// Stablecoin `allowance(owner, spender)`.
    async fn stablecoin_allowance(&self, owner: Address, spender: Address) -> LedgerResult<U256>;

    /// Sale token `balanceOf(holder)`.
    async fn sale_token_balance(&self, holder: Address) -> LedgerResult<U256>;

    /// Sale token `decimals()`.
    async fn sale_token_decimals(&self) -> LedgerResult<u8>;

    /// Submit stablecoin `approve(spender, amount)`. Returns once the wallet accepted it.
    async fn submit_approval(&self, spender: Address, amount: U256) -> LedgerResult<TxHash>;

    /// Submit `buyTokenWithUSDT(token_amount)`. Returns once the wallet accepted it.
    async fn submit_purchase(&self, token_amount: U256) -> LedgerResult<TxHash>;

    /// Latest block number.
    async fn block_number(&self) -> LedgerResult<u64>;

    /// Receipt state of a transaction, `None` while it is not mined.
    async fn receipt_status(&self, tx_hash: TxHash) -> LedgerResult<Option<ReceiptStatus>>;

    /// Replay a transaction reverted in `block_number` to recover its revert payload.
    ///
    /// `None` when the replay does not revert or the transaction is unknown.
    async fn revert_reason(&self, tx_hash: TxHash, block_number: u64) -> LedgerResult<Option<RawError>>;
}

/// Shared ledger handle.
pub type SharedLedger = Arc<dyn ChainLedger>;

/// Adapt a broadcast receiver into a [`ChainSubscription`].
///
/// Lagged receivers skip to the most recent notifications; the stream ends
/// when the sender is dropped and keeps yielding `None` afterwards.
pub fn subscription_from_broadcast(rx: broadcast::Receiver<ChainId>) -> ChainSubscription {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(chain) => return Some((chain, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Chain subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .fuse()
    .boxed()
}
