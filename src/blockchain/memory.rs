//! Deterministic in-process ledger.
//!
//! Models the wallet (connected chain, known chains, switch/add behaviour),
//! the sale contract, the stablecoin and the sale token closely enough to
//! drive the whole purchase flow without a node: submissions are simulated
//! first and rejected with the sale contract's custom-error payloads, mined
//! transactions apply their balance effects, and notifications are broadcast
//! when the wallet changes network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::sol_types::SolError;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::blockchain::contracts::IPresale;
use crate::blockchain::ledger::{subscription_from_broadcast, ChainLedger, ChainSubscription};
use crate::blockchain::types::{
    AssetDescriptor, ChainId, LedgerError, LedgerResult, NetworkDescriptor, RawError,
    ReceiptStatus, TokenInfo, USER_REJECTED_CODE,
};

/// How the simulated wallet answers a switch/add/watch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletBehavior {
    Accept,
    /// EIP-1193 4001.
    Reject,
    /// Any other provider failure.
    Fail(String),
}

/// A transaction accepted by the simulated wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Approval { spender: Address, amount: U256 },
    Purchase { token_amount: U256 },
}

#[derive(Debug, Clone)]
enum Scripted {
    Reject(LedgerError),
    /// Mine reverted; the replay yields the payload, if any.
    Revert(Option<RawError>),
}

#[derive(Debug)]
struct State {
    chain: ChainId,
    known_chains: HashSet<ChainId>,
    switch_behavior: WalletBehavior,
    add_behavior: WalletBehavior,
    watch_behavior: WalletBehavior,

    account: Address,
    sale: Address,
    token_name: String,
    token_symbol: String,
    token_decimals: u8,
    available: U256,
    total_sold: U256,
    price: U256,
    presale_active: bool,
    stablecoin_enabled: bool,

    stablecoin: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    tokens: HashMap<Address, U256>,

    block: u64,
    tx_counter: u64,
    hold_receipts: bool,
    receipts: HashMap<TxHash, ReceiptStatus>,
    revert_reasons: HashMap<TxHash, RawError>,
    held: Vec<(TxHash, Submission)>,

    approval_script: VecDeque<Scripted>,
    purchase_script: VecDeque<Scripted>,
    chain_after_submission: Option<ChainId>,

    submissions: Vec<Submission>,
    switch_requests: Vec<ChainId>,
    add_requests: Vec<NetworkDescriptor>,
    watch_requests: Vec<AssetDescriptor>,
    allowance_reads: usize,
    balance_reads: usize,
}

struct Inner {
    state: Mutex<State>,
    chain_tx: broadcast::Sender<ChainId>,
}

/// In-memory [`ChainLedger`].
#[derive(Clone)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

/// Builder for [`InMemoryLedger`]; defaults describe an active Base sale at 0.01 USDC.
pub struct InMemoryLedgerBuilder {
    state: State,
}

impl InMemoryLedgerBuilder {
    pub fn account(mut self, account: Address) -> Self {
        self.state.account = account;
        self
    }

    pub fn sale_contract(mut self, sale: Address) -> Self {
        self.state.sale = sale;
        self
    }

    /// Chain the wallet starts on; the chain is also known to the wallet.
    pub fn chain(mut self, chain: ChainId) -> Self {
        self.state.chain = chain;
        self.state.known_chains.insert(chain);
        self
    }

    pub fn known_chain(mut self, chain: ChainId) -> Self {
        self.state.known_chains.insert(chain);
        self
    }

    /// Forget a chain so switching to it requires `wallet_addEthereumChain`.
    pub fn unknown_chain(mut self, chain: ChainId) -> Self {
        self.state.known_chains.remove(&chain);
        self
    }

    pub fn switch_behavior(mut self, behavior: WalletBehavior) -> Self {
        self.state.switch_behavior = behavior;
        self
    }

    pub fn add_behavior(mut self, behavior: WalletBehavior) -> Self {
        self.state.add_behavior = behavior;
        self
    }

    pub fn watch_behavior(mut self, behavior: WalletBehavior) -> Self {
        self.state.watch_behavior = behavior;
        self
    }

    pub fn price_per_token(mut self, price: U256) -> Self {
        self.state.price = price;
        self
    }

    pub fn available_tokens(mut self, available: U256) -> Self {
        self.state.available = available;
        self
    }

    pub fn total_sold(mut self, sold: U256) -> Self {
        self.state.total_sold = sold;
        self
    }

    pub fn token_decimals(mut self, decimals: u8) -> Self {
        self.state.token_decimals = decimals;
        self
    }

    pub fn presale_active(mut self, active: bool) -> Self {
        self.state.presale_active = active;
        self
    }

    pub fn stablecoin_payment_enabled(mut self, enabled: bool) -> Self {
        self.state.stablecoin_enabled = enabled;
        self
    }

    /// Stablecoin balance of the signing account.
    pub fn stablecoin_balance(mut self, balance: U256) -> Self {
        let account = self.state.account;
        self.state.stablecoin.insert(account, balance);
        self
    }

    /// Allowance the signing account has granted the sale contract.
    pub fn allowance(mut self, allowance: U256) -> Self {
        let key = (self.state.account, self.state.sale);
        self.state.allowances.insert(key, allowance);
        self
    }

    /// Keep submitted transactions unmined until [`InMemoryLedger::release_receipts`].
    pub fn hold_receipts(mut self) -> Self {
        self.state.hold_receipts = true;
        self
    }

    pub fn build(self) -> InMemoryLedger {
        let (chain_tx, _) = broadcast::channel(16);
        InMemoryLedger {
            inner: Arc::new(Inner {
                state: Mutex::new(self.state),
                chain_tx,
            }),
        }
    }
}

impl InMemoryLedger {
    pub fn builder() -> InMemoryLedgerBuilder {
        let target = ChainId(8453);
        let mut known_chains = HashSet::new();
        known_chains.insert(target);
        known_chains.insert(ChainId(1));

        InMemoryLedgerBuilder {
            state: State {
                chain: target,
                known_chains,
                switch_behavior: WalletBehavior::Accept,
                add_behavior: WalletBehavior::Accept,
                watch_behavior: WalletBehavior::Accept,
                account: Address::repeat_byte(0xAA),
                sale: Address::repeat_byte(0x5A),
                token_name: "Motra".to_string(),
                token_symbol: "MOTRA".to_string(),
                token_decimals: 2,
                available: U256::from(900_000_000u64),
                total_sold: U256::from(100_000_000u64),
                price: U256::from(10_000u64),
                presale_active: true,
                stablecoin_enabled: true,
                stablecoin: HashMap::new(),
                allowances: HashMap::new(),
                tokens: HashMap::new(),
                block: 1,
                tx_counter: 0,
                hold_receipts: false,
                receipts: HashMap::new(),
                revert_reasons: HashMap::new(),
                held: Vec::new(),
                approval_script: VecDeque::new(),
                purchase_script: VecDeque::new(),
                chain_after_submission: None,
                submissions: Vec::new(),
                switch_requests: Vec::new(),
                add_requests: Vec::new(),
                watch_requests: Vec::new(),
                allowance_reads: 0,
                balance_reads: 0,
            },
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_chain(&self, chain: ChainId) {
        let _ = self.inner.chain_tx.send(chain);
    }

    /// Simulate the user picking another network in the wallet.
    pub fn set_wallet_chain(&self, chain: ChainId) {
        self.state().chain = chain;
        self.notify_chain(chain);
    }

    /// Set the stablecoin balance of any holder.
    pub fn set_stablecoin_balance(&self, holder: Address, balance: U256) {
        self.state().stablecoin.insert(holder, balance);
    }

    /// Increase a holder's stablecoin balance, as a settling fiat purchase would.
    pub fn credit_stablecoin(&self, holder: Address, amount: U256) {
        let mut state = self.state();
        let balance = state.stablecoin.entry(holder).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Credit the stablecoin after `delay` from a background task.
    pub fn credit_stablecoin_after(&self, holder: Address, amount: U256, delay: Duration) {
        let ledger = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            ledger.credit_stablecoin(holder, amount);
        });
    }

    /// Overwrite an allowance, as a transaction sent from elsewhere would.
    pub fn set_allowance(&self, owner: Address, allowance: U256) {
        let mut state = self.state();
        let sale = state.sale;
        state.allowances.insert((owner, sale), allowance);
    }

    pub fn set_presale_active(&self, active: bool) {
        self.state().presale_active = active;
    }

    /// Reject the next approval submission with `error`.
    pub fn fail_next_approval(&self, error: LedgerError) {
        self.state().approval_script.push_back(Scripted::Reject(error));
    }

    /// Reject the next purchase submission with `error`.
    pub fn fail_next_purchase(&self, error: LedgerError) {
        self.state().purchase_script.push_back(Scripted::Reject(error));
    }

    /// Mine the next approval with a reverted receipt.
    pub fn revert_next_approval(&self) {
        self.state().approval_script.push_back(Scripted::Revert(None));
    }

    /// Mine the next purchase with a reverted receipt and no recoverable reason.
    pub fn revert_next_purchase(&self) {
        self.state().purchase_script.push_back(Scripted::Revert(None));
    }

    /// Mine the next purchase reverted; replaying it yields `reason`.
    pub fn revert_next_purchase_with(&self, reason: RawError) {
        self.state().purchase_script.push_back(Scripted::Revert(Some(reason)));
    }

    /// After the next accepted submission the wallet reports `chain`.
    pub fn change_chain_on_next_submission(&self, chain: ChainId) {
        self.state().chain_after_submission = Some(chain);
    }

    /// Produce `count` empty blocks.
    pub fn advance_blocks(&self, count: u64) {
        self.state().block += count;
    }

    /// Mine every held transaction.
    pub fn release_receipts(&self) {
        let mut state = self.state();
        state.hold_receipts = false;
        let held = std::mem::take(&mut state.held);
        for (hash, submission) in held {
            state.block += 1;
            let block_number = state.block;
            apply_effects(&mut state, &submission);
            state.receipts.insert(hash, ReceiptStatus::Success { block_number });
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn switch_requests(&self) -> Vec<ChainId> {
        self.state().switch_requests.clone()
    }

    pub fn add_requests(&self) -> Vec<NetworkDescriptor> {
        self.state().add_requests.clone()
    }

    pub fn watch_requests(&self) -> Vec<AssetDescriptor> {
        self.state().watch_requests.clone()
    }

    pub fn allowance_reads(&self) -> usize {
        self.state().allowance_reads
    }

    pub fn balance_reads(&self) -> usize {
        self.state().balance_reads
    }

    pub fn stablecoin_balance_of(&self, holder: Address) -> U256 {
        self.state().stablecoin.get(&holder).copied().unwrap_or_default()
    }

    pub fn token_balance_of(&self, holder: Address) -> U256 {
        self.state().tokens.get(&holder).copied().unwrap_or_default()
    }

    fn wallet_answer(behavior: &WalletBehavior, what: &str) -> LedgerResult<()> {
        match behavior {
            WalletBehavior::Accept => Ok(()),
            WalletBehavior::Reject => Err(LedgerError::UserRejected(RawError::with_code(
                USER_REJECTED_CODE,
                format!("User rejected the {} request", what),
            ))),
            WalletBehavior::Fail(message) => Err(LedgerError::Rpc(RawError::message(message.clone()))),
        }
    }

    /// Record an accepted transaction and mine it unless receipts are held.
    ///
    /// `revert` mines it reverted straight away, with the replay payload if any.
    fn accept(
        &self,
        state: &mut State,
        submission: Submission,
        revert: Option<Option<RawError>>,
    ) -> TxHash {
        state.tx_counter += 1;
        let hash = TxHash::left_padding_from(&state.tx_counter.to_be_bytes());
        state.submissions.push(submission.clone());

        if let Some(reason) = revert {
            state.block += 1;
            let block_number = state.block;
            state.receipts.insert(hash, ReceiptStatus::Reverted { block_number });
            if let Some(reason) = reason {
                state.revert_reasons.insert(hash, reason);
            }
        } else if state.hold_receipts {
            state.held.push((hash, submission));
        } else {
            state.block += 1;
            let block_number = state.block;
            apply_effects(state, &submission);
            state.receipts.insert(hash, ReceiptStatus::Success { block_number });
        }

        if let Some(chain) = state.chain_after_submission.take() {
            state.chain = chain;
            self.notify_chain(chain);
        }
        hash
    }
}

fn revert_with<E: SolError>(name: &str) -> LedgerError {
    LedgerError::Rpc(RawError::revert(
        Bytes::from(E::SELECTOR.to_vec()),
        format!("execution reverted: {}()", name),
    ))
}

fn purchase_cost(state: &State, token_amount: U256) -> (U256, U256) {
    let cost = token_amount.saturating_mul(state.price);
    let minor = token_amount.saturating_mul(U256::from(10u64).pow(U256::from(state.token_decimals)));
    (cost, minor)
}

/// Pre-submission simulation of `buyTokenWithUSDT`, in contract check order.
fn simulate_purchase(state: &State, token_amount: U256) -> LedgerResult<()> {
    if !state.presale_active || !state.stablecoin_enabled {
        return Err(revert_with::<IPresale::PresaleNotActive>("PresaleNotActive"));
    }
    if token_amount.is_zero() {
        return Err(revert_with::<IPresale::ZeroAmount>("ZeroAmount"));
    }
    let (cost, minor) = purchase_cost(state, token_amount);
    if minor > state.available {
        return Err(revert_with::<IPresale::TokenSoldOut>("TokenSoldOut"));
    }
    let balance = state.stablecoin.get(&state.account).copied().unwrap_or_default();
    if balance < cost {
        return Err(revert_with::<IPresale::InsufficientUSDT>("InsufficientUSDT"));
    }
    let allowance = state
        .allowances
        .get(&(state.account, state.sale))
        .copied()
        .unwrap_or_default();
    if allowance < cost {
        return Err(revert_with::<IPresale::TransferFailed>("TransferFailed"));
    }
    Ok(())
}

fn apply_effects(state: &mut State, submission: &Submission) {
    match submission {
        Submission::Approval { spender, amount } => {
            let key = (state.account, *spender);
            state.allowances.insert(key, *amount);
        }
        Submission::Purchase { token_amount } => {
            let (cost, minor) = purchase_cost(state, *token_amount);
            let account = state.account;
            let sale = state.sale;
            let balance = state.stablecoin.entry(account).or_default();
            *balance = balance.saturating_sub(cost);
            let allowance = state.allowances.entry((account, sale)).or_default();
            *allowance = allowance.saturating_sub(cost);
            let tokens = state.tokens.entry(account).or_default();
            *tokens = tokens.saturating_add(minor);
            state.available = state.available.saturating_sub(minor);
            state.total_sold = state.total_sold.saturating_add(minor);
        }
    }
}

#[async_trait]
impl ChainLedger for InMemoryLedger {
    async fn chain_id(&self) -> LedgerResult<ChainId> {
        Ok(self.state().chain)
    }

    fn chain_changes(&self) -> ChainSubscription {
        subscription_from_broadcast(self.inner.chain_tx.subscribe())
    }

    async fn switch_chain(&self, chain: ChainId) -> LedgerResult<()> {
        let changed = {
            let mut state = self.state();
            state.switch_requests.push(chain);
            Self::wallet_answer(&state.switch_behavior, "switch chain")?;
            if !state.known_chains.contains(&chain) {
                return Err(LedgerError::UnrecognizedChain(chain));
            }
            let changed = state.chain != chain;
            state.chain = chain;
            changed
        };
        if changed {
            self.notify_chain(chain);
        }
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkDescriptor) -> LedgerResult<()> {
        let mut state = self.state();
        state.add_requests.push(network.clone());
        Self::wallet_answer(&state.add_behavior, "add chain")?;
        state.known_chains.insert(network.chain_id);
        Ok(())
    }

    async fn watch_asset(&self, asset: &AssetDescriptor) -> LedgerResult<bool> {
        let mut state = self.state();
        state.watch_requests.push(asset.clone());
        Self::wallet_answer(&state.watch_behavior, "watch asset")?;
        Ok(true)
    }

    fn account(&self) -> Address {
        self.state().account
    }

    fn sale_contract(&self) -> Address {
        self.state().sale
    }

    async fn token_info(&self) -> LedgerResult<TokenInfo> {
        let state = self.state();
        Ok(TokenInfo {
            name: state.token_name.clone(),
            symbol: state.token_symbol.clone(),
            available_tokens: state.available,
            price_per_token: state.price,
            presale_active: state.presale_active,
            stablecoin_payment_enabled: state.stablecoin_enabled,
        })
    }

    async fn total_sold(&self) -> LedgerResult<U256> {
        Ok(self.state().total_sold)
    }

    async fn stablecoin_balance(&self, holder: Address) -> LedgerResult<U256> {
        let mut state = self.state();
        state.balance_reads += 1;
        Ok(state.stablecoin.get(&holder).copied().unwrap_or_default())
    }

    async fn stablecoin_allowance(&self, owner: Address, spender: Address) -> LedgerResult<U256> {
        let mut state = self.state();
        state.allowance_reads += 1;
        Ok(state.allowances.get(&(owner, spender)).copied().unwrap_or_default())
    }

    async fn sale_token_balance(&self, holder: Address) -> LedgerResult<U256> {
        Ok(self.state().tokens.get(&holder).copied().unwrap_or_default())
    }

    async fn sale_token_decimals(&self) -> LedgerResult<u8> {
        Ok(self.state().token_decimals)
    }

    async fn submit_approval(&self, spender: Address, amount: U256) -> LedgerResult<TxHash> {
        let mut state = self.state();
        let revert = match state.approval_script.pop_front() {
            Some(Scripted::Reject(error)) => return Err(error),
            Some(Scripted::Revert(reason)) => Some(reason),
            None => None,
        };
        Ok(self.accept(&mut state, Submission::Approval { spender, amount }, revert))
    }

    async fn submit_purchase(&self, token_amount: U256) -> LedgerResult<TxHash> {
        let mut state = self.state();
        let revert = match state.purchase_script.pop_front() {
            Some(Scripted::Reject(error)) => return Err(error),
            Some(Scripted::Revert(reason)) => Some(reason),
            None => None,
        };
        if revert.is_none() {
            simulate_purchase(&state, token_amount)?;
        }
        Ok(self.accept(&mut state, Submission::Purchase { token_amount }, revert))
    }

    async fn block_number(&self) -> LedgerResult<u64> {
        Ok(self.state().block)
    }

    async fn receipt_status(&self, tx_hash: TxHash) -> LedgerResult<Option<ReceiptStatus>> {
        Ok(self.state().receipts.get(&tx_hash).copied())
    }

    async fn revert_reason(&self, tx_hash: TxHash, _block_number: u64) -> LedgerResult<Option<RawError>> {
        Ok(self.state().revert_reasons.get(&tx_hash).cloned())
    }
}
