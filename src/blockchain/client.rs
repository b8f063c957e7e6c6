//! Alloy-backed ledger client with timeout and failover handling.
//!
//! # Responsibilities
//! - Connect to the JSON-RPC endpoint (wallet) and read-only failovers
//! - Read sale, stablecoin and sale-token state through generated bindings
//! - Sign and submit approval/purchase transactions with the local wallet
//! - Forward EIP-1193 wallet requests (switch/add chain, watch asset)
//! - Turn `eth_chainId` polling into network-change notifications

use std::future::Future;
use std::time::Duration;

use alloy::eips::BlockId;
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::TransportError;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::blockchain::contracts::{IPresale, IERC20};
use crate::blockchain::ledger::{subscription_from_broadcast, ChainLedger, ChainSubscription};
use crate::blockchain::types::{
    AssetDescriptor, ChainId, LedgerError, LedgerResult, NetworkDescriptor, RawError,
    ReceiptStatus, TokenInfo,
};
use crate::blockchain::wallet::Wallet;
use crate::config::{ClientConfig, ContractsConfig};
use crate::observability::metrics;

/// Ledger client for the designated chain.
pub struct AlloyLedger {
    /// Read providers (primary + failovers).
    readers: Vec<DynProvider>,
    /// Primary endpoint with the signing wallet attached; also the wallet endpoint.
    signer: DynProvider,
    account: Address,
    sale: Address,
    stablecoin: Address,
    token: Address,
    timeout_duration: Duration,
    chain_tx: broadcast::Sender<ChainId>,
    chain_poller: JoinHandle<()>,
    rpc_url: String,
}

fn parse_address(field: &str, value: &str) -> LedgerResult<Address> {
    value
        .parse()
        .map_err(|e| LedgerError::NotAvailable(format!("Invalid {} '{}': {}", field, value, e)))
}

/// Sale, stablecoin and sale-token addresses.
fn contract_addresses(contracts: &ContractsConfig) -> LedgerResult<(Address, Address, Address)> {
    Ok((
        parse_address("sale address", &contracts.sale_address)?,
        parse_address("stablecoin address", &contracts.stablecoin_address)?,
        parse_address("token address", &contracts.token_address)?,
    ))
}

fn parse_url(value: &str) -> LedgerResult<url::Url> {
    value
        .parse()
        .map_err(|e| LedgerError::NotAvailable(format!("Invalid RPC URL '{}': {}", value, e)))
}

/// Provider payload → raw error, keeping code and revert data.
fn rpc_raw(err: &TransportError) -> RawError {
    match err.as_error_resp() {
        Some(payload) => RawError {
            code: Some(payload.code),
            message: payload.message.to_string(),
            revert_data: payload.as_revert_data(),
        },
        None => RawError::message(err.to_string()),
    }
}

fn contract_raw(err: &alloy::contract::Error) -> RawError {
    match err {
        alloy::contract::Error::TransportError(e) => rpc_raw(e),
        other => RawError {
            code: None,
            message: other.to_string(),
            revert_data: other.as_revert_data(),
        },
    }
}

impl AlloyLedger {
    /// Connect to the configured endpoints.
    ///
    /// A chain mismatch at startup is logged, not fatal: the network guard
    /// owns bringing the wallet onto the target chain.
    pub async fn connect(config: &ClientConfig, wallet: &Wallet) -> LedgerResult<Self> {
        let rpc = &config.rpc;
        let timeout_duration = Duration::from_secs(rpc.rpc_timeout_secs);

        let primary_url = parse_url(&rpc.rpc_url)?;
        let mut readers = vec![ProviderBuilder::new().connect_http(primary_url.clone()).erased()];
        for url_str in &rpc.failover_urls {
            match url_str.parse() {
                Ok(url) => readers.push(ProviderBuilder::new().connect_http(url).erased()),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let signer = ProviderBuilder::new()
            .wallet(wallet.ethereum_wallet())
            .connect_http(primary_url)
            .erased();

        // Everything fallible happens before the poller is spawned.
        let (sale, stablecoin, token) = contract_addresses(&config.contracts)?;

        let (chain_tx, _) = broadcast::channel(16);
        let chain_poller = spawn_chain_poller(
            signer.clone(),
            chain_tx.clone(),
            Duration::from_millis(rpc.chain_poll_interval_ms),
            timeout_duration,
        );

        let client = Self {
            readers,
            signer,
            account: wallet.address(),
            sale,
            stablecoin,
            token,
            timeout_duration,
            chain_tx,
            chain_poller,
            rpc_url: rpc.rpc_url.clone(),
        };

        match client.chain_id().await {
            Ok(chain) if chain.0 == config.network.chain_id => {
                tracing::info!(rpc_url = %rpc.rpc_url, chain_id = chain.0, "Ledger client initialized");
            }
            Ok(chain) => {
                tracing::warn!(
                    expected = config.network.chain_id,
                    actual = chain.0,
                    "Ledger client initialized on a different chain"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ledger client initialized but chain query failed");
            }
        }

        Ok(client)
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_duration.as_secs()
    }

    /// Run a read against each provider in turn until one answers in time.
    async fn read<T, F, Fut>(&self, op: &'static str, f: F) -> LedgerResult<T>
    where
        T: Send,
        F: Fn(DynProvider) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RawError>> + Send,
    {
        let mut last_error = None;
        for (i, provider) in self.readers.iter().enumerate() {
            match timeout(self.timeout_duration, f(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(op, provider_idx = i, error = %e, "RPC error, trying next provider");
                    last_error = Some(LedgerError::Rpc(e));
                }
                Err(_) => {
                    tracing::warn!(op, provider_idx = i, "RPC timeout, trying next provider");
                    last_error = Some(LedgerError::Timeout(self.timeout_secs()));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| LedgerError::NotAvailable("no RPC providers".to_string())))
    }

    /// Send an EIP-1193 request to the wallet endpoint.
    async fn wallet_request<P>(
        &self,
        method: &'static str,
        params: P,
        requested_chain: Option<ChainId>,
    ) -> LedgerResult<serde_json::Value>
    where
        P: serde::Serialize + Clone + std::fmt::Debug + Send + Sync + Unpin + 'static,
    {
        let fut = self.signer.raw_request::<P, serde_json::Value>(method.into(), params);
        match timeout(self.timeout_duration, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LedgerError::from_raw(rpc_raw(&e), requested_chain)),
            Err(_) => Err(LedgerError::Timeout(self.timeout_secs())),
        }
    }

    /// Check if the RPC endpoint is reachable.
    pub async fn is_healthy(&self) -> bool {
        let healthy = self.block_number().await.is_ok();
        metrics::record_ledger_health(healthy);
        healthy
    }
}

impl Drop for AlloyLedger {
    fn drop(&mut self) {
        self.chain_poller.abort();
    }
}

impl std::fmt::Debug for AlloyLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyLedger")
            .field("rpc_url", &self.rpc_url)
            .field("account", &self.account)
            .field("sale", &self.sale)
            .field("timeout_secs", &self.timeout_secs())
            .finish()
    }
}

/// Poll `eth_chainId` and broadcast each change.
fn spawn_chain_poller(
    provider: DynProvider,
    chain_tx: broadcast::Sender<ChainId>,
    every: Duration,
    rpc_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<ChainId> = None;

        loop {
            ticker.tick().await;
            match timeout(rpc_timeout, provider.get_chain_id()).await {
                Ok(Ok(id)) => {
                    let chain = ChainId(id);
                    if last.is_some_and(|prev| prev != chain) {
                        tracing::info!(chain_id = chain.0, "Wallet network changed");
                        let _ = chain_tx.send(chain);
                    }
                    last = Some(chain);
                }
                Ok(Err(e)) => tracing::debug!(error = %e, "Chain id poll failed"),
                Err(_) => tracing::debug!("Chain id poll timed out"),
            }
        }
    })
}

#[async_trait]
impl ChainLedger for AlloyLedger {
    async fn chain_id(&self) -> LedgerResult<ChainId> {
        match timeout(self.timeout_duration, self.signer.get_chain_id()).await {
            Ok(Ok(id)) => Ok(ChainId(id)),
            Ok(Err(e)) => Err(LedgerError::Rpc(rpc_raw(&e))),
            Err(_) => Err(LedgerError::Timeout(self.timeout_secs())),
        }
    }

    fn chain_changes(&self) -> ChainSubscription {
        subscription_from_broadcast(self.chain_tx.subscribe())
    }

    async fn switch_chain(&self, chain: ChainId) -> LedgerResult<()> {
        self.wallet_request(
            "wallet_switchEthereumChain",
            (json!({ "chainId": chain.to_hex() }),),
            Some(chain),
        )
        .await?;
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkDescriptor) -> LedgerResult<()> {
        let params = json!({
            "chainId": network.chain_id.to_hex(),
            "chainName": network.chain_name,
            "nativeCurrency": network.native_currency,
            "rpcUrls": network.rpc_urls,
            "blockExplorerUrls": network.block_explorer_urls,
        });
        self.wallet_request("wallet_addEthereumChain", (params,), Some(network.chain_id))
            .await?;
        Ok(())
    }

    async fn watch_asset(&self, asset: &AssetDescriptor) -> LedgerResult<bool> {
        let params = json!({
            "type": "ERC20",
            "options": asset,
        });
        let accepted = self.wallet_request("wallet_watchAsset", params, None).await?;
        Ok(accepted.as_bool().unwrap_or(true))
    }

    fn account(&self) -> Address {
        self.account
    }

    fn sale_contract(&self) -> Address {
        self.sale
    }

    async fn token_info(&self) -> LedgerResult<TokenInfo> {
        let sale = self.sale;
        self.read("getTokenInfo", move |provider| async move {
            let info = IPresale::new(sale, provider)
                .getTokenInfo()
                .call()
                .await
                .map_err(|e| contract_raw(&e))?;
            Ok(TokenInfo {
                name: info.name,
                symbol: info.symbol,
                available_tokens: info.availableTokens,
                price_per_token: info.pricePerTokenUsdt,
                presale_active: info.presaleActive,
                stablecoin_payment_enabled: info.usdtPaymentEnabled,
            })
        })
        .await
    }

    async fn total_sold(&self) -> LedgerResult<U256> {
        let sale = self.sale;
        self.read("totalSoldTokens", move |provider| async move {
            IPresale::new(sale, provider)
                .totalSoldTokens()
                .call()
                .await
                .map_err(|e| contract_raw(&e))
        })
        .await
    }

    async fn stablecoin_balance(&self, holder: Address) -> LedgerResult<U256> {
        let stablecoin = self.stablecoin;
        self.read("stablecoin.balanceOf", move |provider| async move {
            IERC20::new(stablecoin, provider)
                .balanceOf(holder)
                .call()
                .await
                .map_err(|e| contract_raw(&e))
        })
        .await
    }

    async fn stablecoin_allowance(&self, owner: Address, spender: Address) -> LedgerResult<U256> {
        let stablecoin = self.stablecoin;
        self.read("stablecoin.allowance", move |provider| async move {
            IERC20::new(stablecoin, provider)
                .allowance(owner, spender)
                .call()
                .await
                .map_err(|e| contract_raw(&e))
        })
        .await
    }

    async fn sale_token_balance(&self, holder: Address) -> LedgerResult<U256> {
        let token = self.token;
        self.read("token.balanceOf", move |provider| async move {
            IERC20::new(token, provider)
                .balanceOf(holder)
                .call()
                .await
                .map_err(|e| contract_raw(&e))
        })
        .await
    }

    async fn sale_token_decimals(&self) -> LedgerResult<u8> {
        let token = self.token;
        self.read("token.decimals", move |provider| async move {
            IERC20::new(token, provider)
                .decimals()
                .call()
                .await
                .map_err(|e| contract_raw(&e))
        })
        .await
    }

    async fn submit_approval(&self, spender: Address, amount: U256) -> LedgerResult<TxHash> {
        let token = IERC20::new(self.stablecoin, self.signer.clone());
        let call = token.approve(spender, amount).from(self.account);
        let pending = match timeout(self.timeout_duration, call.send()).await {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => return Err(LedgerError::from_raw(contract_raw(&e), None)),
            Err(_) => return Err(LedgerError::Timeout(self.timeout_secs())),
        };
        let tx_hash = *pending.tx_hash();
        tracing::info!(tx_hash = %tx_hash, spender = %spender, amount = %amount, "Approval submitted");
        Ok(tx_hash)
    }

    async fn submit_purchase(&self, token_amount: U256) -> LedgerResult<TxHash> {
        let sale = IPresale::new(self.sale, self.signer.clone());
        let call = sale.buyTokenWithUSDT(token_amount).from(self.account);
        let pending = match timeout(self.timeout_duration, call.send()).await {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => return Err(LedgerError::from_raw(contract_raw(&e), None)),
            Err(_) => return Err(LedgerError::Timeout(self.timeout_secs())),
        };
        let tx_hash = *pending.tx_hash();
        tracing::info!(tx_hash = %tx_hash, token_amount = %token_amount, "Purchase submitted");
        Ok(tx_hash)
    }

    async fn block_number(&self) -> LedgerResult<u64> {
        self.read("eth_blockNumber", |provider| async move {
            provider.get_block_number().await.map_err(|e| rpc_raw(&e))
        })
        .await
    }

    async fn receipt_status(&self, tx_hash: TxHash) -> LedgerResult<Option<ReceiptStatus>> {
        self.read("eth_getTransactionReceipt", move |provider| async move {
            let receipt = provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| rpc_raw(&e))?;
            Ok(receipt.map(|r| {
                let block_number = r.block_number.unwrap_or_default();
                if r.status() {
                    ReceiptStatus::Success { block_number }
                } else {
                    ReceiptStatus::Reverted { block_number }
                }
            }))
        })
        .await
    }

    async fn revert_reason(&self, tx_hash: TxHash, block_number: u64) -> LedgerResult<Option<RawError>> {
        // Replayed against the parent block's state.
        let at = BlockId::number(block_number.saturating_sub(1));
        self.read("eth_call replay", move |provider| async move {
            let Some(tx) = provider
                .get_transaction_by_hash(tx_hash)
                .await
                .map_err(|e| rpc_raw(&e))?
            else {
                return Ok(None);
            };
            match provider.call(tx.into_request()).block(at).await {
                Ok(_) => Ok(None),
                Err(e) => Ok(Some(rpc_raw(&e))),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn test_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.rpc.rpc_url = "http://127.0.0.1:1".to_string();
        config.rpc.rpc_timeout_secs = 1;
        config.network.chain_id = 31337;
        config.contracts.sale_address = "0x1111111111111111111111111111111111111111".to_string();
        config
    }

    #[tokio::test]
    async fn test_client_creation_tolerates_unreachable_rpc() {
        let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, ChainId(31337)).unwrap();
        let result = AlloyLedger::connect(&test_config(), &wallet).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rpc_failover_exhausts_all_providers() {
        let mut config = test_config();
        config.rpc.failover_urls.push("http://127.0.0.1:2".to_string());
        let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, ChainId(31337)).unwrap();
        let client = AlloyLedger::connect(&config, &wallet).await.unwrap();

        let result = client.block_number().await;
        assert!(result.is_err());
        assert!(!client.is_healthy().await);
    }

    #[test]
    fn test_bad_contract_address_fails_before_connecting() {
        let mut config = test_config();
        config.contracts.stablecoin_address = "0x123".to_string();
        let err = contract_addresses(&config.contracts).unwrap_err();
        assert!(err.to_string().contains("stablecoin address"));
    }

    #[tokio::test]
    async fn test_invalid_sale_address_is_rejected() {
        let mut config = test_config();
        config.contracts.sale_address = "not-an-address".to_string();
        let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, ChainId(31337)).unwrap();
        let err = AlloyLedger::connect(&config, &wallet).await.unwrap_err();
        assert!(err.to_string().contains("sale address"));
    }
}
