//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.
//! Defaults describe the Base mainnet deployment of the sale.

use serde::{Deserialize, Serialize};

/// Root configuration for the presale client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// The single chain this deployment targets.
    pub network: NetworkConfig,

    /// JSON-RPC connectivity.
    pub rpc: RpcConfig,

    /// Sale, stablecoin and sale-token contracts.
    pub contracts: ContractsConfig,

    /// Approval/purchase sequencing.
    pub purchase: PurchaseConfig,

    /// Fiat rail settlement policy.
    pub fiat: FiatConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Target network descriptor, also used for `wallet_addEthereumChain`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Chain ID (8453 for Base mainnet).
    pub chain_id: u64,

    /// Display name shown by the wallet.
    pub chain_name: String,

    /// Native currency name.
    pub native_currency_name: String,

    /// Native currency symbol.
    pub native_currency_symbol: String,

    /// Native currency decimals.
    pub native_currency_decimals: u8,

    /// RPC endpoints advertised to the wallet when adding the chain.
    pub rpc_urls: Vec<String>,

    /// Block explorer URLs advertised to the wallet.
    pub block_explorer_urls: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: 8453,
            chain_name: "Base".to_string(),
            native_currency_name: "ETH".to_string(),
            native_currency_symbol: "ETH".to_string(),
            native_currency_decimals: 18,
            rpc_urls: vec!["https://mainnet.base.org".to_string()],
            block_explorer_urls: vec!["https://basescan.org".to_string()],
        }
    }
}

/// JSON-RPC connectivity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary JSON-RPC endpoint (reads, writes and wallet requests).
    pub rpc_url: String,

    /// Failover endpoints used for reads only.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// How often the connected chain id is polled for change notifications.
    pub chain_poll_interval_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://mainnet.base.org".to_string(),
            failover_urls: Vec::new(),
            rpc_timeout_secs: 10,
            chain_poll_interval_ms: 4_000,
        }
    }
}

/// Contract addresses and token metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContractsConfig {
    /// Sale contract exposing `getTokenInfo` and `buyTokenWithUSDT`.
    pub sale_address: String,

    /// Payment stablecoin (ERC-20).
    pub stablecoin_address: String,

    /// Stablecoin symbol, for display.
    pub stablecoin_symbol: String,

    /// Stablecoin decimals; also the decimals of the sale price.
    pub stablecoin_decimals: u8,

    /// Sale token (ERC-20).
    pub token_address: String,

    /// Sale token symbol, used when registering the asset with the wallet.
    pub token_symbol: String,

    /// Sale token decimals as registered with the wallet.
    pub token_decimals: u8,

    /// Optional icon URL for the wallet asset registration.
    pub token_image: Option<String>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            sale_address: "0x0000000000000000000000000000000000000000".to_string(),
            stablecoin_address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            stablecoin_symbol: "USDC".to_string(),
            stablecoin_decimals: 6,
            token_address: "0xD7e9dcfF5a9998ec5AaAaEfEe94A50F2Cf11CB33".to_string(),
            token_symbol: "MOTRA".to_string(),
            token_decimals: 2,
            token_image: None,
        }
    }
}

/// Approval and purchase sequencing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PurchaseConfig {
    /// Allowance granted when an approval is required, in stablecoin minor units.
    ///
    /// Approving a fixed ceiling once avoids an approval per purchase at the
    /// cost of leaving that allowance exposed to the sale contract.
    pub approval_ceiling: String,

    /// Number of blocks on top of the receipt block before a transaction counts as confirmed.
    pub confirmation_blocks: u32,

    /// Maximum wait for a single transaction confirmation in seconds.
    pub confirmation_timeout_secs: u64,

    /// Receipt polling interval in milliseconds.
    pub receipt_poll_interval_ms: u64,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            // 1,000,000 USDC at 6 decimals
            approval_ceiling: "1000000000000".to_string(),
            confirmation_blocks: 1,
            confirmation_timeout_secs: 120,
            receipt_poll_interval_ms: 2_000,
        }
    }
}

/// Fiat rail settlement policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FiatConfig {
    /// Maximum wait for the stablecoin balance to reflect the fiat purchase, in seconds.
    pub settlement_timeout_secs: u64,

    /// First balance poll delay in milliseconds.
    pub poll_base_ms: u64,

    /// Ceiling for the backed-off balance poll delay in milliseconds.
    pub poll_max_ms: u64,
}

impl Default for FiatConfig {
    fn default() -> Self {
        Self {
            settlement_timeout_secs: 600,
            poll_base_ms: 1_000,
            poll_max_ms: 15_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
