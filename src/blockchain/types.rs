//! Chain-specific types and error definitions.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ContractsConfig, NetworkConfig};

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
    /// `0x`-prefixed hex form used by EIP-1193 wallet requests.
    pub fn to_hex(self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// EIP-1193 code for a request the user declined in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;

/// EIP-1193/EIP-3326 code for a chain the wallet does not know.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// A low-level failure payload, kept verbatim until it is classified.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawError {
    /// JSON-RPC / EIP-1193 error code, when the provider sent one.
    pub code: Option<i64>,
    /// Provider message; diagnostic only, never matched before `revert_data`.
    pub message: String,
    /// ABI-encoded revert payload, when the failure was a contract revert.
    pub revert_data: Option<Bytes>,
}

impl RawError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            revert_data: None,
        }
    }

    pub fn revert(data: Bytes, message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            revert_data: Some(data),
        }
    }

    /// First four bytes of the revert payload.
    pub fn selector(&self) -> Option<[u8; 4]> {
        let data = self.revert_data.as_ref()?;
        let head = data.get(..4)?;
        let mut selector = [0u8; 4];
        selector.copy_from_slice(head);
        Some(selector)
    }
}

impl std::fmt::Display for RawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// RPC request or contract call failed.
    #[error("RPC error: {0}")]
    Rpc(RawError),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// The wallet user declined the request.
    #[error("Request rejected by user: {0}")]
    UserRejected(RawError),

    /// The wallet does not know the requested chain.
    #[error("Chain {0} is not known to the wallet")]
    UnrecognizedChain(ChainId),

    /// Invalid private key format or signing error.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Ledger client not initialized or unreachable.
    #[error("Ledger not available: {0}")]
    NotAvailable(String),
}

impl LedgerError {
    /// Map a provider payload onto the typed EIP-1193 cases.
    pub fn from_raw(raw: RawError, requested_chain: Option<ChainId>) -> Self {
        match (raw.code, requested_chain) {
            (Some(USER_REJECTED_CODE), _) => Self::UserRejected(raw),
            (Some(UNRECOGNIZED_CHAIN_CODE), Some(chain)) => Self::UnrecognizedChain(chain),
            _ => Self::Rpc(raw),
        }
    }

    /// The underlying payload, for classification.
    pub fn raw(&self) -> RawError {
        match self {
            Self::Rpc(raw) | Self::UserRejected(raw) => raw.clone(),
            Self::UnrecognizedChain(chain) => {
                RawError::with_code(UNRECOGNIZED_CHAIN_CODE, format!("unrecognized chain {}", chain))
            }
            other => RawError::message(other.to_string()),
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Terminal receipt state of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success { block_number: u64 },
    Reverted { block_number: u64 },
}

/// Transaction confirmation status after a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Mined successfully with the required block depth.
    Confirmed { block_number: u64 },
    /// Mined but reverted.
    Reverted { block_number: u64 },
    /// Not (sufficiently) confirmed when the deadline elapsed.
    StillPending,
}

/// The `getTokenInfo()` tuple, with the fields this client uses named.
///
/// Positions 3, 4, 6 and 7 of the on-chain tuple are reserved and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    /// Sale-token minor units still for sale.
    pub available_tokens: U256,
    /// Stablecoin minor units per whole token.
    pub price_per_token: U256,
    pub presale_active: bool,
    pub stablecoin_payment_enabled: bool,
}

/// Full descriptor for `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl From<&NetworkConfig> for NetworkDescriptor {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            chain_id: ChainId(config.chain_id),
            chain_name: config.chain_name.clone(),
            native_currency: NativeCurrency {
                name: config.native_currency_name.clone(),
                symbol: config.native_currency_symbol.clone(),
                decimals: config.native_currency_decimals,
            },
            rpc_urls: config.rpc_urls.clone(),
            block_explorer_urls: config.block_explorer_urls.clone(),
        }
    }
}

/// ERC-20 asset registration for `wallet_watchAsset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl AssetDescriptor {
    /// The sale token as configured.
    pub fn sale_token(config: &ContractsConfig) -> LedgerResult<Self> {
        let address = config.token_address.parse().map_err(|e| {
            LedgerError::NotAvailable(format!("invalid token address '{}': {}", config.token_address, e))
        })?;
        Ok(Self {
            address,
            symbol: config.token_symbol.clone(),
            decimals: config.token_decimals,
            image: config.token_image.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(8453u64);
        assert_eq!(u64::from(chain_id), 8453);
        assert_eq!(chain_id.to_hex(), "0x2105");
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");

        let err = LedgerError::Rpc(RawError::with_code(-32000, "insufficient funds"));
        assert_eq!(err.to_string(), "RPC error: [-32000] insufficient funds");
    }

    #[test]
    fn test_from_raw_maps_wallet_codes() {
        let rejected = LedgerError::from_raw(RawError::with_code(4001, "User rejected"), None);
        assert!(matches!(rejected, LedgerError::UserRejected(_)));

        let unknown =
            LedgerError::from_raw(RawError::with_code(4902, "Unrecognized chain"), Some(ChainId(8453)));
        assert!(matches!(unknown, LedgerError::UnrecognizedChain(ChainId(8453))));

        let other = LedgerError::from_raw(RawError::with_code(-32601, "method not found"), None);
        assert!(matches!(other, LedgerError::Rpc(_)));
    }

    #[test]
    fn test_selector_requires_four_bytes() {
        let raw = RawError::revert(Bytes::from(vec![0xde, 0xad]), "short");
        assert_eq!(raw.selector(), None);

        let raw = RawError::revert(Bytes::from(vec![1, 2, 3, 4, 5]), "revert");
        assert_eq!(raw.selector(), Some([1, 2, 3, 4]));
    }

    #[test]
    fn test_network_descriptor_serializes_camel_case() {
        let descriptor = NetworkDescriptor::from(&NetworkConfig::default());
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["chainName"], "Base");
        assert_eq!(json["nativeCurrency"]["decimals"], 18);
        assert_eq!(json["blockExplorerUrls"][0], "https://basescan.org");
    }
}
