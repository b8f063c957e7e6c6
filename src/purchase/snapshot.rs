//! Freshly-read views of the sale and of an account.
//!
//! Nothing here is cached: each value is read from the ledger when built.

use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::blockchain::ledger::ChainLedger;
use crate::blockchain::types::LedgerResult;
use crate::pricing::{
    format_fixed, format_token_amount, from_minor_units, required_payment_minor, sale_progress,
    tokens_to_minor, PricingError,
};
use crate::pricing::calculator::PAYMENT_DISPLAY_DECIMALS;

/// Fractional digits shown for sale-token quantities.
const TOKEN_DISPLAY_DECIMALS: usize = 4;

/// Sale contract state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleState {
    pub name: String,
    pub symbol: String,
    /// Sale-token minor units still for sale.
    pub available_tokens: U256,
    /// Sale-token minor units sold.
    pub tokens_sold: U256,
    /// Stablecoin minor units per whole token.
    pub price_per_token: U256,
    pub token_decimals: u8,
    pub presale_active: bool,
    pub stablecoin_payment_enabled: bool,
}

impl SaleState {
    pub async fn fetch(ledger: &dyn ChainLedger) -> LedgerResult<Self> {
        let (info, sold, decimals) = tokio::try_join!(
            ledger.token_info(),
            ledger.total_sold(),
            ledger.sale_token_decimals()
        )?;
        Ok(Self {
            name: info.name,
            symbol: info.symbol,
            available_tokens: info.available_tokens,
            tokens_sold: sold,
            price_per_token: info.price_per_token,
            token_decimals: decimals,
            presale_active: info.presale_active,
            stablecoin_payment_enabled: info.stablecoin_payment_enabled,
        })
    }

    /// Purchases over the stablecoin rail are accepted.
    pub fn accepts_stablecoin(&self) -> bool {
        self.presale_active && self.stablecoin_payment_enabled
    }

    /// Percentage sold, in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        sale_progress(self.tokens_sold, self.available_tokens)
    }

    /// Whether `token_amount` whole tokens are still for sale.
    pub fn can_supply(&self, token_amount: U256) -> bool {
        match tokens_to_minor(token_amount, self.token_decimals) {
            Ok(minor) => !self.available_tokens.is_zero() && minor <= self.available_tokens,
            Err(_) => false,
        }
    }
}

/// Display figures for the sale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleStats {
    pub name: String,
    pub symbol: String,
    /// Price per token in stablecoin units.
    pub price: String,
    pub tokens_sold: String,
    pub tokens_available: String,
    pub progress_percent: f64,
    pub presale_active: bool,
    pub stablecoin_payment_enabled: bool,
}

impl SaleStats {
    pub fn new(state: &SaleState, stablecoin_decimals: u8) -> Self {
        Self {
            name: state.name.clone(),
            symbol: state.symbol.clone(),
            price: format_fixed(state.price_per_token, stablecoin_decimals, PAYMENT_DISPLAY_DECIMALS),
            tokens_sold: format_token_amount(state.tokens_sold, state.token_decimals, TOKEN_DISPLAY_DECIMALS),
            tokens_available: format_token_amount(
                state.available_tokens,
                state.token_decimals,
                TOKEN_DISPLAY_DECIMALS,
            ),
            progress_percent: state.progress(),
            presale_active: state.presale_active,
            stablecoin_payment_enabled: state.stablecoin_payment_enabled,
        }
    }
}

/// Balances and allowance of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub account: Address,
    /// Stablecoin minor units.
    pub stablecoin_balance: U256,
    /// Stablecoin minor units the sale contract may pull.
    pub allowance: U256,
    /// Sale-token minor units held.
    pub token_balance: U256,
}

impl AccountSnapshot {
    pub async fn fetch(ledger: &dyn ChainLedger, account: Address) -> LedgerResult<Self> {
        let sale = ledger.sale_contract();
        let (stablecoin_balance, allowance, token_balance) = tokio::try_join!(
            ledger.stablecoin_balance(account),
            ledger.stablecoin_allowance(account, sale),
            ledger.sale_token_balance(account)
        )?;
        Ok(Self {
            account,
            stablecoin_balance,
            allowance,
            token_balance,
        })
    }
}

/// Whether a quoted purchase can go ahead as things stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    InvalidAmount,
    SaleInactive,
    SoldOut,
    InsufficientBalance,
    /// Balance suffices; an approval precedes the purchase.
    NeedsApproval,
    Ready,
}

/// Cost of a purchase against the account's current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseQuote {
    pub token_amount: U256,
    /// Stablecoin minor units required.
    pub cost_minor: U256,
    /// Required payment, at least two fractional digits.
    pub cost: String,
    pub stablecoin_balance: U256,
    pub allowance: U256,
    pub readiness: Readiness,
}

impl PurchaseQuote {
    pub fn new(
        token_amount: U256,
        sale: &SaleState,
        account: &AccountSnapshot,
        stablecoin_decimals: u8,
    ) -> Result<Self, PricingError> {
        let cost_minor = required_payment_minor(token_amount, sale.price_per_token)?;
        let readiness = if token_amount.is_zero() {
            Readiness::InvalidAmount
        } else if !sale.accepts_stablecoin() {
            Readiness::SaleInactive
        } else if !sale.can_supply(token_amount) {
            Readiness::SoldOut
        } else if account.stablecoin_balance < cost_minor {
            Readiness::InsufficientBalance
        } else if account.allowance < cost_minor {
            Readiness::NeedsApproval
        } else {
            Readiness::Ready
        };

        Ok(Self {
            token_amount,
            cost_minor,
            cost: format_fixed(cost_minor, stablecoin_decimals, PAYMENT_DISPLAY_DECIMALS),
            stablecoin_balance: account.stablecoin_balance,
            allowance: account.allowance,
            readiness,
        })
    }

    /// Balance shortfall in stablecoin units, if any.
    pub fn shortfall(&self, stablecoin_decimals: u8) -> Option<String> {
        (self.stablecoin_balance < self.cost_minor)
            .then(|| from_minor_units(self.cost_minor - self.stablecoin_balance, stablecoin_decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::InMemoryLedger;

    #[tokio::test]
    async fn test_sale_state_reads_contract() {
        let ledger = InMemoryLedger::builder().build();
        let state = SaleState::fetch(&ledger).await.unwrap();
        assert_eq!(state.symbol, "MOTRA");
        assert_eq!(state.progress(), 10.0);
        assert!(state.accepts_stablecoin());
        assert!(state.can_supply(U256::from(9_000_000u64)));
        assert!(!state.can_supply(U256::from(9_000_001u64)));
    }

    #[tokio::test]
    async fn test_sale_stats_display() {
        let ledger = InMemoryLedger::builder().build();
        let state = SaleState::fetch(&ledger).await.unwrap();
        let stats = SaleStats::new(&state, 6);
        assert_eq!(stats.price, "0.01");
        assert_eq!(stats.tokens_sold, "1,000,000");
        assert_eq!(stats.tokens_available, "9,000,000");
        assert_eq!(stats.progress_percent, 10.0);
    }

    #[tokio::test]
    async fn test_quote_readiness() {
        let ledger = InMemoryLedger::builder()
            .stablecoin_balance(U256::from(10_000_000u64))
            .build();
        let account = ledger.account();
        let sale = SaleState::fetch(&ledger).await.unwrap();
        let snapshot = AccountSnapshot::fetch(&ledger, account).await.unwrap();

        let quote = PurchaseQuote::new(U256::from(1000u64), &sale, &snapshot, 6).unwrap();
        assert_eq!(quote.cost, "10.00");
        assert_eq!(quote.readiness, Readiness::NeedsApproval);
        assert_eq!(quote.shortfall(6), None);

        let quote = PurchaseQuote::new(U256::from(1500u64), &sale, &snapshot, 6).unwrap();
        assert_eq!(quote.readiness, Readiness::InsufficientBalance);
        assert_eq!(quote.shortfall(6).as_deref(), Some("5"));

        let quote = PurchaseQuote::new(U256::ZERO, &sale, &snapshot, 6).unwrap();
        assert_eq!(quote.readiness, Readiness::InvalidAmount);

        ledger.set_allowance(account, U256::from(10_000_000u64));
        let snapshot = AccountSnapshot::fetch(&ledger, account).await.unwrap();
        let quote = PurchaseQuote::new(U256::from(1000u64), &sale, &snapshot, 6).unwrap();
        assert_eq!(quote.readiness, Readiness::Ready);
    }

    #[tokio::test]
    async fn test_quote_sale_inactive() {
        let ledger = InMemoryLedger::builder().stablecoin_payment_enabled(false).build();
        let sale = SaleState::fetch(&ledger).await.unwrap();
        let snapshot = AccountSnapshot::fetch(&ledger, ledger.account()).await.unwrap();
        let quote = PurchaseQuote::new(U256::from(1u64), &sale, &snapshot, 6).unwrap();
        assert_eq!(quote.readiness, Readiness::SaleInactive);
    }
}
