//! Cost and progress figures for the sale.

use alloy::primitives::U256;

use crate::pricing::units::{format_fixed, scale};
use crate::pricing::PricingError;

/// Fractional digits always shown for a payment amount ("10.00").
pub const PAYMENT_DISPLAY_DECIMALS: usize = 2;

/// Parts-per-million resolution of [`sale_progress`].
const PROGRESS_PPM: u64 = 1_000_000;

/// Stablecoin minor units owed for `token_amount` whole tokens.
pub fn required_payment_minor(token_amount: U256, price_per_token: U256) -> Result<U256, PricingError> {
    token_amount
        .checked_mul(price_per_token)
        .ok_or(PricingError::Overflow)
}

/// `token_amount × price` as a decimal string in payment-asset units.
///
/// Exact; keeps at least two fractional digits and every significant digit beyond.
pub fn required_payment(
    token_amount: U256,
    price_per_token: U256,
    price_decimals: u8,
) -> Result<String, PricingError> {
    let minor = required_payment_minor(token_amount, price_per_token)?;
    Ok(format_fixed(minor, price_decimals, PAYMENT_DISPLAY_DECIMALS))
}

/// Sale-token minor units for `token_amount` whole tokens.
pub fn tokens_to_minor(token_amount: U256, token_decimals: u8) -> Result<U256, PricingError> {
    scale(token_decimals)
        .and_then(|factor| token_amount.checked_mul(factor))
        .ok_or(PricingError::Overflow)
}

/// Percentage of the sale sold: `sold / (sold + available) * 100`, in `[0, 100]`.
///
/// Zero when nothing was ever offered.
pub fn sale_progress(sold: U256, available: U256) -> f64 {
    let Some(total) = sold.checked_add(available) else {
        // Halve both sides; the ratio is unchanged within a unit.
        return sale_progress(sold >> 1, available >> 1);
    };
    if total.is_zero() {
        return 0.0;
    }
    let ppm = match sold.checked_mul(U256::from(PROGRESS_PPM)) {
        Some(scaled) => scaled / total,
        None => sold / (total / U256::from(PROGRESS_PPM)).max(U256::from(1u64)),
    };
    let ppm = ppm.min(U256::from(PROGRESS_PPM)).to::<u64>();
    ppm as f64 / (PROGRESS_PPM / 100) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_payment_scenario() {
        // 0.01 USDC per token at 6 decimals, 1000 tokens
        let cost = required_payment(U256::from(1000u64), U256::from(10_000u64), 6).unwrap();
        assert_eq!(cost, "10.00");
        assert_eq!(
            required_payment_minor(U256::from(1000u64), U256::from(10_000u64)).unwrap(),
            U256::from(10_000_000u64)
        );
    }

    #[test]
    fn test_required_payment_keeps_precision() {
        let cost = required_payment(U256::from(3u64), U256::from(3_333u64), 6).unwrap();
        assert_eq!(cost, "0.009999");

        let huge = U256::from(10u64).pow(U256::from(40));
        let cost = required_payment(huge, U256::from(10_000u64), 6).unwrap();
        assert_eq!(cost, format!("1{}.00", "0".repeat(38)));
    }

    #[test]
    fn test_required_payment_overflow() {
        assert_eq!(
            required_payment(U256::MAX, U256::from(2u64), 6),
            Err(PricingError::Overflow)
        );
    }

    #[test]
    fn test_sale_progress_scenario() {
        let progress = sale_progress(U256::from(100_000_000u64), U256::from(900_000_000u64));
        assert_eq!(progress, 10.0);
    }

    #[test]
    fn test_sale_progress_edges() {
        assert_eq!(sale_progress(U256::ZERO, U256::ZERO), 0.0);
        assert_eq!(sale_progress(U256::ZERO, U256::from(5u64)), 0.0);
        assert_eq!(sale_progress(U256::from(5u64), U256::ZERO), 100.0);
        let p = sale_progress(U256::MAX, U256::MAX);
        assert!((p - 50.0).abs() < 0.001);
    }

    #[test]
    fn test_sale_progress_monotonic_in_sold() {
        let available = U256::from(1_000u64);
        let mut last = -1.0;
        for sold in (0u64..5_000).step_by(37) {
            let p = sale_progress(U256::from(sold), available);
            assert!(p >= last, "progress fell at sold={}", sold);
            assert!((0.0..=100.0).contains(&p));
            last = p;
        }
    }

    #[test]
    fn test_tokens_to_minor() {
        assert_eq!(tokens_to_minor(U256::from(1000u64), 2).unwrap(), U256::from(100_000u64));
        assert_eq!(tokens_to_minor(U256::MAX, 2), Err(PricingError::Overflow));
    }
}
