//! Exact conversion between on-chain minor units and decimal strings.
//!
//! All arithmetic is on `U256`; no value ever passes through a float.

use alloy::primitives::U256;

use crate::pricing::PricingError;

/// `10^decimals`, or `None` when it does not fit in 256 bits.
pub fn scale(decimals: u8) -> Option<U256> {
    U256::from(10u64).checked_pow(U256::from(decimals))
}

/// Split `raw` into integer and zero-padded fractional digit strings.
fn split(raw: U256, decimals: u8) -> (String, String) {
    if decimals == 0 {
        return (raw.to_string(), String::new());
    }
    let width = decimals as usize;
    match scale(decimals) {
        Some(divisor) => {
            let quotient = raw / divisor;
            let remainder = raw % divisor;
            (quotient.to_string(), format!("{:0>width$}", remainder.to_string()))
        }
        // Every U256 is below 10^78, so the integer part is zero.
        None => ("0".to_string(), format!("{:0>width$}", raw.to_string())),
    }
}

/// Render minor units as a decimal string, trimming trailing fractional zeros.
///
/// `from_minor_units(1_500_000, 6) == "1.5"`, `from_minor_units(2_000_000, 6) == "2"`.
pub fn from_minor_units(raw: U256, decimals: u8) -> String {
    format_fixed(raw, decimals, 0)
}

/// Like [`from_minor_units`] but keeps at least `min_fraction_digits` fractional
/// digits (capped at `decimals`). Exact: digits are trimmed, never rounded.
pub fn format_fixed(raw: U256, decimals: u8, min_fraction_digits: usize) -> String {
    let (integer, fraction) = split(raw, decimals);
    let keep = min_fraction_digits.min(fraction.len());
    let significant = fraction.trim_end_matches('0').len().max(keep);
    if significant == 0 {
        integer
    } else {
        format!("{}.{}", integer, &fraction[..significant])
    }
}

/// Parse a decimal string into minor units, truncating digits beyond `decimals`.
pub fn to_minor_units(value: &str, decimals: u8) -> Result<U256, PricingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PricingError::Empty);
    }

    let (integer, fraction) = match value.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (value, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (integer.is_empty() && fraction.is_empty()) || !all_digits(integer) || !all_digits(fraction) {
        return Err(PricingError::Invalid(value.to_string()));
    }

    let width = decimals as usize;
    let kept: String = fraction.chars().take(width).collect();
    let digits = format!("{}{:0<width$}", integer, kept);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| PricingError::Overflow)
}

/// Human display: integer part grouped with commas, at most `display_decimals`
/// fractional digits (truncated), trailing zeros removed.
pub fn format_token_amount(raw: U256, decimals: u8, display_decimals: usize) -> String {
    let (integer, fraction) = split(raw, decimals);

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, c) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let shown: String = fraction.chars().take(display_decimals).collect();
    let shown = shown.trim_end_matches('0');
    if shown.is_empty() {
        grouped
    } else {
        format!("{}.{}", grouped, shown)
    }
}
