//! Decimal helpers for volatility values.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Convert a wire-level float into a decimal, rejecting NaN and infinities.
pub fn from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(6))
}

/// Convert a decimal to a float for statistics that need `ln`/`sqrt`.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Convert a fractional volatility (0.3282) to percent (32.82).
pub fn fraction_to_percent(fraction: Decimal) -> Decimal {
    (fraction * dec!(100)).round_dp(4)
}

/// Parse a scraped numeric cell such as `"4,215.50"`, `"23.45%"` or `"$12"`.
pub fn parse_loose(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '%' | '$' | ' ' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}
