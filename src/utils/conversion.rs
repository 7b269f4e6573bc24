//! Numeric conversion utilities.
//!
//! Chain amounts arrive as decimal strings in BASE units (up to 78 digits).
//! Display-unit math goes through BigDecimal to avoid precision loss on the
//! way down to f64.

use bigdecimal::BigDecimal;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;
use std::str::FromStr;

/// Precomputed powers of ten for the exponent range seen on chain.
static POW10: Lazy<Vec<BigDecimal>> = Lazy::new(|| {
    (0..=38u32)
        .map(|e| BigDecimal::from(BigInt::from(10u32).pow(e)))
        .collect()
});

/// 10^exp as BigDecimal. Exponents above the precomputed range are computed
/// on the fly.
pub fn pow10(exp: u32) -> BigDecimal {
    POW10
        .get(exp as usize)
        .cloned()
        .unwrap_or_else(|| BigDecimal::from(BigInt::from(10u32).pow(exp)))
}

/// Convert a BASE-unit decimal string to DISPLAY units as f64.
///
/// Returns None if the string is not a decimal number or the result is not
/// finite.
pub fn base_to_display(amount_base: &str, exponent: u32) -> Option<f64> {
    let value = BigDecimal::from_str(amount_base).ok()?;
    let adjusted = value / pow10(exponent);
    let result = adjusted.to_f64()?;
    if result.is_finite() {
        Some(result)
    } else {
        None
    }
}

/// Floor a timestamp to the start of its minute (candle bucket alignment).
pub fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn base_to_display_adjusts_exponent() {
        assert_eq!(base_to_display("1000000", 6), Some(1.0));
        assert_eq!(base_to_display("2000000", 6), Some(2.0));
        assert_eq!(base_to_display("1", 0), Some(1.0));
        assert_eq!(base_to_display("1500000000", 6), Some(1500.0));
    }

    #[test]
    fn base_to_display_handles_large_values() {
        // 78-digit amounts must not lose the order of magnitude
        let raw = "1".to_string() + &"0".repeat(30);
        let display = base_to_display(&raw, 6).unwrap();
        assert!((display - 1e24).abs() / 1e24 < 1e-9);
    }

    #[test]
    fn base_to_display_rejects_garbage() {
        assert_eq!(base_to_display("not-a-number", 6), None);
        assert_eq!(base_to_display("", 6), None);
    }

    #[test]
    fn minute_floor_aligns_to_bucket() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        let floored = minute_floor(ts);
        assert_eq!(floored, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(minute_floor(floored), floored);
    }
}
