//! Small validators shared across workers.

/// Validate a LISTEN/NOTIFY channel name before it is interpolated into SQL.
///
/// Channel names are identifiers, not parameters, so they must match
/// `^[a-z_][a-z0-9_]*$` exactly.
pub fn is_valid_channel(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Keep only finite, strictly positive prices.
pub fn validate_positive_price(price: f64) -> Option<f64> {
    if price.is_finite() && price > 0.0 {
        Some(price)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        assert!(is_valid_channel("pair_created"));
        assert!(is_valid_channel("_internal"));
        assert!(is_valid_channel("ch2"));
        assert!(!is_valid_channel(""));
        assert!(!is_valid_channel("2ch"));
        assert!(!is_valid_channel("Pair_Created"));
        assert!(!is_valid_channel("pair-created"));
        assert!(!is_valid_channel("pair created; DROP TABLE trades"));
    }

    #[test]
    fn price_validation() {
        assert_eq!(validate_positive_price(0.002), Some(0.002));
        assert_eq!(validate_positive_price(0.0), None);
        assert_eq!(validate_positive_price(-1.0), None);
        assert_eq!(validate_positive_price(f64::NAN), None);
        assert_eq!(validate_positive_price(f64::INFINITY), None);
    }
}
