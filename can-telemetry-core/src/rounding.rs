//! Decimal rounding helpers

/// Round to `dp` decimal places, ties to even; negative `dp` rounds to tens,
/// hundreds, ...
pub fn round_to(value: f64, dp: i32) -> f64 {
    let rounded = if dp >= 0 {
        let scale = 10f64.powi(dp);
        (value * scale).round_ties_even() / scale
    } else {
        let scale = 10f64.powi(-dp);
        (value / scale).round_ties_even() * scale
    };
    // Avoid "-0" in logs and CSV rows
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Magnitude-dependent rounding for sensors whose range spans orders of magnitude.
///
/// `< 100` keeps 2 decimals, `< 1 000` keeps 1, `< 10 000` rounds to an integer and
/// `< 100 000` rounds to the nearest 10. Larger values are returned unchanged.
pub fn round_progressive(value: f64) -> f64 {
    if value < 100.0 {
        round_to(value, 2)
    } else if value < 1_000.0 {
        round_to(value, 1)
    } else if value < 10_000.0 {
        round_to(value, 0)
    } else if value < 100_000.0 {
        round_to(value, -1)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.235, 1), 1.2);
        assert_eq!(round_to(-0.0001, 2), 0.0);
        assert_eq!(round_to(12345.0, -1), 12340.0);
    }

    #[test]
    fn test_ties_round_to_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(-2.5, 0), -2.0);
        assert_eq!(round_to(12355.0, -1), 12360.0);
    }

    #[test]
    fn test_progressive_thresholds() {
        assert_eq!(round_progressive(99.999), 100.0);
        assert_eq!(round_progressive(999.99), 1000.0);
        assert_eq!(round_progressive(9999.9), 10000.0);
        assert_eq!(round_progressive(99999.0), 100000.0);
    }

    #[test]
    fn test_progressive_within_bands() {
        assert_eq!(round_progressive(7.0123), 7.01);
        assert_eq!(round_progressive(512.345), 512.3);
        assert_eq!(round_progressive(4321.6), 4322.0);
        assert_eq!(round_progressive(54_321.0), 54_320.0);
        assert_eq!(round_progressive(250_000.123), 250_000.123);
    }
}
