//! Tolerance-aware floating point comparisons for time bookkeeping.
//!
//! Time accumulation across windows is subject to round-off, so every
//! comparison against a window boundary goes through these helpers with an
//! epsilon derived from the configured number of valid digits
//! (`eps = 10^-validDigits`).

/// Default comparison tolerance, `10^-14`.
pub const NUMERICAL_ZERO: f64 = 1.0e-14;

/// `a == b` within `eps`.
#[inline]
pub fn equals(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() <= eps
}

/// `a > b` by more than `eps`.
#[inline]
pub fn greater(a: f64, b: f64, eps: f64) -> bool {
    a - b > eps
}

/// `a >= b` within `eps`.
#[inline]
pub fn greater_equals(a: f64, b: f64, eps: f64) -> bool {
    a - b >= -eps
}

/// Epsilon for a number of valid digits, `10^-digits`.
///
/// Digits outside `[1, 16]` make no sense for an `f64` and are rejected by
/// the configuration layer before this is ever called.
#[inline]
pub fn eps_from_valid_digits(digits: u32) -> f64 {
    10f64.powi(-(digits as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_within_eps() {
        assert!(equals(1.0, 1.0 + 1e-15, NUMERICAL_ZERO));
        assert!(!equals(1.0, 1.0 + 1e-13, NUMERICAL_ZERO));
    }

    #[test]
    fn greater_needs_margin() {
        assert!(!greater(1.0 + 1e-15, 1.0, NUMERICAL_ZERO));
        assert!(greater(1.0 + 1e-13, 1.0, NUMERICAL_ZERO));
    }

    #[test]
    fn greater_equals_is_forgiving() {
        assert!(greater_equals(1.0 - 1e-15, 1.0, NUMERICAL_ZERO));
        assert!(!greater_equals(1.0 - 1e-13, 1.0, NUMERICAL_ZERO));
    }

    #[test]
    fn eps_matches_digits() {
        assert!((eps_from_valid_digits(10) - 1e-10).abs() < 1e-24);
    }
}
