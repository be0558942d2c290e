//! Anticone size bound for DAG block ordering.
//!
//! Blocks mined within one propagation round of each other land in each
//! other's anticone. Treating the number of such blocks as Poisson with
//! mean `2 * delay * rate`, the anticone size `k` is the smallest value
//! whose tail probability falls below the requested security level.

use std::fmt;

/// Expected concurrent blocks at or above this value are a misconfiguration.
pub const MAX_EXPECTED_CONCURRENT_BLOCKS: f64 = 1000.0;

/// Upper bound on the number of tail terms evaluated.
pub const MAX_ANTICONE_SEARCH: u32 = 1000;

#[derive(Clone, Debug, PartialEq)]
pub enum AntiConeError {
    /// `2 * delay * rate` is too large for any meaningful k.
    ExpectTooLarge { expect: f64 },
    /// The tail never dropped below the security level within the search bound.
    SearchExhausted { expect: f64, security: f64 },
}

impl fmt::Display for AntiConeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AntiConeError::ExpectTooLarge { expect } => write!(
                f,
                "expected concurrent blocks {expect} exceeds {MAX_EXPECTED_CONCURRENT_BLOCKS}"
            ),
            AntiConeError::SearchExhausted { expect, security } => write!(
                f,
                "no anticone size below {MAX_ANTICONE_SEARCH} reaches security {security} (expected concurrent blocks {expect})"
            ),
        }
    }
}

impl std::error::Error for AntiConeError {}

/// Minimum anticone size for the given propagation `delay` (seconds),
/// block `rate` (blocks per second) and `security` target.
pub fn anticone_size(delay: f64, rate: f64, security: f64) -> Result<u32, AntiConeError> {
    let expect = 2.0 * delay * rate;
    if expect >= MAX_EXPECTED_CONCURRENT_BLOCKS {
        return Err(AntiConeError::ExpectTooLarge { expect });
    }

    let coef = (-expect).exp();
    let mut sum = 1.0_f64;
    for k in 0..MAX_ANTICONE_SEARCH {
        let mut part = coef;
        for j in 1..=k {
            part *= expect / f64::from(j);
        }
        sum -= part;
        if sum < security {
            return Ok(k);
        }
    }

    Err(AntiConeError::SearchExhausted { expect, security })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_sizes_for_fifteen_second_delay() {
        assert_eq!(anticone_size(15.0, 1.0 / 5.0, 0.01), Ok(12));
        assert_eq!(anticone_size(15.0, 1.0 / 10.0, 0.01), Ok(8));
        assert_eq!(anticone_size(15.0, 1.0 / 25.0, 0.01), Ok(4));
        assert_eq!(anticone_size(15.0, 1.0 / 50.0, 0.01), Ok(3));
    }

    #[test]
    fn size_never_grows_as_rate_drops() {
        let mut previous = u32::MAX;
        for blocks_per_interval in 1..=120u32 {
            let rate = 1.0 / f64::from(blocks_per_interval);
            let k = anticone_size(15.0, rate, 0.01).expect("anticone size");
            assert!(k <= previous, "k grew from {previous} to {k} at rate {rate}");
            previous = k;
        }
    }

    #[test]
    fn stricter_security_needs_larger_k() {
        let loose = anticone_size(15.0, 0.1, 0.1).expect("loose");
        let strict = anticone_size(15.0, 0.1, 0.0001).expect("strict");
        assert!(strict > loose);
    }

    #[test]
    fn rejects_expect_at_limit() {
        assert!(matches!(
            anticone_size(500.0, 1.0, 0.01),
            Err(AntiConeError::ExpectTooLarge { .. })
        ));
        assert!(matches!(
            anticone_size(1.0, 1000.0, 0.01),
            Err(AntiConeError::ExpectTooLarge { .. })
        ));
    }

    #[test]
    fn exhausted_search_is_distinguishable_from_zero() {
        // e^-998 underflows to zero, so the tail never shrinks.
        assert!(matches!(
            anticone_size(1.0, 499.0, 0.01),
            Err(AntiConeError::SearchExhausted { .. })
        ));
        assert_eq!(anticone_size(0.0, 1.0, 0.01), Ok(0));
    }
}
