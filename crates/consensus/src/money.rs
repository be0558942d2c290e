//! Monetary units, coin ids, and money range rules.

pub type Amount = i64;

/// Identifies the asset an output is denominated in.
pub type CoinId = u16;

/// The native coin of the chain.
pub const MEER_COIN: CoinId = 0;

pub const COIN: Amount = 100_000_000;
pub const CENT: Amount = 1_000_000;

/// No amount larger than this (in atoms) is valid.
pub const MAX_MONEY: Amount = 21_024_000 * COIN;

pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_range_bounds() {
        assert!(money_range(0));
        assert!(money_range(MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(MAX_MONEY + 1));
    }
}
