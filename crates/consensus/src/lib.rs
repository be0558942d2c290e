//! Consensus constants, parameters, and the anticone security calculator.

pub mod anticone;
pub mod constants;
pub mod money;
pub mod params;

pub use anticone::{anticone_size, AntiConeError};
pub use money::{money_range, Amount, CoinId, COIN, MAX_MONEY, MEER_COIN};
pub use params::{chain_params, ChainParams, Checkpoint, Network};

pub type Hash256 = [u8; 32];
