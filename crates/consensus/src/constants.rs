//! Consensus-wide constants shared across validation.

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: usize = 1_048_576;
/// The maximum size of a single serialized transaction (network rule).
pub const MAX_TX_SIZE: usize = MAX_BLOCK_SIZE;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = MAX_BLOCK_SIZE as u32 / 50;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: u64 = 16;

/// Lock times below this value are block heights, above it unix timestamps.
pub const LOCK_TIME_THRESHOLD: u32 = 500_000_000;
/// Largest lock time a transaction may carry.
pub const MAX_LOCK_TIME: u32 = i32::MAX as u32;
/// Sequence number that marks an input as final.
pub const MAX_TX_IN_SEQUENCE_NUM: u32 = u32::MAX;

/// Relative lock-time fields carried in the input sequence (BIP68 layout).
pub const SEQUENCE_LOCK_TIME_DISABLED: u32 = 1 << 31;
pub const SEQUENCE_LOCK_TIME_IS_SECONDS: u32 = 1 << 22;
pub const SEQUENCE_LOCK_TIME_MASK: u32 = 0x0000_ffff;
pub const SEQUENCE_LOCK_TIME_GRANULARITY: u32 = 9;

/// Largest transaction relayed under standardness rules.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
/// Largest signature script relayed under standardness rules.
pub const MAX_STANDARD_SIG_SCRIPT_SIZE: usize = 1650;

/// Minimum and maximum coinbase signature script length.
pub const MIN_COINBASE_SCRIPT_LEN: usize = 2;
pub const MAX_COINBASE_SCRIPT_LEN: usize = 100;
