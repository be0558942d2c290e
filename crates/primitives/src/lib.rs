//! Core block/transaction types and consensus serialization.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use block::{Block, BlockDecodeError, BlockHeader};
pub use hash::sha256d;
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut, TxType};
