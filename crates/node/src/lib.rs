//! Transaction admission and block processing core of the dagd node.

pub mod block_manager;
pub mod chain;
pub mod chain_state;
pub mod config;
pub mod events;
pub mod header_sync;
pub mod mempool;
pub mod mempool_file;
pub mod peers;
pub mod progress;
pub mod reject;
pub mod stats;
pub mod template;

pub use block_manager::{
    BlockManager, BlockManagerConfig, BlockManagerContext, BlockManagerError, BlockManagerHandle,
};
pub use chain::{BlockChain, ChainError, TxChainView};
pub use events::{EventFeed, Notification};
pub use mempool::{MempoolConfig, MempoolError, MempoolErrorKind, MempoolPolicy, TxDesc, TxManager, TxPool};
pub use reject::{extract_reject_code, RejectCode};
