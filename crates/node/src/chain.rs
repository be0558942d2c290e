//! Contracts for the chain collaborators consumed by the mempool and the
//! block manager.
//!
//! The DAG ordering engine, script interpreter and block storage live behind
//! these traits; this crate only decides what to ask them and when.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dagd_consensus::{Amount, CoinId, Hash256};
use dagd_primitives::block::Block;
use dagd_primitives::outpoint::OutPoint;
use dagd_primitives::transaction::{Transaction, TxType};

use crate::stats::hash256_to_hex;

/// Height recorded for outputs that only exist in the mempool.
pub const UNMINED_HEIGHT: u64 = 0x7fff_ffff;

/// Snapshot of the chain tip as seen after the last processed block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BestSnapshot {
    pub hash: Hash256,
    pub height: u64,
    /// Position of the tip in the DAG's total order.
    pub order: u64,
    pub median_time: i64,
    pub tips: Vec<Hash256>,
    pub total_txns: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UtxoEntry {
    pub amount: Amount,
    pub coin_id: CoinId,
    pub script_pubkey: Vec<u8>,
    pub block_height: u64,
    pub is_coinbase: bool,
    pub spent: bool,
}

impl UtxoEntry {
    pub fn is_unmined(&self) -> bool {
        self.block_height == UNMINED_HEIGHT
    }
}

/// Outputs resolved for one transaction's inputs.
#[derive(Clone, Debug, Default)]
pub struct UtxoView {
    entries: HashMap<OutPoint, UtxoEntry>,
    /// Owner script of the token a mint transaction creates supply for.
    pub token_owner: Option<(CoinId, Vec<u8>)>,
}

impl UtxoView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Entry for `outpoint` if it exists and is unspent.
    pub fn unspent(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint).filter(|entry| !entry.spent)
    }

    pub fn insert(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.entries.insert(outpoint, entry);
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.entries.remove(outpoint)
    }

    /// Adds every output of `tx` as unspent at `height`.
    pub fn add_tx_outputs(&mut self, tx: &Transaction, txid: Hash256, height: u64) {
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.vout.iter().enumerate() {
            self.entries.insert(
                OutPoint::new(txid, index as u32),
                UtxoEntry {
                    amount: output.value,
                    coin_id: output.coin_id,
                    script_pubkey: output.script_pubkey.clone(),
                    block_height: height,
                    is_coinbase,
                    spent: false,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Earliest height and time at which a transaction's relative locks allow it
/// to be mined. `-1` disables a component.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SequenceLock {
    pub seconds: i64,
    pub block_height: i64,
}

impl SequenceLock {
    pub fn disabled() -> Self {
        Self {
            seconds: -1,
            block_height: -1,
        }
    }

    pub fn is_active(&self, next_height: u64, median_time: i64) -> bool {
        let height = i64::try_from(next_height).unwrap_or(i64::MAX);
        self.seconds < median_time && self.block_height < height
    }
}

/// Options passed through to block processing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BehaviorFlags {
    /// The block was pre-validated against the header list, skip expensive checks.
    pub fast_add: bool,
    pub no_pow_check: bool,
}

impl BehaviorFlags {
    pub fn fast_add() -> Self {
        Self {
            fast_add: true,
            ..Self::default()
        }
    }
}

/// Classification of a consensus rule violation reported by the chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainRuleCode {
    Duplicate,
    Obsolete,
    CheckpointMismatch,
    ForkTooOld,
    MissingParent,
    BadBlock,
    BadTransaction,
    BadScript,
    SpentOutput,
}

impl ChainRuleCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChainRuleCode::Duplicate => "duplicate",
            ChainRuleCode::Obsolete => "obsolete",
            ChainRuleCode::CheckpointMismatch => "checkpoint-mismatch",
            ChainRuleCode::ForkTooOld => "fork-too-old",
            ChainRuleCode::MissingParent => "missing-parent",
            ChainRuleCode::BadBlock => "bad-block",
            ChainRuleCode::BadTransaction => "bad-txns",
            ChainRuleCode::BadScript => "bad-script",
            ChainRuleCode::SpentOutput => "spent-output",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChainError {
    /// Expected validation outcome; never fatal.
    Rule {
        code: ChainRuleCode,
        message: String,
    },
    /// Storage or internal failure of the collaborator.
    Storage(String),
}

impl ChainError {
    pub fn rule(code: ChainRuleCode, message: impl Into<String>) -> Self {
        ChainError::Rule {
            code,
            message: message.into(),
        }
    }

    pub fn is_rule(&self) -> bool {
        matches!(self, ChainError::Rule { .. })
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Rule { message, .. } => write!(f, "{message}"),
            ChainError::Storage(message) => write!(f, "chain storage failure: {message}"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Chain queries needed to admit a transaction.
pub trait TxChainView: Send + Sync {
    fn best_snapshot(&self) -> BestSnapshot;

    /// Entries for every input of `tx` plus any of its own outputs that exist.
    fn fetch_utxo_view(&self, tx: &Transaction) -> Result<UtxoView, ChainError>;

    fn calc_sequence_lock(
        &self,
        tx: &Transaction,
        view: &UtxoView,
    ) -> Result<SequenceLock, ChainError>;

    fn verify_scripts(&self, tx: &Transaction, view: &UtxoView) -> Result<(), ChainError>;

    fn is_tx_type_valid(&self, tx_type: TxType, next_height: u64) -> bool;

    fn token_owner_script(&self, coin_id: CoinId) -> Result<Option<Vec<u8>>, ChainError>;
}

/// Chain mutation entry points driven by the block manager.
pub trait BlockChain: Send + Sync {
    /// Returns whether the block was held as an orphan.
    fn process_block(&self, block: Arc<Block>, flags: BehaviorFlags) -> Result<bool, ChainError>;

    fn best_snapshot(&self) -> BestSnapshot;

    /// Current tips a new block may legitimately build on.
    fn tip_generation(&self) -> Vec<Hash256>;

    /// Whether the chain believes it has caught up with the network.
    fn is_current(&self) -> bool;

    fn have_block(&self, hash: &Hash256) -> bool;
}

pub(crate) fn describe_outpoint(outpoint: &OutPoint) -> String {
    format!("{}:{}", hash256_to_hex(&outpoint.hash), outpoint.index)
}
