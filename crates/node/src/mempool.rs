//! Transaction admission: the pending pool, the orphan pool and the policy
//! that decides what may enter them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;
use dagd_consensus::constants::{
    COINBASE_MATURITY, LOCK_TIME_THRESHOLD, MAX_COINBASE_SCRIPT_LEN, MAX_LOCK_TIME,
    MAX_STANDARD_SIG_SCRIPT_SIZE, MAX_STANDARD_TX_SIZE, MAX_TX_IN_SEQUENCE_NUM, MAX_TX_SIZE,
    MIN_COINBASE_SCRIPT_LEN,
};
use dagd_consensus::money::{money_range, Amount, CoinId, COIN, MAX_MONEY, MEER_COIN};
use dagd_consensus::Hash256;
use dagd_log::{log_debug, log_trace, Logger};
use dagd_primitives::outpoint::OutPoint;
use dagd_primitives::transaction::{Transaction, TxOut, TxType};
use dagd_script::{
    classify_script_pubkey, count_sigops, is_push_only, is_unspendable, p2sh_sigops, ScriptClass,
};
use serde::{Deserialize, Serialize};

use crate::chain::{describe_outpoint, ChainError, TxChainView, UtxoEntry, UtxoView, UNMINED_HEIGHT};
use crate::stats::{hash256_to_hex, MempoolMetrics};

/// Priority above which a transaction paying less than the relay fee is
/// still relayed: one coin aged one day (144 blocks) in a 250-byte tx.
pub const MIN_HIGH_PRIORITY: f64 = (COIN as f64) * 144.0 / 250.0;

/// Transactions this large never qualify for free relay.
const MAX_FREE_TX_SIZE: usize = 49_000;

/// Approximate size of the input that later spends an output, used by the
/// dust rule.
const DUST_SPEND_SIZE: usize = 165;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    Duplicate,
    NonStandard,
    Dust,
    InsufficientFee,
    Invalid,
    Obsolete,
    /// The chain collaborator failed; not a verdict on the transaction.
    Chain,
}

impl MempoolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MempoolErrorKind::Duplicate => "duplicate",
            MempoolErrorKind::NonStandard => "non-standard",
            MempoolErrorKind::Dust => "dust",
            MempoolErrorKind::InsufficientFee => "insufficient-fee",
            MempoolErrorKind::Invalid => "invalid",
            MempoolErrorKind::Obsolete => "obsolete",
            MempoolErrorKind::Chain => "chain",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    pub message: String,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_rule_violation(&self) -> bool {
        self.kind != MempoolErrorKind::Chain
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MempoolError {}

impl From<ChainError> for MempoolError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Rule { message, .. } => {
                MempoolError::new(MempoolErrorKind::Invalid, message)
            }
            ChainError::Storage(message) => MempoolError::new(
                MempoolErrorKind::Chain,
                format!("chain storage failure: {message}"),
            ),
        }
    }
}

fn rule(kind: MempoolErrorKind, message: impl Into<String>) -> MempoolError {
    MempoolError::new(kind, message)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolPolicy {
    /// Skip the standardness checks entirely.
    pub accept_non_standard: bool,
    pub max_tx_version: u32,
    /// Atoms per 1000 bytes.
    pub min_relay_fee_per_kb: i64,
    /// Thousands of bytes per minute of free transactions admitted when
    /// rate limiting is requested.
    pub free_tx_relay_limit: f64,
    pub max_orphan_txs: usize,
    pub max_orphan_tx_size: usize,
    pub max_sig_ops_per_tx: u32,
    /// Fees above `size * max_fee_multiplier * min_relay_fee_per_kb / 1000`
    /// are refused unless high fees are explicitly allowed.
    pub max_fee_multiplier: i64,
    pub orphan_ttl_secs: u64,
    pub max_null_data_outputs: usize,
    pub disable_relay_priority: bool,
    /// Persisted entries older than this are dropped on load.
    pub mempool_expiry_secs: u64,
}

impl Default for MempoolPolicy {
    fn default() -> Self {
        Self {
            accept_non_standard: false,
            max_tx_version: 1,
            min_relay_fee_per_kb: 10_000,
            free_tx_relay_limit: 15.0,
            max_orphan_txs: 100,
            max_orphan_tx_size: 100_000,
            max_sig_ops_per_tx: 4_000,
            max_fee_multiplier: 10_000,
            orphan_ttl_secs: 15 * 60,
            max_null_data_outputs: 1,
            disable_relay_priority: false,
            mempool_expiry_secs: 72 * 60 * 60,
        }
    }
}

impl MempoolPolicy {
    pub fn min_relay_fee_for_size(&self, size: usize) -> Amount {
        min_relay_fee_for_size(self.min_relay_fee_per_kb, size)
    }
}

/// `ceil(size * rate / 1000)`, at least one atom whenever the rate is positive.
pub fn min_relay_fee_for_size(min_fee_per_kb: Amount, size: usize) -> Amount {
    if min_fee_per_kb <= 0 {
        return 0;
    }
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    let scaled = min_fee_per_kb.saturating_mul(size);
    let fee = scaled / 1000 + i64::from(scaled % 1000 != 0);
    fee.clamp(1, MAX_MONEY)
}

/// An output is dust when spending it would cost more than a third of its
/// value at the relay fee rate. Unspendable outputs are always dust.
pub fn is_dust(output: &TxOut, min_fee_per_kb: Amount) -> bool {
    if is_unspendable(&output.script_pubkey) {
        return true;
    }
    let total = output.serialized_size().saturating_add(DUST_SPEND_SIZE);
    let total = i64::try_from(total).unwrap_or(i64::MAX);
    output.value.saturating_mul(1000) / total.saturating_mul(3) < min_fee_per_kb
}

/// A pooled transaction.
#[derive(Clone, Debug)]
pub struct TxDesc {
    pub tx: Arc<Transaction>,
    pub txid: Hash256,
    /// Unix seconds at admission.
    pub added: u64,
    /// Chain height when the transaction entered the pool.
    pub height: u64,
    pub fee: Amount,
    pub fee_per_kb: Amount,
    pub size: usize,
    pub starting_priority: f64,
}

#[derive(Clone, Debug)]
struct OrphanTx {
    tx: Arc<Transaction>,
    txid: Hash256,
    received: u64,
    size: usize,
    missing_parents: Vec<Hash256>,
    rate_limit: bool,
    allow_high_fees: bool,
}

#[derive(Debug, Default)]
struct FreeRelayLimiter {
    count: f64,
    last_time: u64,
}

impl FreeRelayLimiter {
    /// Exponentially decays the budget with a ten minute time constant.
    fn admit(&mut self, limit_kb_per_minute: f64, size: usize, now: u64) -> Result<(), MempoolError> {
        let delta = now.saturating_sub(self.last_time);
        self.count *= (1.0_f64 - 1.0_f64 / 600.0_f64).powf(delta as f64);
        self.last_time = now;

        let threshold = limit_kb_per_minute * 10.0 * 1000.0;
        if self.count >= threshold {
            return Err(rule(
                MempoolErrorKind::InsufficientFee,
                "rejected by free transaction rate limiter",
            ));
        }
        self.count += size as f64;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PoolState {
    pool: HashMap<Hash256, Arc<TxDesc>>,
    /// Spent outpoint to the pooled transaction spending it.
    outpoints: HashMap<OutPoint, Hash256>,
    orphans: HashMap<Hash256, OrphanTx>,
    orphans_by_parent: HashMap<Hash256, Vec<Hash256>>,
    free_relay: FreeRelayLimiter,
    last_updated: u64,
}

impl PoolState {
    fn take_orphans_for_parent(&mut self, parent_txid: &Hash256) -> Vec<OrphanTx> {
        let Some(txids) = self.orphans_by_parent.remove(parent_txid) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for txid in txids {
            if let Some(orphan) = self.remove_orphan(&txid) {
                out.push(orphan);
            }
        }
        out
    }

    fn remove_orphan(&mut self, txid: &Hash256) -> Option<OrphanTx> {
        let orphan = self.orphans.remove(txid)?;
        for parent in &orphan.missing_parents {
            if let Some(children) = self.orphans_by_parent.get_mut(parent) {
                children.retain(|child| child != txid);
                if children.is_empty() {
                    self.orphans_by_parent.remove(parent);
                }
            }
        }
        Some(orphan)
    }

    fn insert_orphan(&mut self, orphan: OrphanTx) {
        for parent in &orphan.missing_parents {
            let children = self.orphans_by_parent.entry(*parent).or_default();
            if !children.contains(&orphan.txid) {
                children.push(orphan.txid);
            }
        }
        self.orphans.insert(orphan.txid, orphan);
    }

    fn evict_oldest_orphan(&mut self) -> bool {
        let Some(oldest_txid) = self
            .orphans
            .values()
            .min_by_key(|orphan| (orphan.received, orphan.txid))
            .map(|orphan| orphan.txid)
        else {
            return false;
        };
        self.remove_orphan(&oldest_txid);
        true
    }

    fn prune_orphans(&mut self, ttl_secs: u64, now: u64) -> usize {
        if ttl_secs == 0 {
            return 0;
        }
        let cutoff = now.saturating_sub(ttl_secs);
        let stale: Vec<Hash256> = self
            .orphans
            .values()
            .filter(|orphan| orphan.received <= cutoff)
            .map(|orphan| orphan.txid)
            .collect();
        for txid in &stale {
            self.remove_orphan(txid);
        }
        stale.len()
    }

    fn spends_pool_outpoint(&self, tx: &Transaction) -> Option<(OutPoint, Hash256)> {
        tx.vin.iter().find_map(|input| {
            self.outpoints
                .get(&input.prevout)
                .map(|spender| (input.prevout, *spender))
        })
    }

    fn remove_transaction(&mut self, txid: &Hash256, remove_redeemers: bool, now: u64) -> usize {
        let mut doomed = vec![*txid];
        if remove_redeemers {
            let mut seen: HashSet<Hash256> = HashSet::from([*txid]);
            let mut queue = VecDeque::from([*txid]);
            while let Some(parent) = queue.pop_front() {
                let Some(desc) = self.pool.get(&parent) else {
                    continue;
                };
                for index in 0..desc.tx.vout.len() {
                    let outpoint = OutPoint::new(parent, index as u32);
                    if let Some(spender) = self.outpoints.get(&outpoint).copied() {
                        if seen.insert(spender) {
                            doomed.push(spender);
                            queue.push_back(spender);
                        }
                    }
                }
            }
        }

        // Descendants go first so no spender outlives its parent.
        let mut removed = 0;
        for txid in doomed.iter().rev() {
            if let Some(desc) = self.pool.remove(txid) {
                for input in &desc.tx.vin {
                    self.outpoints.remove(&input.prevout);
                }
                self.last_updated = now;
                removed += 1;
            }
        }
        removed
    }
}

/// Result of running the admission pipeline on one transaction.
enum Admission {
    Accepted(Arc<TxDesc>),
    /// Inputs reference these unknown parent transactions.
    Orphan(Vec<Hash256>),
}

pub struct MempoolConfig {
    pub policy: MempoolPolicy,
    pub chain: Arc<dyn TxChainView>,
    pub coinbase_maturity: u64,
    pub logger: Logger,
    pub metrics: Arc<MempoolMetrics>,
    /// Receives every newly pooled transaction; sends never block.
    pub tx_added: Option<Sender<Arc<TxDesc>>>,
}

impl MempoolConfig {
    pub fn new(policy: MempoolPolicy, chain: Arc<dyn TxChainView>, logger: Logger) -> Self {
        Self {
            policy,
            chain,
            coinbase_maturity: COINBASE_MATURITY,
            logger,
            metrics: Arc::new(MempoolMetrics::default()),
            tx_added: None,
        }
    }
}

/// Thread-safe transaction memory pool.
///
/// One reader/writer lock guards all state. Public mutators take the write
/// lock once and run the whole pipeline, including the orphan cascade, under
/// it; the private `*_locked` helpers never lock.
pub struct TxPool {
    cfg: MempoolConfig,
    state: RwLock<PoolState>,
}

impl TxPool {
    pub fn new(cfg: MempoolConfig) -> Self {
        Self {
            cfg,
            state: RwLock::new(PoolState::default()),
        }
    }

    pub fn policy(&self) -> &MempoolPolicy {
        &self.cfg.policy
    }

    pub fn metrics(&self) -> &Arc<MempoolMetrics> {
        &self.cfg.metrics
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admits `tx` and any orphans it unblocks, parents before dependents.
    ///
    /// A transaction with unknown inputs is parked in the orphan pool when
    /// `allow_orphans` is set and the returned list is empty.
    pub fn process_transaction(
        &self,
        tx: Arc<Transaction>,
        allow_orphans: bool,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<Vec<Arc<TxDesc>>, MempoolError> {
        let txid = tx.txid();
        let mut state = self.write_state();
        let result = self.process_transaction_locked(
            &mut state,
            tx,
            txid,
            allow_orphans,
            rate_limit,
            allow_high_fees,
        );
        match &result {
            Ok(accepted) => self.cfg.metrics.note_accepted(accepted.len() as u64),
            Err(err) => {
                self.cfg.metrics.note_rejected();
                log_debug!(
                    self.cfg.logger,
                    "Rejected transaction {}: {}",
                    hash256_to_hex(&txid),
                    err
                );
            }
        }
        result
    }

    fn process_transaction_locked(
        &self,
        state: &mut PoolState,
        tx: Arc<Transaction>,
        txid: Hash256,
        allow_orphans: bool,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<Vec<Arc<TxDesc>>, MempoolError> {
        match self.maybe_accept_locked(state, &tx, txid, true, rate_limit, allow_high_fees)? {
            Admission::Accepted(desc) => {
                let mut accepted = vec![Arc::clone(&desc)];
                accepted.extend(self.process_orphans_locked(state, desc.txid));
                Ok(accepted)
            }
            Admission::Orphan(missing) => {
                if !allow_orphans {
                    let parent = missing.first().copied().unwrap_or([0u8; 32]);
                    return Err(rule(
                        MempoolErrorKind::Duplicate,
                        format!(
                            "orphan transaction {} references outputs of unknown or fully-spent transaction {}",
                            hash256_to_hex(&txid),
                            hash256_to_hex(&parent)
                        ),
                    ));
                }
                self.add_orphan_locked(state, tx, txid, missing, rate_limit, allow_high_fees)?;
                Ok(Vec::new())
            }
        }
    }

    /// Runs the admission pipeline without touching the orphan pool.
    ///
    /// Returns the missing parent hashes (and no descriptor) when inputs are
    /// unknown, or the new descriptor when the transaction was pooled.
    pub fn maybe_accept_transaction(
        &self,
        tx: Arc<Transaction>,
        is_new: bool,
        rate_limit: bool,
    ) -> Result<(Vec<Hash256>, Option<Arc<TxDesc>>), MempoolError> {
        let txid = tx.txid();
        let mut state = self.write_state();
        let admission = self.maybe_accept_locked(&mut state, &tx, txid, is_new, rate_limit, true)?;
        Ok(match admission {
            Admission::Accepted(desc) => {
                self.cfg.metrics.note_accepted(1);
                (Vec::new(), Some(desc))
            }
            Admission::Orphan(missing) => (missing, None),
        })
    }

    fn maybe_accept_locked(
        &self,
        state: &mut PoolState,
        tx: &Arc<Transaction>,
        txid: Hash256,
        is_new: bool,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<Admission, MempoolError> {
        let policy = &self.cfg.policy;
        let chain = &self.cfg.chain;

        if state.pool.contains_key(&txid) || state.orphans.contains_key(&txid) {
            return Err(rule(
                MempoolErrorKind::Duplicate,
                format!("already have transaction {}", hash256_to_hex(&txid)),
            ));
        }

        let best = chain.best_snapshot();
        let next_height = best.height.saturating_add(1);
        if !chain.is_tx_type_valid(tx.tx_type, next_height) {
            return Err(rule(
                MempoolErrorKind::NonStandard,
                format!(
                    "transaction type {} is not allowed at height {next_height}",
                    tx.tx_type.as_str()
                ),
            ));
        }

        check_transaction_sanity(tx)?;

        if tx.is_coinbase() {
            return Err(rule(
                MempoolErrorKind::Invalid,
                format!("transaction {} is an individual coinbase", hash256_to_hex(&txid)),
            ));
        }

        if tx.lock_time > MAX_LOCK_TIME {
            return Err(rule(
                MempoolErrorKind::Invalid,
                format!(
                    "transaction lock time {} is greater than the maximum of {MAX_LOCK_TIME}",
                    tx.lock_time
                ),
            ));
        }

        if is_expired(tx, next_height) {
            return Err(rule(
                MempoolErrorKind::Invalid,
                format!(
                    "transaction {} expired at height {}",
                    hash256_to_hex(&txid),
                    tx.expire
                ),
            ));
        }

        if !policy.accept_non_standard {
            check_standard(tx, policy, next_height, best.median_time)?;
        }

        if let Some((outpoint, spender)) = state.spends_pool_outpoint(tx) {
            return Err(rule(
                MempoolErrorKind::Duplicate,
                format!(
                    "output {} already spent by transaction {} in the memory pool",
                    describe_outpoint(&outpoint),
                    hash256_to_hex(&spender)
                ),
            ));
        }

        if tx.tx_type.is_token() {
            self.check_token_transaction(tx)?;
            let desc = self.add_transaction_locked(state, tx, txid, best.height, 0, 0.0);
            return Ok(Admission::Accepted(desc));
        }

        let mut view = chain.fetch_utxo_view(tx)?;
        overlay_pool_outputs(state, tx, &mut view);

        for index in 0..tx.vout.len() {
            if view.unspent(&OutPoint::new(txid, index as u32)).is_some() {
                return Err(rule(
                    MempoolErrorKind::Duplicate,
                    format!("transaction {} already exists", hash256_to_hex(&txid)),
                ));
            }
        }

        let mut missing = Vec::new();
        for input in &tx.vin {
            if view.unspent(&input.prevout).is_none() && !missing.contains(&input.prevout.hash) {
                missing.push(input.prevout.hash);
            }
        }
        if !missing.is_empty() {
            return Ok(Admission::Orphan(missing));
        }

        let lock = chain.calc_sequence_lock(tx, &view)?;
        if !lock.is_active(next_height, best.median_time) {
            return Err(rule(
                MempoolErrorKind::NonStandard,
                "transaction's sequence locks on inputs not met",
            ));
        }

        let fee = self.check_inputs(tx, &view, next_height)?;

        let sig_ops = count_tx_sigops(tx, &view);
        if sig_ops > policy.max_sig_ops_per_tx {
            return Err(rule(
                MempoolErrorKind::NonStandard,
                format!(
                    "transaction {} has too many sigops: {sig_ops} > {}",
                    hash256_to_hex(&txid),
                    policy.max_sig_ops_per_tx
                ),
            ));
        }

        let size = tx.serialized_size();
        let min_fee = policy.min_relay_fee_for_size(size);
        if size >= MAX_FREE_TX_SIZE && fee < min_fee {
            return Err(rule(
                MempoolErrorKind::InsufficientFee,
                format!(
                    "transaction {} has {fee} fees which is under the required amount of {min_fee}",
                    hash256_to_hex(&txid)
                ),
            ));
        }

        let priority = calc_priority(tx, &view, next_height);
        if is_new && !policy.disable_relay_priority && fee < min_fee && priority <= MIN_HIGH_PRIORITY
        {
            return Err(rule(
                MempoolErrorKind::InsufficientFee,
                format!(
                    "transaction {} has insufficient priority ({priority} <= {MIN_HIGH_PRIORITY}) and fee {fee} under the required amount of {min_fee}",
                    hash256_to_hex(&txid)
                ),
            ));
        }

        if rate_limit && fee < min_fee {
            state
                .free_relay
                .admit(policy.free_tx_relay_limit, size, now_secs())?;
        }

        if !allow_high_fees {
            let max_fee = min_relay_fee_for_size(
                policy.min_relay_fee_per_kb,
                size.saturating_mul(usize::try_from(policy.max_fee_multiplier).unwrap_or(0)),
            );
            if max_fee > 0 && fee > max_fee {
                return Err(rule(
                    MempoolErrorKind::NonStandard,
                    format!(
                        "transaction {} has {fee} fee which is above the high fee threshold of {max_fee}",
                        hash256_to_hex(&txid)
                    ),
                ));
            }
        }

        chain.verify_scripts(tx, &view)?;

        let desc = self.add_transaction_locked(state, tx, txid, best.height, fee, priority);
        Ok(Admission::Accepted(desc))
    }

    fn check_token_transaction(&self, tx: &Transaction) -> Result<(), MempoolError> {
        let mut view = UtxoView::new();
        if tx.tx_type == TxType::TokenMint {
            let coin_id = tx
                .vout
                .first()
                .map(|output| output.coin_id)
                .unwrap_or(MEER_COIN);
            let owner = self.cfg.chain.token_owner_script(coin_id)?.ok_or_else(|| {
                rule(
                    MempoolErrorKind::Invalid,
                    format!("token {coin_id} has no owner to authorize minting"),
                )
            })?;
            view.token_owner = Some((coin_id, owner));
        }
        self.cfg.chain.verify_scripts(tx, &view)?;
        Ok(())
    }

    /// Value balance per coin and coinbase maturity. Returns the fee, which is
    /// paid in the native coin only.
    fn check_inputs(
        &self,
        tx: &Transaction,
        view: &UtxoView,
        next_height: u64,
    ) -> Result<Amount, MempoolError> {
        let mut value_in: HashMap<CoinId, Amount> = HashMap::new();
        for input in &tx.vin {
            let Some(entry) = view.unspent(&input.prevout) else {
                return Err(rule(
                    MempoolErrorKind::Invalid,
                    format!("output {} is missing or spent", describe_outpoint(&input.prevout)),
                ));
            };
            if entry.is_coinbase {
                let age = next_height.saturating_sub(entry.block_height);
                if age < self.cfg.coinbase_maturity {
                    return Err(rule(
                        MempoolErrorKind::Invalid,
                        format!(
                            "tried to spend coinbase output {} from height {} at height {next_height} before required maturity of {} blocks",
                            describe_outpoint(&input.prevout),
                            entry.block_height,
                            self.cfg.coinbase_maturity
                        ),
                    ));
                }
            }
            if !money_range(entry.amount) {
                return Err(rule(
                    MempoolErrorKind::Invalid,
                    format!("input value {} is out of range", entry.amount),
                ));
            }
            let total = value_in.entry(entry.coin_id).or_insert(0);
            *total = total
                .checked_add(entry.amount)
                .filter(|value| money_range(*value))
                .ok_or_else(|| rule(MempoolErrorKind::Invalid, "total input value out of range"))?;
        }

        let value_out = output_totals(tx)?;
        for (coin_id, out) in &value_out {
            let available = value_in.get(coin_id).copied().unwrap_or(0);
            if available < *out {
                return Err(rule(
                    MempoolErrorKind::Invalid,
                    format!(
                        "total value of all transaction inputs for coin {coin_id} ({available}) is less than the amount spent ({out})"
                    ),
                ));
            }
        }

        let fee_in = value_in.get(&MEER_COIN).copied().unwrap_or(0);
        let fee_out = value_out.get(&MEER_COIN).copied().unwrap_or(0);
        Ok(fee_in - fee_out)
    }

    fn add_transaction_locked(
        &self,
        state: &mut PoolState,
        tx: &Arc<Transaction>,
        txid: Hash256,
        height: u64,
        fee: Amount,
        starting_priority: f64,
    ) -> Arc<TxDesc> {
        let size = tx.serialized_size();
        let fee_per_kb = fee.saturating_mul(1000) / i64::try_from(size.max(1)).unwrap_or(i64::MAX);
        let now = now_secs();
        let desc = Arc::new(TxDesc {
            tx: Arc::clone(tx),
            txid,
            added: now,
            height,
            fee,
            fee_per_kb,
            size,
            starting_priority,
        });
        for input in &tx.vin {
            state.outpoints.insert(input.prevout, txid);
        }
        state.pool.insert(txid, Arc::clone(&desc));
        state.last_updated = now;

        if let Some(sender) = &self.cfg.tx_added {
            if sender.try_send(Arc::clone(&desc)).is_err() {
                log_debug!(
                    self.cfg.logger,
                    "Dropped added notification for transaction {}",
                    hash256_to_hex(&txid)
                );
            }
        }
        log_debug!(
            self.cfg.logger,
            "Accepted transaction {} (pool size: {})",
            hash256_to_hex(&txid),
            state.pool.len()
        );
        desc
    }

    fn add_orphan_locked(
        &self,
        state: &mut PoolState,
        tx: Arc<Transaction>,
        txid: Hash256,
        missing_parents: Vec<Hash256>,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<(), MempoolError> {
        let policy = &self.cfg.policy;
        let size = tx.serialized_size();
        if size > policy.max_orphan_tx_size {
            return Err(rule(
                MempoolErrorKind::NonStandard,
                format!(
                    "orphan transaction size of {size} bytes is larger than max allowed size of {} bytes",
                    policy.max_orphan_tx_size
                ),
            ));
        }
        if policy.max_orphan_txs == 0 {
            return Ok(());
        }

        let now = now_secs();
        let mut evicted = state.prune_orphans(policy.orphan_ttl_secs, now);
        while state.orphans.len() >= policy.max_orphan_txs {
            if !state.evict_oldest_orphan() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            self.cfg.metrics.note_evicted(evicted as u64);
        }

        state.insert_orphan(OrphanTx {
            tx,
            txid,
            received: now,
            size,
            missing_parents,
            rate_limit,
            allow_high_fees,
        });
        self.cfg.metrics.note_orphaned();
        log_debug!(
            self.cfg.logger,
            "Stored orphan transaction {} (total: {})",
            hash256_to_hex(&txid),
            state.orphans.len()
        );
        Ok(())
    }

    /// Re-runs every orphan waiting on `txid`, breadth first.
    pub fn process_orphans(&self, txid: &Hash256) -> Vec<Arc<TxDesc>> {
        let mut state = self.write_state();
        let accepted = self.process_orphans_locked(&mut state, *txid);
        self.cfg.metrics.note_accepted(accepted.len() as u64);
        accepted
    }

    fn process_orphans_locked(&self, state: &mut PoolState, parent: Hash256) -> Vec<Arc<TxDesc>> {
        let mut accepted = Vec::new();
        let mut queue = VecDeque::from([parent]);
        let mut visited = HashSet::new();
        while let Some(parent) = queue.pop_front() {
            if !visited.insert(parent) {
                continue;
            }
            for mut orphan in state.take_orphans_for_parent(&parent) {
                match self.maybe_accept_locked(
                    state,
                    &orphan.tx,
                    orphan.txid,
                    true,
                    orphan.rate_limit,
                    orphan.allow_high_fees,
                ) {
                    Ok(Admission::Accepted(desc)) => {
                        self.cfg.metrics.note_orphan_accepted();
                        queue.push_back(desc.txid);
                        accepted.push(desc);
                    }
                    Ok(Admission::Orphan(missing)) => {
                        orphan.missing_parents = missing;
                        state.insert_orphan(orphan);
                    }
                    Err(err) => {
                        self.cfg.metrics.note_orphan_purged();
                        log_debug!(
                            self.cfg.logger,
                            "Purged orphan transaction {}: {}",
                            hash256_to_hex(&orphan.txid),
                            err
                        );
                    }
                }
            }
        }
        accepted
    }

    /// Removes `tx`, and with `remove_redeemers` every pooled transaction
    /// that spends its outputs, recursively.
    pub fn remove_transaction(&self, tx: &Transaction, remove_redeemers: bool) {
        let mut state = self.write_state();
        state.remove_transaction(&tx.txid(), remove_redeemers, now_secs());
    }

    /// Removes pooled transactions that spend any outpoint `tx` spends.
    pub fn remove_double_spends(&self, tx: &Transaction) {
        let txid = tx.txid();
        let mut state = self.write_state();
        let now = now_secs();
        for input in &tx.vin {
            if let Some(spender) = state.outpoints.get(&input.prevout).copied() {
                if spender != txid {
                    log_trace!(
                        self.cfg.logger,
                        "Removing double spend {} of {}",
                        hash256_to_hex(&spender),
                        hash256_to_hex(&txid)
                    );
                    state.remove_transaction(&spender, true, now);
                }
            }
        }
    }

    pub fn remove_orphan(&self, txid: &Hash256) {
        let mut state = self.write_state();
        state.remove_orphan(txid);
    }

    /// Drops transactions whose expiry height is reached by the next block.
    pub fn prune_expired_tx(&self) -> usize {
        let next_height = self.cfg.chain.best_snapshot().height.saturating_add(1);
        let mut state = self.write_state();
        let expired: Vec<Hash256> = state
            .pool
            .values()
            .filter(|desc| is_expired(&desc.tx, next_height))
            .map(|desc| desc.txid)
            .collect();
        let now = now_secs();
        let mut removed = 0;
        for txid in expired {
            removed += state.remove_transaction(&txid, true, now);
            log_debug!(
                self.cfg.logger,
                "Pruned expired transaction {} from the mempool",
                hash256_to_hex(&txid)
            );
        }
        removed
    }

    /// Whether `txid` is pooled or waiting as an orphan.
    pub fn have_transaction(&self, txid: &Hash256) -> bool {
        let state = self.read_state();
        state.pool.contains_key(txid) || state.orphans.contains_key(txid)
    }

    pub fn is_transaction_in_pool(&self, txid: &Hash256) -> bool {
        self.read_state().pool.contains_key(txid)
    }

    pub fn is_orphan_in_pool(&self, txid: &Hash256) -> bool {
        self.read_state().orphans.contains_key(txid)
    }

    pub fn fetch_transaction(&self, txid: &Hash256) -> Option<Arc<Transaction>> {
        self.read_state()
            .pool
            .get(txid)
            .map(|desc| Arc::clone(&desc.tx))
    }

    pub fn fetch_tx_desc(&self, txid: &Hash256) -> Option<Arc<TxDesc>> {
        self.read_state().pool.get(txid).cloned()
    }

    pub fn tx_descs(&self) -> Vec<Arc<TxDesc>> {
        self.read_state().pool.values().cloned().collect()
    }

    /// Pool contents ordered for block assembly, best fee rate first.
    pub fn mining_descs(&self) -> Vec<Arc<TxDesc>> {
        let mut descs = self.tx_descs();
        descs.sort_by(|a, b| {
            b.fee_per_kb
                .cmp(&a.fee_per_kb)
                .then_with(|| a.added.cmp(&b.added))
                .then_with(|| a.txid.cmp(&b.txid))
        });
        descs
    }

    pub fn count(&self) -> usize {
        self.read_state().pool.len()
    }

    pub fn orphan_count(&self) -> usize {
        self.read_state().orphans.len()
    }

    /// Unix seconds of the last change to the pool.
    pub fn last_updated(&self) -> u64 {
        self.read_state().last_updated
    }

    /// Checks the outpoint and orphan indexes against the pools they index.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.read_state();
        for (outpoint, spender) in &state.outpoints {
            let desc = state.pool.get(spender).ok_or_else(|| {
                format!(
                    "outpoint {} indexed to missing transaction {}",
                    describe_outpoint(outpoint),
                    hash256_to_hex(spender)
                )
            })?;
            if !desc.tx.vin.iter().any(|input| input.prevout == *outpoint) {
                return Err(format!(
                    "transaction {} does not spend indexed outpoint {}",
                    hash256_to_hex(spender),
                    describe_outpoint(outpoint)
                ));
            }
        }
        for (txid, desc) in &state.pool {
            for input in &desc.tx.vin {
                if state.outpoints.get(&input.prevout) != Some(txid) {
                    return Err(format!(
                        "input {} of {} is not indexed to it",
                        describe_outpoint(&input.prevout),
                        hash256_to_hex(txid)
                    ));
                }
            }
        }
        for (parent, children) in &state.orphans_by_parent {
            for child in children {
                let orphan = state.orphans.get(child).ok_or_else(|| {
                    format!("orphan index references missing {}", hash256_to_hex(child))
                })?;
                if !orphan.missing_parents.contains(parent) {
                    return Err(format!(
                        "orphan {} indexed under unrelated parent {}",
                        hash256_to_hex(child),
                        hash256_to_hex(parent)
                    ));
                }
            }
        }
        Ok(())
    }

    /// Writes the pool to `path`; returns the number of transactions saved.
    pub fn save(&self, path: &Path) -> Result<usize, String> {
        let descs = self.tx_descs();
        let bytes = crate::mempool_file::save(path, &descs)?;
        self.cfg.metrics.note_persisted(bytes as u64);
        log_debug!(
            self.cfg.logger,
            "Saved {} mempool transaction(s) to {}",
            descs.len(),
            path.display()
        );
        Ok(descs.len())
    }

    /// Replays a saved pool through the admission pipeline; returns the
    /// number of transactions pooled.
    pub fn load(&self, path: &Path) -> Result<usize, String> {
        crate::mempool_file::load(self, path, now_secs())
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.cfg.logger
    }
}

/// Mempool operations the block manager relies on.
pub trait TxManager: Send + Sync {
    fn process_transaction(
        &self,
        tx: Arc<Transaction>,
        allow_orphans: bool,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<Vec<Arc<TxDesc>>, MempoolError>;

    fn remove_transaction(&self, tx: &Transaction, remove_redeemers: bool);

    fn remove_double_spends(&self, tx: &Transaction);

    fn remove_orphan(&self, txid: &Hash256);

    fn process_orphans(&self, txid: &Hash256) -> Vec<Arc<TxDesc>>;

    fn prune_expired_tx(&self) -> usize;

    fn have_transaction(&self, txid: &Hash256) -> bool;

    fn count(&self) -> usize;

    fn tx_descs(&self) -> Vec<Arc<TxDesc>>;
}

impl TxManager for TxPool {
    fn process_transaction(
        &self,
        tx: Arc<Transaction>,
        allow_orphans: bool,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<Vec<Arc<TxDesc>>, MempoolError> {
        TxPool::process_transaction(self, tx, allow_orphans, rate_limit, allow_high_fees)
    }

    fn remove_transaction(&self, tx: &Transaction, remove_redeemers: bool) {
        TxPool::remove_transaction(self, tx, remove_redeemers)
    }

    fn remove_double_spends(&self, tx: &Transaction) {
        TxPool::remove_double_spends(self, tx)
    }

    fn remove_orphan(&self, txid: &Hash256) {
        TxPool::remove_orphan(self, txid)
    }

    fn process_orphans(&self, txid: &Hash256) -> Vec<Arc<TxDesc>> {
        TxPool::process_orphans(self, txid)
    }

    fn prune_expired_tx(&self) -> usize {
        TxPool::prune_expired_tx(self)
    }

    fn have_transaction(&self, txid: &Hash256) -> bool {
        TxPool::have_transaction(self, txid)
    }

    fn count(&self) -> usize {
        TxPool::count(self)
    }

    fn tx_descs(&self) -> Vec<Arc<TxDesc>> {
        TxPool::tx_descs(self)
    }
}

fn overlay_pool_outputs(state: &PoolState, tx: &Transaction, view: &mut UtxoView) {
    for input in &tx.vin {
        if view.unspent(&input.prevout).is_some() {
            continue;
        }
        let Some(parent) = state.pool.get(&input.prevout.hash) else {
            continue;
        };
        let Some(output) = parent.tx.vout.get(input.prevout.index as usize) else {
            continue;
        };
        view.insert(
            input.prevout,
            UtxoEntry {
                amount: output.value,
                coin_id: output.coin_id,
                script_pubkey: output.script_pubkey.clone(),
                block_height: UNMINED_HEIGHT,
                is_coinbase: false,
                spent: false,
            },
        );
    }
}

fn is_expired(tx: &Transaction, next_height: u64) -> bool {
    tx.expire != 0 && next_height >= tx.expire
}

fn check_transaction_sanity(tx: &Transaction) -> Result<(), MempoolError> {
    if tx.vin.is_empty() && !tx.tx_type.is_token() {
        return Err(rule(MempoolErrorKind::Invalid, "transaction has no inputs"));
    }
    if tx.vout.is_empty() {
        return Err(rule(MempoolErrorKind::Invalid, "transaction has no outputs"));
    }
    let size = tx.serialized_size();
    if size > MAX_TX_SIZE {
        return Err(rule(
            MempoolErrorKind::Invalid,
            format!("serialized transaction is too big - got {size}, max {MAX_TX_SIZE}"),
        ));
    }
    output_totals(tx)?;

    let mut seen = HashSet::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if !seen.insert(input.prevout) {
            return Err(rule(
                MempoolErrorKind::Invalid,
                "transaction contains duplicate inputs",
            ));
        }
    }

    if tx.is_coinbase() {
        let len = tx.vin[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_LEN..=MAX_COINBASE_SCRIPT_LEN).contains(&len) {
            return Err(rule(
                MempoolErrorKind::Invalid,
                format!(
                    "coinbase transaction script length of {len} is out of range (min: {MIN_COINBASE_SCRIPT_LEN}, max: {MAX_COINBASE_SCRIPT_LEN})"
                ),
            ));
        }
    } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(rule(
            MempoolErrorKind::Invalid,
            "transaction input refers to previous output that is null",
        ));
    }
    Ok(())
}

fn output_totals(tx: &Transaction) -> Result<HashMap<CoinId, Amount>, MempoolError> {
    let mut totals: HashMap<CoinId, Amount> = HashMap::new();
    for output in &tx.vout {
        if !money_range(output.value) {
            return Err(rule(
                MempoolErrorKind::Invalid,
                format!(
                    "transaction output value of {} is out of range (max {MAX_MONEY})",
                    output.value
                ),
            ));
        }
        let total = totals.entry(output.coin_id).or_insert(0);
        *total = total
            .checked_add(output.value)
            .filter(|value| money_range(*value))
            .ok_or_else(|| {
                rule(
                    MempoolErrorKind::Invalid,
                    "total value of all transaction outputs is out of range",
                )
            })?;
    }
    Ok(totals)
}

fn is_finalized(tx: &Transaction, height: u64, median_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if tx.lock_time < LOCK_TIME_THRESHOLD {
        i64::try_from(height).unwrap_or(i64::MAX)
    } else {
        median_time
    };
    if i64::from(tx.lock_time) < threshold {
        return true;
    }
    tx.vin
        .iter()
        .all(|input| input.sequence == MAX_TX_IN_SEQUENCE_NUM)
}

fn check_standard(
    tx: &Transaction,
    policy: &MempoolPolicy,
    next_height: u64,
    median_time: i64,
) -> Result<(), MempoolError> {
    if tx.version < 1 || tx.version > policy.max_tx_version {
        return Err(rule(
            MempoolErrorKind::Obsolete,
            format!(
                "transaction version {} is not in the valid range of 1-{}",
                tx.version, policy.max_tx_version
            ),
        ));
    }

    if !is_finalized(tx, next_height, median_time) {
        return Err(rule(MempoolErrorKind::NonStandard, "transaction is not finalized"));
    }

    let size = tx.serialized_size();
    if size > MAX_STANDARD_TX_SIZE {
        return Err(rule(
            MempoolErrorKind::NonStandard,
            format!(
                "transaction size of {size} is larger than max allowed size of {MAX_STANDARD_TX_SIZE}"
            ),
        ));
    }

    for (index, input) in tx.vin.iter().enumerate() {
        let len = input.script_sig.len();
        if len > MAX_STANDARD_SIG_SCRIPT_SIZE {
            return Err(rule(
                MempoolErrorKind::NonStandard,
                format!(
                    "transaction input {index}: signature script size of {len} bytes is larger than max allowed size of {MAX_STANDARD_SIG_SCRIPT_SIZE} bytes"
                ),
            ));
        }
        if !is_push_only(&input.script_sig) {
            return Err(rule(
                MempoolErrorKind::NonStandard,
                format!("transaction input {index}: signature script is not push only"),
            ));
        }
    }

    let mut null_data_outputs = 0usize;
    for (index, output) in tx.vout.iter().enumerate() {
        match classify_script_pubkey(&output.script_pubkey) {
            ScriptClass::NullData => {
                null_data_outputs += 1;
                continue;
            }
            ScriptClass::NonStandard => {
                return Err(rule(
                    MempoolErrorKind::NonStandard,
                    format!("transaction output {index}: non-standard script form"),
                ));
            }
            _ => {}
        }
        if is_dust(output, policy.min_relay_fee_per_kb) {
            return Err(rule(
                MempoolErrorKind::Dust,
                format!("transaction output {index}: payment of {} is dust", output.value),
            ));
        }
    }

    if null_data_outputs > policy.max_null_data_outputs {
        return Err(rule(
            MempoolErrorKind::NonStandard,
            format!(
                "transaction has {null_data_outputs} null data outputs, at most {} allowed",
                policy.max_null_data_outputs
            ),
        ));
    }
    Ok(())
}

fn count_tx_sigops(tx: &Transaction, view: &UtxoView) -> u32 {
    let mut total = 0u32;
    for input in &tx.vin {
        total = total.saturating_add(count_sigops(&input.script_sig, false));
        if let Some(entry) = view.lookup(&input.prevout) {
            total = total.saturating_add(p2sh_sigops(&entry.script_pubkey, &input.script_sig));
        }
    }
    for output in &tx.vout {
        total = total.saturating_add(count_sigops(&output.script_pubkey, false));
    }
    total
}

/// Input value times confirmations, over the size excluding typical
/// signature bytes. Unmined inputs contribute nothing.
fn calc_priority(tx: &Transaction, view: &UtxoView, next_height: u64) -> f64 {
    let mut weighted = 0.0f64;
    for input in &tx.vin {
        let Some(entry) = view.lookup(&input.prevout) else {
            continue;
        };
        if entry.is_unmined() {
            continue;
        }
        let age = next_height.saturating_sub(entry.block_height);
        weighted += entry.amount as f64 * age as f64;
    }
    let size = calculate_modified_size(tx, tx.serialized_size());
    if size == 0 {
        return 0.0;
    }
    weighted / size as f64
}

fn calculate_modified_size(tx: &Transaction, tx_size: usize) -> usize {
    let mut size = tx_size;
    for input in &tx.vin {
        let offset = 41usize.saturating_add(110usize.min(input.script_sig.len()));
        if size > offset {
            size = size.saturating_sub(offset);
        }
    }
    size
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
