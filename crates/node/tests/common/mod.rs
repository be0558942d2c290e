#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use dagd::chain::{
    BehaviorFlags, BestSnapshot, BlockChain, ChainError, ChainRuleCode, SequenceLock,
    TxChainView, UtxoEntry, UtxoView,
};
use dagd::events::{EventFeed, Notification};
use dagd::mempool::{MempoolConfig, MempoolPolicy, TxDesc, TxPool};
use dagd::peers::{InvVect, PeerId, PeerNotifier, Relay};
use dagd::reject::RejectCode;
use dagd_consensus::{Amount, CoinId, Hash256, COIN, MEER_COIN};
use dagd_log::Logger;
use dagd_primitives::block::{Block, BlockHeader, CURRENT_VERSION};
use dagd_primitives::outpoint::OutPoint;
use dagd_primitives::transaction::{Transaction, TxIn, TxOut, TxType};

pub const GENESIS: Hash256 = [0x11; 32];

pub fn p2pkh_script(tag: u8) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

pub fn make_tx(vin: Vec<TxIn>, vout: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::Regular,
        vin,
        vout,
        lock_time: 0,
        expire: 0,
    }
}

pub fn input(prevout: OutPoint) -> TxIn {
    TxIn {
        prevout,
        script_sig: vec![0x01, 0x01],
        sequence: u32::MAX,
    }
}

pub fn output(value: Amount) -> TxOut {
    TxOut {
        value,
        coin_id: MEER_COIN,
        script_pubkey: p2pkh_script(0x22),
    }
}

/// Spends `prevouts` into one p2pkh output per value.
pub fn spend(prevouts: &[OutPoint], values: &[Amount]) -> Transaction {
    make_tx(
        prevouts.iter().copied().map(input).collect(),
        values.iter().copied().map(output).collect(),
    )
}

/// A one-in one-out spend serializing to exactly 250 bytes.
pub fn spend_250_bytes(prevout: OutPoint, value: Amount) -> Transaction {
    let mut script_sig = Vec::with_capacity(153);
    script_sig.push(0x4b);
    script_sig.extend_from_slice(&[0xaa; 75]);
    script_sig.push(0x4b);
    script_sig.extend_from_slice(&[0xbb; 75]);
    script_sig.push(0x51);
    let tx = make_tx(
        vec![TxIn {
            prevout,
            script_sig,
            sequence: u32::MAX,
        }],
        vec![output(value)],
    );
    assert_eq!(tx.serialized_size(), 250);
    tx
}

pub fn coinbase(tag: u8) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::Coinbase,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: vec![0x02, tag, 0x00],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 0,
            coin_id: MEER_COIN,
            script_pubkey: p2pkh_script(tag),
        }],
        lock_time: 0,
        expire: 0,
    }
}

pub fn make_block(parents: Vec<Hash256>, nonce: u64, txs: Vec<Transaction>) -> Block {
    let mut transactions = vec![Arc::new(coinbase(nonce as u8))];
    transactions.extend(txs.into_iter().map(Arc::new));
    Block {
        header: BlockHeader {
            version: CURRENT_VERSION,
            parents,
            tx_root: [0u8; 32],
            state_root: [0u8; 32],
            bits: 0x207f_ffff,
            timestamp: 1_700_000_000 + nonce,
            nonce,
        },
        transactions,
    }
}

struct ChainInner {
    best: BestSnapshot,
    utxos: HashMap<OutPoint, UtxoEntry>,
    blocks: HashSet<Hash256>,
    current: bool,
    fail_next: Option<ChainError>,
    bad_scripts: HashSet<Hash256>,
    token_owners: HashMap<CoinId, Vec<u8>>,
}

/// In-memory chain: a linear sequence of blocks with a flat UTXO set.
pub struct MemoryChain {
    inner: Mutex<ChainInner>,
    feed: Arc<EventFeed>,
}

impl MemoryChain {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ChainInner {
                best: BestSnapshot {
                    hash: GENESIS,
                    height,
                    order: height,
                    median_time: 1_700_000_000,
                    tips: vec![GENESIS],
                    total_txns: 0,
                },
                utxos: HashMap::new(),
                blocks: HashSet::from([GENESIS]),
                current: true,
                fail_next: None,
                bad_scripts: HashSet::new(),
                token_owners: HashMap::new(),
            }),
            feed: Arc::new(EventFeed::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChainInner> {
        self.inner.lock().expect("chain lock")
    }

    pub fn feed(&self) -> Arc<EventFeed> {
        Arc::clone(&self.feed)
    }

    pub fn snapshot(&self) -> BestSnapshot {
        self.lock().best.clone()
    }

    pub fn set_height(&self, height: u64) {
        self.lock().best.height = height;
    }

    pub fn set_current(&self, current: bool) {
        self.lock().current = current;
    }

    pub fn fail_next_block(&self, err: ChainError) {
        self.lock().fail_next = Some(err);
    }

    pub fn reject_scripts_of(&self, txid: Hash256) {
        self.lock().bad_scripts.insert(txid);
    }

    pub fn set_token_owner(&self, coin_id: CoinId, script: Vec<u8>) {
        self.lock().token_owners.insert(coin_id, script);
    }

    /// Adds a confirmed p2pkh output of `amount` mined at `height`.
    pub fn fund(&self, tag: u8, amount: Amount, height: u64) -> OutPoint {
        let outpoint = OutPoint::new([tag; 32], 0);
        self.lock().utxos.insert(
            outpoint,
            UtxoEntry {
                amount,
                coin_id: MEER_COIN,
                script_pubkey: p2pkh_script(tag),
                block_height: height,
                is_coinbase: false,
                spent: false,
            },
        );
        outpoint
    }

    pub fn fund_coin(&self, tag: u8, height: u64) -> OutPoint {
        self.fund(tag, COIN, height)
    }

    pub fn has_utxo(&self, outpoint: &OutPoint) -> bool {
        self.lock().utxos.contains_key(outpoint)
    }

    pub fn publish(&self, notification: Notification) {
        self.feed.publish(notification);
    }
}

impl TxChainView for MemoryChain {
    fn best_snapshot(&self) -> BestSnapshot {
        self.snapshot()
    }

    fn fetch_utxo_view(&self, tx: &Transaction) -> Result<UtxoView, ChainError> {
        let inner = self.lock();
        let mut view = UtxoView::new();
        for txin in &tx.vin {
            if let Some(entry) = inner.utxos.get(&txin.prevout) {
                view.insert(txin.prevout, entry.clone());
            }
        }
        let txid = tx.txid();
        for index in 0..tx.vout.len() {
            let outpoint = OutPoint::new(txid, index as u32);
            if let Some(entry) = inner.utxos.get(&outpoint) {
                view.insert(outpoint, entry.clone());
            }
        }
        Ok(view)
    }

    fn calc_sequence_lock(
        &self,
        _tx: &Transaction,
        _view: &UtxoView,
    ) -> Result<SequenceLock, ChainError> {
        Ok(SequenceLock::disabled())
    }

    fn verify_scripts(&self, tx: &Transaction, _view: &UtxoView) -> Result<(), ChainError> {
        if self.lock().bad_scripts.contains(&tx.txid()) {
            return Err(ChainError::rule(
                ChainRuleCode::BadScript,
                "signature verification failed",
            ));
        }
        Ok(())
    }

    fn is_tx_type_valid(&self, _tx_type: TxType, _next_height: u64) -> bool {
        true
    }

    fn token_owner_script(&self, coin_id: CoinId) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.lock().token_owners.get(&coin_id).cloned())
    }
}

impl BlockChain for MemoryChain {
    fn process_block(&self, block: Arc<Block>, flags: BehaviorFlags) -> Result<bool, ChainError> {
        let hash = block.hash();
        {
            let mut inner = self.lock();
            if let Some(err) = inner.fail_next.take() {
                return Err(err);
            }
            if inner.blocks.contains(&hash) {
                return Err(ChainError::rule(
                    ChainRuleCode::Duplicate,
                    "already have block",
                ));
            }
            if !block
                .header
                .parents
                .iter()
                .all(|parent| inner.blocks.contains(parent))
            {
                return Ok(true);
            }

            let height = inner.best.height + 1;
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for txin in &tx.vin {
                        inner.utxos.remove(&txin.prevout);
                    }
                }
                let txid = tx.txid();
                let is_coinbase = tx.is_coinbase();
                for (index, txout) in tx.vout.iter().enumerate() {
                    inner.utxos.insert(
                        OutPoint::new(txid, index as u32),
                        UtxoEntry {
                            amount: txout.value,
                            coin_id: txout.coin_id,
                            script_pubkey: txout.script_pubkey.clone(),
                            block_height: height,
                            is_coinbase,
                            spent: false,
                        },
                    );
                }
            }
            let parents = block.header.parents.clone();
            inner.best.tips.retain(|tip| !parents.contains(tip));
            inner.best.tips.push(hash);
            inner.best.hash = hash;
            inner.best.height = height;
            inner.best.order += 1;
            inner.best.total_txns += block.transactions.len() as u64;
            inner.blocks.insert(hash);
        }

        self.feed.publish(Notification::BlockAccepted {
            block: Arc::clone(&block),
            flags,
        });
        self.feed.publish(Notification::BlockConnected(block));
        Ok(false)
    }

    fn best_snapshot(&self) -> BestSnapshot {
        self.snapshot()
    }

    fn tip_generation(&self) -> Vec<Hash256> {
        self.lock().best.tips.clone()
    }

    fn is_current(&self) -> bool {
        self.lock().current
    }

    fn have_block(&self, hash: &Hash256) -> bool {
        self.lock().blocks.contains(hash)
    }
}

/// Records every request the block manager makes of the peer layer.
#[derive(Default)]
pub struct RecordingPeers {
    sent: Mutex<Vec<Relay>>,
}

impl RecordingPeers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, relay: Relay) {
        self.sent.lock().expect("peers lock").push(relay);
    }

    pub fn sent(&self) -> Vec<Relay> {
        self.sent.lock().expect("peers lock").clone()
    }

    pub fn rejects(&self) -> Vec<(PeerId, RejectCode, Hash256)> {
        self.sent()
            .into_iter()
            .filter_map(|relay| match relay {
                Relay::Reject {
                    peer, code, hash, ..
                } => Some((peer, code, hash)),
                _ => None,
            })
            .collect()
    }

    pub fn announced(&self) -> Vec<Hash256> {
        self.sent()
            .into_iter()
            .filter_map(|relay| match relay {
                Relay::Transactions(txids) => Some(txids),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl PeerNotifier for RecordingPeers {
    fn announce_new_transactions(&self, txs: &[Arc<TxDesc>]) {
        if !txs.is_empty() {
            self.record(Relay::Transactions(txs.iter().map(|desc| desc.txid).collect()));
        }
    }

    fn relay_block(&self, hash: Hash256, header: &BlockHeader) {
        self.record(Relay::Block {
            hash,
            header: header.clone(),
        });
    }

    fn transaction_confirmed(&self, tx: &Transaction) {
        self.record(Relay::Confirmed(tx.txid()));
    }

    fn rebroadcast_mempool(&self) {
        self.record(Relay::RebroadcastMempool);
    }

    fn push_get_data(&self, peer: PeerId, invs: Vec<InvVect>) {
        self.record(Relay::GetData { peer, invs });
    }

    fn push_get_headers(&self, peer: PeerId, locator: Vec<Hash256>, stop: Hash256) {
        self.record(Relay::GetHeaders {
            peer,
            locator,
            stop,
        });
    }

    fn push_get_blocks(&self, peer: PeerId, locator: Vec<Hash256>, stop: Hash256) {
        self.record(Relay::GetBlocks {
            peer,
            locator,
            stop,
        });
    }

    fn push_reject(&self, peer: PeerId, code: RejectCode, reason: String, hash: Hash256) {
        self.record(Relay::Reject {
            peer,
            code,
            reason,
            hash,
        });
    }

    fn disconnect(&self, peer: PeerId, reason: &str) {
        self.record(Relay::Disconnect {
            peer,
            reason: reason.to_string(),
        });
    }

    fn sync_peer_stalled(&self, peer: PeerId) {
        self.record(Relay::SyncStalled(peer));
    }
}

pub fn make_pool(chain: &Arc<MemoryChain>, policy: MempoolPolicy) -> TxPool {
    make_pool_with_logger(chain, policy, Logger::discard())
}

pub fn make_pool_with_logger(
    chain: &Arc<MemoryChain>,
    policy: MempoolPolicy,
    logger: Logger,
) -> TxPool {
    let view: Arc<dyn TxChainView> = chain.clone();
    TxPool::new(MempoolConfig::new(policy, view, logger))
}
