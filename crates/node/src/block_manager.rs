//! The block manager: the single worker through which blocks and
//! transactions reach the chain and the mempool.
//!
//! Callers talk to it through a [`BlockManagerHandle`]. Every request is a
//! message on a bounded mailbox; synchronous requests carry a one-shot reply
//! channel and block until the worker answers. Chain notifications, a stall
//! timer and the quit signal are multiplexed into the same loop.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use dagd_consensus::{ChainParams, Hash256, Network};
use dagd_log::{log_debug, log_error, log_info, log_warn, Logger};
use dagd_primitives::block::{Block, BlockHeader};
use dagd_primitives::transaction::Transaction;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};

use crate::chain::{BehaviorFlags, BlockChain, ChainError};
use crate::chain_state::ChainStateCache;
use crate::events::{ChainObserver, Event, Notification};
use crate::header_sync::{HeaderSync, SyncAction, SyncMode};
use crate::mempool::{MempoolError, TxDesc, TxManager};
use crate::peers::{InvType, InvVect, PeerId, PeerInfo, PeerNotifier};
use crate::progress::BlockProgressLogger;
use crate::reject::{extract_reject_code, RejectCode};
use crate::stats::hash256_to_hex;
use crate::template::{BlockTemplate, TemplateCache};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockManagerConfig {
    pub disable_checkpoints: bool,
    pub mailbox_capacity: usize,
    pub stall_sample_interval: Duration,
    /// The sync peer is reported as stalled after this long without progress.
    pub max_stall_duration: Duration,
    /// Header-list blocks are re-requested once fewer than this are in flight.
    pub min_in_flight_blocks: usize,
    pub max_rejected_txns: usize,
    pub max_requested_blocks: usize,
}

impl Default for BlockManagerConfig {
    fn default() -> Self {
        Self {
            disable_checkpoints: false,
            mailbox_capacity: 50,
            stall_sample_interval: Duration::from_secs(30),
            max_stall_duration: Duration::from_secs(3 * 60),
            min_in_flight_blocks: 10,
            max_rejected_txns: 1000,
            max_requested_blocks: 500,
        }
    }
}

/// A consensus or policy rule violation raised by the block manager itself.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleReject {
    pub code: RejectCode,
    pub reason: String,
}

impl fmt::Display for RuleReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for RuleReject {}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockManagerError {
    Rule(RuleReject),
    Chain(ChainError),
    Mempool(MempoolError),
    /// The worker has stopped and can no longer answer.
    Shutdown,
}

impl BlockManagerError {
    pub fn is_rule_violation(&self) -> bool {
        match self {
            BlockManagerError::Rule(_) => true,
            BlockManagerError::Chain(err) => err.is_rule(),
            BlockManagerError::Mempool(err) => err.is_rule_violation(),
            BlockManagerError::Shutdown => false,
        }
    }
}

impl fmt::Display for BlockManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockManagerError::Rule(err) => write!(f, "{err}"),
            BlockManagerError::Chain(err) => write!(f, "{err}"),
            BlockManagerError::Mempool(err) => write!(f, "{err}"),
            BlockManagerError::Shutdown => write!(f, "block manager is shut down"),
        }
    }
}

impl std::error::Error for BlockManagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlockManagerError::Rule(err) => Some(err),
            BlockManagerError::Chain(err) => Some(err),
            BlockManagerError::Mempool(err) => Some(err),
            BlockManagerError::Shutdown => None,
        }
    }
}

/// Collaborators injected into the block manager.
pub struct BlockManagerContext {
    pub params: ChainParams,
    pub chain: Arc<dyn BlockChain>,
    pub tx_manager: Arc<dyn TxManager>,
    pub peers: Arc<dyn PeerNotifier>,
    /// Subscription to the chain's event feed.
    pub notifications: Receiver<Event>,
    pub observer: Option<Arc<dyn ChainObserver>>,
    pub chain_state: Arc<ChainStateCache>,
    pub logger: Logger,
}

type Reply<T> = Sender<T>;

enum Request {
    ProcessBlock {
        block: Arc<Block>,
        flags: BehaviorFlags,
        check_tips: bool,
        reply: Reply<Result<bool, BlockManagerError>>,
    },
    ProcessTransaction {
        tx: Arc<Transaction>,
        allow_orphans: bool,
        rate_limit: bool,
        allow_high_fees: bool,
        reply: Reply<Result<Vec<Arc<TxDesc>>, BlockManagerError>>,
    },
    CurrentTemplate(Reply<Option<BlockTemplate>>),
    SetCurrentTemplate(Option<BlockTemplate>, Reply<()>),
    ParentTemplate(Reply<Option<BlockTemplate>>),
    SetParentTemplate(Option<BlockTemplate>, Reply<()>),
    TipGeneration(Reply<Vec<Hash256>>),
    IsCurrent(Reply<bool>),
    SyncPeer(Reply<Option<PeerId>>),
    NewPeer(PeerInfo),
    DonePeer(PeerId),
    Block {
        peer: PeerId,
        block: Arc<Block>,
    },
    Tx {
        peer: PeerId,
        tx: Arc<Transaction>,
    },
    Headers {
        peer: PeerId,
        headers: Vec<BlockHeader>,
    },
    Inv {
        peer: PeerId,
        invs: Vec<InvVect>,
    },
}

/// Cloneable entry point to the block manager worker.
#[derive(Clone)]
pub struct BlockManagerHandle {
    mailbox: Sender<Request>,
}

impl BlockManagerHandle {
    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, BlockManagerError> {
        let (reply, response) = bounded(1);
        self.mailbox
            .send(make(reply))
            .map_err(|_| BlockManagerError::Shutdown)?;
        response.recv().map_err(|_| BlockManagerError::Shutdown)
    }

    fn post(&self, request: Request) {
        let _ = self.mailbox.send(request);
    }

    /// Submits a block; returns whether it was held as an orphan. With
    /// `check_tips` a block whose parents are not all current tips is
    /// rejected before the chain sees it.
    pub fn process_block(
        &self,
        block: Arc<Block>,
        flags: BehaviorFlags,
        check_tips: bool,
    ) -> Result<bool, BlockManagerError> {
        self.call(|reply| Request::ProcessBlock {
            block,
            flags,
            check_tips,
            reply,
        })?
    }

    pub fn process_transaction(
        &self,
        tx: Arc<Transaction>,
        allow_orphans: bool,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<Vec<Arc<TxDesc>>, BlockManagerError> {
        self.call(|reply| Request::ProcessTransaction {
            tx,
            allow_orphans,
            rate_limit,
            allow_high_fees,
            reply,
        })?
    }

    pub fn current_template(&self) -> Result<Option<BlockTemplate>, BlockManagerError> {
        self.call(Request::CurrentTemplate)
    }

    pub fn set_current_template(
        &self,
        template: Option<BlockTemplate>,
    ) -> Result<(), BlockManagerError> {
        self.call(|reply| Request::SetCurrentTemplate(template, reply))
    }

    pub fn parent_template(&self) -> Result<Option<BlockTemplate>, BlockManagerError> {
        self.call(Request::ParentTemplate)
    }

    pub fn set_parent_template(
        &self,
        template: Option<BlockTemplate>,
    ) -> Result<(), BlockManagerError> {
        self.call(|reply| Request::SetParentTemplate(template, reply))
    }

    pub fn tip_generation(&self) -> Result<Vec<Hash256>, BlockManagerError> {
        self.call(Request::TipGeneration)
    }

    pub fn is_current(&self) -> Result<bool, BlockManagerError> {
        self.call(Request::IsCurrent)
    }

    pub fn sync_peer(&self) -> Result<Option<PeerId>, BlockManagerError> {
        self.call(Request::SyncPeer)
    }

    pub fn new_peer(&self, peer: PeerInfo) {
        self.post(Request::NewPeer(peer));
    }

    pub fn done_peer(&self, peer: PeerId) {
        self.post(Request::DonePeer(peer));
    }

    pub fn queue_block(&self, peer: PeerId, block: Arc<Block>) {
        self.post(Request::Block { peer, block });
    }

    pub fn queue_tx(&self, peer: PeerId, tx: Arc<Transaction>) {
        self.post(Request::Tx { peer, tx });
    }

    pub fn queue_headers(&self, peer: PeerId, headers: Vec<BlockHeader>) {
        self.post(Request::Headers { peer, headers });
    }

    pub fn queue_inv(&self, peer: PeerId, invs: Vec<InvVect>) {
        self.post(Request::Inv { peer, invs });
    }
}

/// Owns the worker thread. Dropping it stops the worker.
pub struct BlockManager {
    handle: BlockManagerHandle,
    quit: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl BlockManager {
    pub fn start(config: BlockManagerConfig, ctx: BlockManagerContext) -> Result<Self, String> {
        let (mailbox_tx, mailbox_rx) = bounded(config.mailbox_capacity.max(1));
        let (quit_tx, quit_rx) = bounded(1);
        let worker = Worker::new(config, ctx);
        let join = thread::Builder::new()
            .name("block-manager".to_string())
            .spawn(move || worker.run(mailbox_rx, quit_rx))
            .map_err(|err| format!("failed to spawn block manager: {err}"))?;
        Ok(Self {
            handle: BlockManagerHandle {
                mailbox: mailbox_tx,
            },
            quit: quit_tx,
            worker: Some(join),
        })
    }

    pub fn handle(&self) -> BlockManagerHandle {
        self.handle.clone()
    }

    /// Signals the worker to exit and waits for it.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.quit.send(());
        let _ = worker.join();
    }
}

impl Drop for BlockManager {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    config: BlockManagerConfig,
    params: ChainParams,
    chain: Arc<dyn BlockChain>,
    tx_manager: Arc<dyn TxManager>,
    peers: Arc<dyn PeerNotifier>,
    notifications: Receiver<Event>,
    observer: Option<Arc<dyn ChainObserver>>,
    chain_state: Arc<ChainStateCache>,
    logger: Logger,
    progress: BlockProgressLogger,
    templates: TemplateCache,
    header_sync: HeaderSync,
    peer_info: HashMap<PeerId, PeerInfo>,
    sync_peer: Option<PeerId>,
    rejected_txns: HashSet<Hash256>,
    requested_txns: HashSet<Hash256>,
    requested_blocks: HashSet<Hash256>,
    last_progress: Instant,
}

impl Worker {
    fn new(config: BlockManagerConfig, ctx: BlockManagerContext) -> Self {
        let checkpoints = if config.disable_checkpoints {
            Vec::new()
        } else {
            ctx.params.checkpoints.clone()
        };
        let header_sync = HeaderSync::new(
            checkpoints,
            config.min_in_flight_blocks,
            config.max_requested_blocks,
        );
        Self {
            progress: BlockProgressLogger::new("Processed", ctx.logger.clone()),
            header_sync,
            config,
            params: ctx.params,
            chain: ctx.chain,
            tx_manager: ctx.tx_manager,
            peers: ctx.peers,
            notifications: ctx.notifications,
            observer: ctx.observer,
            chain_state: ctx.chain_state,
            logger: ctx.logger,
            templates: TemplateCache::default(),
            peer_info: HashMap::new(),
            sync_peer: None,
            rejected_txns: HashSet::new(),
            requested_txns: HashSet::new(),
            requested_blocks: HashSet::new(),
            last_progress: Instant::now(),
        }
    }

    fn run(mut self, mailbox: Receiver<Request>, quit: Receiver<()>) {
        let ticker = tick(self.config.stall_sample_interval);
        let mut feed_open = true;
        log_debug!(self.logger, "Block manager started");
        loop {
            let notifications = if feed_open {
                self.notifications.clone()
            } else {
                never()
            };
            select! {
                recv(mailbox) -> request => match request {
                    Ok(request) => {
                        self.drain_notifications();
                        self.handle_request(request);
                    }
                    Err(_) => break,
                },
                recv(notifications) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => feed_open = false,
                },
                recv(ticker) -> _ => self.check_stall(),
                recv(quit) -> _ => break,
            }
        }
        log_debug!(self.logger, "Block manager stopped");
    }

    fn drain_notifications(&mut self) {
        while let Ok(event) = self.notifications.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::ProcessBlock {
                block,
                flags,
                check_tips,
                reply,
            } => {
                let result = self.process_block(block, flags, check_tips);
                let _ = reply.send(result);
            }
            Request::ProcessTransaction {
                tx,
                allow_orphans,
                rate_limit,
                allow_high_fees,
                reply,
            } => {
                let result = self.process_transaction(tx, allow_orphans, rate_limit, allow_high_fees);
                let _ = reply.send(result);
            }
            Request::CurrentTemplate(reply) => {
                let _ = reply.send(self.templates.current());
            }
            Request::SetCurrentTemplate(template, reply) => {
                self.templates.set_current(template);
                let _ = reply.send(());
            }
            Request::ParentTemplate(reply) => {
                let _ = reply.send(self.templates.parent());
            }
            Request::SetParentTemplate(template, reply) => {
                self.templates.set_parent(template);
                let _ = reply.send(());
            }
            Request::TipGeneration(reply) => {
                let _ = reply.send(self.chain.tip_generation());
            }
            Request::IsCurrent(reply) => {
                let _ = reply.send(self.is_current());
            }
            Request::SyncPeer(reply) => {
                let _ = reply.send(self.sync_peer);
            }
            Request::NewPeer(peer) => self.handle_new_peer(peer),
            Request::DonePeer(peer) => self.handle_done_peer(peer),
            Request::Block { peer, block } => self.handle_block(peer, block),
            Request::Tx { peer, tx } => self.handle_tx(peer, tx),
            Request::Headers { peer, headers } => self.handle_headers(peer, headers),
            Request::Inv { peer, invs } => self.handle_inv(peer, invs),
        }
    }

    fn process_block(
        &mut self,
        block: Arc<Block>,
        flags: BehaviorFlags,
        check_tips: bool,
    ) -> Result<bool, BlockManagerError> {
        let hash = block.hash();
        if check_tips {
            let tips = self.chain.tip_generation();
            if !block.header.parents.iter().all(|parent| tips.contains(parent)) {
                let reject = RuleReject {
                    code: RejectCode::Obsolete,
                    reason: format!(
                        "block {} does not build on the current tips",
                        hash256_to_hex(&hash)
                    ),
                };
                log_info!(self.logger, "Rejected block {}: {}", hash256_to_hex(&hash), reject);
                return Err(BlockManagerError::Rule(reject));
            }
        }

        let result = self.chain.process_block(block, flags);
        self.drain_notifications();
        match result {
            Ok(is_orphan) => {
                if !is_orphan {
                    self.tx_manager.prune_expired_tx();
                    self.peers.rebroadcast_mempool();
                    // Rejections can depend on the tip.
                    self.rejected_txns.clear();
                }
                self.chain_state.update(self.chain.best_snapshot());
                self.last_progress = Instant::now();
                Ok(is_orphan)
            }
            Err(err) => {
                if err.is_rule() {
                    log_info!(self.logger, "Rejected block {}: {}", hash256_to_hex(&hash), err);
                } else {
                    log_error!(
                        self.logger,
                        "Failed to process block {}: {}",
                        hash256_to_hex(&hash),
                        err
                    );
                }
                Err(BlockManagerError::Chain(err))
            }
        }
    }

    fn process_transaction(
        &mut self,
        tx: Arc<Transaction>,
        allow_orphans: bool,
        rate_limit: bool,
        allow_high_fees: bool,
    ) -> Result<Vec<Arc<TxDesc>>, BlockManagerError> {
        let txid = tx.txid();
        match self
            .tx_manager
            .process_transaction(tx, allow_orphans, rate_limit, allow_high_fees)
        {
            Ok(accepted) => {
                self.peers.announce_new_transactions(&accepted);
                Ok(accepted)
            }
            Err(err) => {
                if err.is_rule_violation() {
                    log_debug!(
                        self.logger,
                        "Rejected transaction {}: {}",
                        hash256_to_hex(&txid),
                        err
                    );
                } else {
                    log_error!(
                        self.logger,
                        "Failed to process transaction {}: {}",
                        hash256_to_hex(&txid),
                        err
                    );
                }
                Err(BlockManagerError::Mempool(err))
            }
        }
    }

    fn handle_tx(&mut self, peer: PeerId, tx: Arc<Transaction>) {
        let txid = tx.txid();
        self.requested_txns.remove(&txid);
        if self.rejected_txns.contains(&txid) {
            log_debug!(
                self.logger,
                "Ignoring unsolicited previously rejected transaction {} from peer {}",
                hash256_to_hex(&txid),
                peer
            );
            return;
        }
        if let Err(err) = self.process_transaction(tx, true, true, true) {
            self.remember_rejected(txid);
            let (code, reason) = extract_reject_code(&err);
            self.peers.push_reject(peer, code, reason, txid);
        }
    }

    fn remember_rejected(&mut self, txid: Hash256) {
        let limit = self.config.max_rejected_txns;
        if limit == 0 {
            return;
        }
        if self.rejected_txns.len() >= limit {
            let victim = self
                .rejected_txns
                .iter()
                .choose(&mut rand::thread_rng())
                .copied();
            if let Some(victim) = victim {
                self.rejected_txns.remove(&victim);
            }
        }
        self.rejected_txns.insert(txid);
    }

    fn handle_block(&mut self, peer: PeerId, block: Arc<Block>) {
        let hash = block.hash();
        self.requested_blocks.remove(&hash);
        let arrival = self.header_sync.on_block_received(&hash);
        let flags = if arrival.fast_add {
            BehaviorFlags::fast_add()
        } else {
            BehaviorFlags::default()
        };

        let parents = block.header.parents.clone();
        match self.process_block(block, flags, false) {
            Ok(true) => {
                let missing: Vec<InvVect> = parents
                    .iter()
                    .filter(|parent| !self.chain.have_block(parent))
                    .filter(|parent| self.requested_blocks.insert(**parent))
                    .map(|parent| InvVect::block(*parent))
                    .collect();
                if !missing.is_empty() {
                    self.peers.push_get_data(peer, missing);
                }
            }
            Ok(false) => {}
            Err(err) => {
                let (code, reason) = extract_reject_code(&err);
                self.peers.push_reject(peer, code, reason, hash);
                return;
            }
        }

        let chain = &self.chain;
        if let Some(action) =
            self.header_sync
                .after_block_processed(&hash, arrival, |hash| chain.have_block(hash))
        {
            self.execute(peer, action);
        }
    }

    fn handle_headers(&mut self, peer: PeerId, headers: Vec<BlockHeader>) {
        if self.sync_peer != Some(peer) {
            log_debug!(
                self.logger,
                "Ignoring {} header(s) from non-sync peer {}",
                headers.len(),
                peer
            );
            return;
        }
        self.last_progress = Instant::now();
        let chain = &self.chain;
        if let Some(action) = self
            .header_sync
            .on_headers(&headers, |hash| chain.have_block(hash))
        {
            self.execute(peer, action);
        }
    }

    fn handle_inv(&mut self, peer: PeerId, invs: Vec<InvVect>) {
        let headers_first = self.header_sync.mode() == SyncMode::HeadersFirst;
        let mut wanted = Vec::new();
        for inv in invs {
            match inv.kind {
                InvType::Block => {
                    if headers_first
                        || self.chain.have_block(&inv.hash)
                        || !self.requested_blocks.insert(inv.hash)
                    {
                        continue;
                    }
                }
                InvType::Tx => {
                    if self.rejected_txns.contains(&inv.hash)
                        || self.tx_manager.have_transaction(&inv.hash)
                        || !self.requested_txns.insert(inv.hash)
                    {
                        continue;
                    }
                }
            }
            wanted.push(inv);
        }
        if !wanted.is_empty() {
            self.peers.push_get_data(peer, wanted);
        }
    }

    fn handle_new_peer(&mut self, peer: PeerInfo) {
        log_debug!(
            self.logger,
            "New peer {} ({}) at height {}",
            peer.id,
            peer.addr,
            peer.last_height
        );
        self.peer_info.insert(peer.id, peer);
        if self.sync_peer.is_none() {
            self.start_sync();
        }
    }

    fn handle_done_peer(&mut self, peer: PeerId) {
        if self.peer_info.remove(&peer).is_none() {
            return;
        }
        if self.sync_peer == Some(peer) {
            log_info!(self.logger, "Lost sync peer {}", peer);
            self.sync_peer = None;
            for hash in self.header_sync.requested() {
                self.requested_blocks.remove(hash);
            }
            self.header_sync.reset();
            self.start_sync();
        }
    }

    fn start_sync(&mut self) {
        let best = self.chain.best_snapshot();
        let candidate = self
            .peer_info
            .values()
            .filter(|peer| peer.full_node && peer.last_height > best.height)
            .max_by(|a, b| a.last_height.cmp(&b.last_height).then(b.id.cmp(&a.id)))
            .map(|peer| (peer.id, peer.last_height));
        let Some((peer, height)) = candidate else {
            log_debug!(self.logger, "No sync peer candidates available");
            return;
        };

        let headers_first =
            !self.config.disable_checkpoints && self.params.network != Network::Regtest;
        let locator = if best.tips.is_empty() {
            vec![best.hash]
        } else {
            best.tips.clone()
        };
        let action = self
            .header_sync
            .start(best.height, best.hash, locator, headers_first);
        log_info!(
            self.logger,
            "Syncing to block height {} from peer {}{}",
            height,
            peer,
            if self.header_sync.mode() == SyncMode::HeadersFirst {
                " (headers first)"
            } else {
                ""
            }
        );
        self.sync_peer = Some(peer);
        self.last_progress = Instant::now();
        self.execute(peer, action);
    }

    fn execute(&mut self, peer: PeerId, action: SyncAction) {
        match action {
            SyncAction::GetHeaders { locator, stop } => {
                self.peers.push_get_headers(peer, locator, stop);
            }
            SyncAction::GetBlocks { locator, stop } => {
                self.peers.push_get_blocks(peer, locator, stop);
            }
            SyncAction::GetData(hashes) => {
                self.requested_blocks.extend(hashes.iter().copied());
                let invs = hashes.into_iter().map(InvVect::block).collect();
                self.peers.push_get_data(peer, invs);
            }
            SyncAction::Disconnect(reason) => {
                log_warn!(self.logger, "Disconnecting peer {}: {}", peer, reason);
                self.peers.disconnect(peer, &reason);
            }
        }
    }

    /// Caught up with both the chain's view and the sync peer's height.
    fn is_current(&self) -> bool {
        if !self.chain.is_current() {
            return false;
        }
        let Some(peer) = self.sync_peer.and_then(|id| self.peer_info.get(&id)) else {
            return true;
        };
        self.chain.best_snapshot().height >= peer.last_height
    }

    fn check_stall(&mut self) {
        let Some(peer) = self.sync_peer else {
            return;
        };
        let idle = self.last_progress.elapsed();
        if idle < self.config.max_stall_duration {
            return;
        }
        log_warn!(
            self.logger,
            "Sync peer {} made no progress for {}s",
            peer,
            idle.as_secs()
        );
        self.peers.sync_peer_stalled(peer);
        self.last_progress = Instant::now();
    }

    fn handle_event(&mut self, event: Event) {
        self.handle_notification(&event.notification);
        event.acknowledge();
    }

    fn handle_notification(&mut self, notification: &Notification) {
        match notification {
            Notification::BlockAccepted { block, flags } => {
                let best = self.chain.best_snapshot();
                self.progress.log_block_order(block, &best);
                if !flags.fast_add && self.is_current() {
                    self.peers.relay_block(block.hash(), &block.header);
                }
            }
            Notification::BlockConnected(block) => {
                for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                    let txid = tx.txid();
                    self.tx_manager.remove_transaction(tx, false);
                    self.tx_manager.remove_double_spends(tx);
                    self.tx_manager.remove_orphan(&txid);
                    self.peers.transaction_confirmed(tx);
                    let accepted = self.tx_manager.process_orphans(&txid);
                    if !accepted.is_empty() {
                        self.peers.announce_new_transactions(&accepted);
                    }
                }
            }
            Notification::BlockDisconnected(_) => {}
            Notification::Reorganization { .. } => {
                self.templates.clear();
            }
        }
        if let Some(observer) = &self.observer {
            observer.on_notification(notification);
        }
    }
}
