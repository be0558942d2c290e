mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dagd::block_manager::{BlockManager, BlockManagerConfig, BlockManagerContext, BlockManagerError};
use dagd::chain::{BehaviorFlags, BlockChain, ChainError, ChainRuleCode};
use dagd::chain_state::ChainStateCache;
use dagd::events::Notification;
use dagd::mempool::{MempoolPolicy, TxManager, TxPool};
use dagd::peers::{InvVect, PeerInfo, Relay};
use dagd::reject::{extract_reject_code, RejectCode};
use dagd::template::BlockTemplate;
use dagd_consensus::{chain_params, ChainParams, Checkpoint, Network, COIN};
use dagd_log::{Level, Logger};
use dagd_primitives::outpoint::OutPoint;

use common::{make_block, make_pool, spend, MemoryChain, RecordingPeers, GENESIS};

const FEE: i64 = 10_000;

struct Harness {
    chain: Arc<MemoryChain>,
    pool: Arc<TxPool>,
    peers: Arc<RecordingPeers>,
    chain_state: Arc<ChainStateCache>,
    manager: BlockManager,
}

fn start_with(chain: Arc<MemoryChain>, params: ChainParams, logger: Logger) -> Harness {
    start_configured(chain, params, logger, BlockManagerConfig::default())
}

fn start_configured(
    chain: Arc<MemoryChain>,
    params: ChainParams,
    logger: Logger,
    config: BlockManagerConfig,
) -> Harness {
    let pool = Arc::new(make_pool(&chain, MempoolPolicy::default()));
    let peers = RecordingPeers::new();
    let block_chain: Arc<dyn BlockChain> = chain.clone();
    let tx_manager: Arc<dyn TxManager> = pool.clone();
    let chain_state = Arc::new(ChainStateCache::new(chain.snapshot()));
    let ctx = BlockManagerContext {
        params,
        chain: block_chain,
        tx_manager,
        peers: peers.clone(),
        notifications: chain.feed().subscribe(),
        observer: None,
        chain_state: Arc::clone(&chain_state),
        logger,
    };
    let manager = BlockManager::start(config, ctx).expect("start");
    Harness {
        chain,
        pool,
        peers,
        chain_state,
        manager,
    }
}

fn start(chain: Arc<MemoryChain>) -> Harness {
    start_with(chain, chain_params(Network::Regtest), Logger::discard())
}

fn peer(id: u64, last_height: u64) -> PeerInfo {
    PeerInfo {
        id,
        addr: format!("127.0.0.1:{}", 18_000 + id),
        last_height,
        full_node: true,
    }
}

fn template(nonce: u64) -> BlockTemplate {
    BlockTemplate {
        block: make_block(vec![GENESIS], nonce, Vec::new()),
        fees: vec![0],
        sig_op_counts: vec![1],
        height: 101,
        blues: 0,
        valid_pay_address: true,
    }
}

#[test]
fn block_on_stale_tips_is_obsolete() {
    let harness = start(MemoryChain::new(100));
    let handle = harness.manager.handle();

    let stale = make_block(vec![[0x99; 32]], 1, Vec::new());
    let err = handle
        .process_block(Arc::new(stale), BehaviorFlags::default(), true)
        .expect_err("stale tips");
    assert!(matches!(err, BlockManagerError::Rule(_)));
    assert_eq!(extract_reject_code(&err).0, RejectCode::Obsolete);

    let fresh = make_block(vec![GENESIS], 2, Vec::new());
    let hash = fresh.hash();
    let is_orphan = handle
        .process_block(Arc::new(fresh), BehaviorFlags::default(), true)
        .expect("on current tips");
    assert!(!is_orphan);
    assert_eq!(handle.tip_generation().expect("tips"), vec![hash]);
}

#[test]
fn connected_block_updates_the_mempool() {
    let chain = MemoryChain::new(100);
    let confirmed_funding = chain.fund_coin(0x01, 50);
    let conflict_funding = chain.fund_coin(0x02, 50);
    let orphan_funding = chain.fund_coin(0x03, 50);
    let harness = start(Arc::clone(&chain));
    let handle = harness.manager.handle();

    let confirmed = spend(&[confirmed_funding], &[COIN - FEE]);
    let child = spend(&[OutPoint::new(confirmed.txid(), 0)], &[COIN - 2 * FEE]);
    let loser = spend(&[conflict_funding], &[COIN - FEE]);
    let winner = spend(&[conflict_funding], &[COIN - 2 * FEE]);
    let parent = spend(&[orphan_funding], &[COIN - FEE]);
    let orphan = spend(&[OutPoint::new(parent.txid(), 0)], &[COIN - 2 * FEE]);
    let (child_id, loser_id, orphan_id) = (child.txid(), loser.txid(), orphan.txid());

    for tx in [confirmed.clone(), child, loser, orphan] {
        handle
            .process_transaction(Arc::new(tx), true, false, false)
            .expect("admitted");
    }
    assert_eq!(harness.pool.count(), 3);
    assert!(harness.pool.is_orphan_in_pool(&orphan_id));

    let block = make_block(vec![GENESIS], 1, vec![confirmed.clone(), winner, parent.clone()]);
    let hash = block.hash();
    handle
        .process_block(Arc::new(block), BehaviorFlags::default(), true)
        .expect("block");

    let pool = &harness.pool;
    assert!(!pool.have_transaction(&confirmed.txid()));
    assert!(!pool.have_transaction(&loser_id));
    assert!(pool.is_transaction_in_pool(&child_id));
    assert!(pool.is_transaction_in_pool(&orphan_id));
    assert_eq!(pool.orphan_count(), 0);
    pool.check_invariants().expect("invariants");

    let sent = harness.peers.sent();
    assert!(sent.contains(&Relay::Confirmed(confirmed.txid())));
    assert!(sent.contains(&Relay::Confirmed(parent.txid())));
    assert!(sent.contains(&Relay::RebroadcastMempool));
    assert!(sent
        .iter()
        .any(|relay| matches!(relay, Relay::Block { hash: relayed, .. } if *relayed == hash)));
    assert!(harness.peers.announced().contains(&orphan_id));
    assert_eq!(harness.chain.snapshot().height, 101);
    assert_eq!(harness.chain_state.best_height(), 101);
    assert_eq!(harness.chain_state.best_hash(), hash);
}

#[test]
fn rejected_transaction_is_answered_once() {
    let chain = MemoryChain::new(100);
    let funding = chain.fund_coin(0x01, 50);
    let harness = start(chain);
    let handle = harness.manager.handle();

    let dusty = Arc::new(spend(&[funding], &[100, COIN - 100 - FEE]));
    let txid = dusty.txid();
    handle.queue_tx(7, Arc::clone(&dusty));
    handle.queue_tx(7, dusty);
    handle.queue_inv(7, vec![InvVect::tx(txid)]);
    handle.is_current().expect("sync");

    assert_eq!(harness.peers.rejects(), vec![(7, RejectCode::Dust, txid)]);
    assert!(!harness
        .peers
        .sent()
        .iter()
        .any(|relay| matches!(relay, Relay::GetData { .. })));
}

#[test]
fn rejected_transaction_is_retried_after_new_blocks() {
    let chain = MemoryChain::new(100);
    let funding = chain.fund_coin(0x01, 50);
    let harness = start(Arc::clone(&chain));
    let handle = harness.manager.handle();

    let mut locked = spend(&[funding], &[COIN - FEE]);
    locked.lock_time = 103;
    locked.vin[0].sequence = 0;
    let locked = Arc::new(locked);
    let txid = locked.txid();
    handle.queue_tx(7, Arc::clone(&locked));
    handle.is_current().expect("sync");
    assert_eq!(harness.peers.rejects(), vec![(7, RejectCode::NonStandard, txid)]);

    let mut parent = GENESIS;
    for nonce in 1..=3u64 {
        let block = make_block(vec![parent], nonce, Vec::new());
        parent = block.hash();
        handle
            .process_block(Arc::new(block), BehaviorFlags::default(), true)
            .expect("block");
    }
    assert_eq!(chain.snapshot().height, 103);

    handle.queue_tx(7, locked);
    handle.is_current().expect("sync");
    assert!(harness.pool.is_transaction_in_pool(&txid));
    assert_eq!(harness.peers.rejects().len(), 1);
}

#[test]
fn inventory_requests_only_unknown_items() {
    let harness = start(MemoryChain::new(100));
    let handle = harness.manager.handle();

    let invs = vec![InvVect::tx([0x42; 32]), InvVect::block([0x43; 32]), InvVect::block(GENESIS)];
    handle.queue_inv(5, invs.clone());
    handle.queue_inv(5, invs);
    handle.is_current().expect("sync");

    let requests: Vec<Relay> = harness
        .peers
        .sent()
        .into_iter()
        .filter(|relay| matches!(relay, Relay::GetData { .. }))
        .collect();
    assert_eq!(
        requests,
        vec![Relay::GetData {
            peer: 5,
            invs: vec![InvVect::tx([0x42; 32]), InvVect::block([0x43; 32])],
        }]
    );
}

#[test]
fn orphan_block_requests_its_parents() {
    let harness = start(MemoryChain::new(100));
    let handle = harness.manager.handle();

    let orphan = make_block(vec![[0x99; 32]], 1, Vec::new());
    handle.queue_block(5, Arc::new(orphan));
    handle.is_current().expect("sync");

    assert!(harness.peers.sent().contains(&Relay::GetData {
        peer: 5,
        invs: vec![InvVect::block([0x99; 32])],
    }));
}

#[test]
fn headers_first_sync_up_to_checkpoint() {
    let chain = MemoryChain::new(100);
    let first = make_block(vec![GENESIS], 1, Vec::new());
    let second = make_block(vec![first.hash()], 2, Vec::new());
    let (first_hash, second_hash) = (first.hash(), second.hash());

    let mut params = chain_params(Network::Testnet);
    params.add_checkpoint(Checkpoint {
        height: 102,
        hash: second_hash,
    });
    let harness = start_with(Arc::clone(&chain), params, Logger::discard());
    let handle = harness.manager.handle();

    handle.new_peer(peer(3, 500));
    assert_eq!(handle.sync_peer().expect("sync peer"), Some(3));

    handle.queue_headers(3, vec![first.header.clone(), second.header.clone()]);
    handle.queue_block(3, Arc::new(first));
    handle.queue_block(3, Arc::new(second));
    handle.is_current().expect("sync");

    let sync: Vec<Relay> = harness
        .peers
        .sent()
        .into_iter()
        .filter(|relay| {
            matches!(
                relay,
                Relay::GetHeaders { .. } | Relay::GetData { .. } | Relay::GetBlocks { .. }
            )
        })
        .collect();
    assert_eq!(
        sync,
        vec![
            Relay::GetHeaders {
                peer: 3,
                locator: vec![GENESIS],
                stop: second_hash,
            },
            Relay::GetData {
                peer: 3,
                invs: vec![InvVect::block(first_hash), InvVect::block(second_hash)],
            },
            Relay::GetBlocks {
                peer: 3,
                locator: vec![second_hash],
                stop: [0u8; 32],
            },
        ]
    );
    assert_eq!(chain.snapshot().height, 102);
    assert!(!harness
        .peers
        .sent()
        .iter()
        .any(|relay| matches!(relay, Relay::Block { .. })));
}

#[test]
fn regtest_sync_skips_headers_and_ignores_other_peers() {
    let harness = start(MemoryChain::new(100));
    let handle = harness.manager.handle();

    handle.new_peer(peer(1, 50));
    assert_eq!(handle.sync_peer().expect("sync peer"), None);

    handle.new_peer(peer(2, 300));
    assert_eq!(handle.sync_peer().expect("sync peer"), Some(2));
    assert!(!handle.is_current().expect("current"));

    let header = make_block(vec![GENESIS], 1, Vec::new()).header;
    handle.queue_headers(1, vec![header]);
    handle.done_peer(2);
    assert_eq!(handle.sync_peer().expect("sync peer"), None);

    let sent = harness.peers.sent();
    assert_eq!(
        sent.iter()
            .filter(|relay| matches!(relay, Relay::GetBlocks { peer: 2, .. }))
            .count(),
        1
    );
    assert!(!sent
        .iter()
        .any(|relay| matches!(relay, Relay::GetData { .. } | Relay::GetHeaders { .. })));
}

#[test]
fn idle_sync_peer_is_reported_as_stalled() {
    let config = BlockManagerConfig {
        stall_sample_interval: Duration::from_millis(10),
        max_stall_duration: Duration::from_millis(40),
        ..BlockManagerConfig::default()
    };
    let harness = start_configured(
        MemoryChain::new(100),
        chain_params(Network::Regtest),
        Logger::discard(),
        config,
    );
    let handle = harness.manager.handle();

    handle.new_peer(peer(2, 300));
    assert_eq!(handle.sync_peer().expect("sync peer"), Some(2));
    thread::sleep(Duration::from_millis(200));
    handle.is_current().expect("worker alive");

    assert!(harness
        .peers
        .sent()
        .iter()
        .any(|relay| matches!(relay, Relay::SyncStalled(2))));
}

#[test]
fn templates_are_shared_and_cleared_on_reorganization() {
    let chain = MemoryChain::new(100);
    let harness = start(Arc::clone(&chain));
    let handle = harness.manager.handle();

    assert_eq!(handle.current_template().expect("current"), None);
    handle
        .set_current_template(Some(template(1)))
        .expect("set current");
    handle
        .set_parent_template(Some(template(2)))
        .expect("set parent");
    assert_eq!(handle.current_template().expect("current"), Some(template(1)));
    assert_eq!(handle.parent_template().expect("parent"), Some(template(2)));

    chain.publish(Notification::Reorganization {
        old_tips: vec![GENESIS],
        new_tips: vec![[0x33; 32]],
    });
    assert_eq!(handle.current_template().expect("current"), None);
    assert_eq!(handle.parent_template().expect("parent"), None);
}

#[test]
fn chain_failures_are_logged_by_severity() {
    let chain = MemoryChain::new(100);
    let logger = Logger::discard();
    logger.enable_capture(64);
    let harness = start_with(
        Arc::clone(&chain),
        chain_params(Network::Regtest),
        logger.clone(),
    );
    let handle = harness.manager.handle();

    let block = Arc::new(make_block(vec![GENESIS], 1, Vec::new()));
    handle
        .process_block(Arc::clone(&block), BehaviorFlags::default(), false)
        .expect("first");
    let err = handle
        .process_block(Arc::clone(&block), BehaviorFlags::default(), false)
        .expect_err("duplicate");
    assert!(err.is_rule_violation());
    assert_eq!(
        err,
        BlockManagerError::Chain(ChainError::rule(ChainRuleCode::Duplicate, "already have block"))
    );

    chain.fail_next_block(ChainError::Storage("disk full".to_string()));
    let next = make_block(vec![block.hash()], 2, Vec::new());
    let err = handle
        .process_block(Arc::new(next), BehaviorFlags::default(), false)
        .expect_err("storage failure");
    assert!(!err.is_rule_violation());

    let logs = logger.capture_snapshot(64);
    assert!(logs
        .iter()
        .any(|entry| entry.level == Level::Info && entry.msg.contains("already have block")));
    assert!(logs
        .iter()
        .any(|entry| entry.level == Level::Error && entry.msg.contains("disk full")));
}

#[test]
fn stopped_manager_reports_shutdown() {
    let mut harness = start(MemoryChain::new(100));
    let handle = harness.manager.handle();
    assert!(handle.is_current().expect("running"));

    harness.manager.stop();
    assert_eq!(handle.is_current(), Err(BlockManagerError::Shutdown));
    let tx = spend(&[OutPoint::new([0x01; 32], 0)], &[COIN]);
    assert_eq!(
        handle
            .process_transaction(Arc::new(tx), true, false, false)
            .map(|accepted| accepted.len()),
        Err(BlockManagerError::Shutdown)
    );
}
