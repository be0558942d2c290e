//! Peer-layer interface used by the block manager.

use std::sync::Arc;

use dagd_consensus::Hash256;
use dagd_primitives::block::BlockHeader;
use dagd_primitives::transaction::Transaction;
use tokio::sync::broadcast;

use crate::mempool::TxDesc;
use crate::reject::RejectCode;

pub type PeerId = u64;

pub const RELAY_QUEUE: usize = 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: String,
    /// Best height the peer advertised at handshake or since.
    pub last_height: u64,
    /// Peers without full block history are never chosen to sync from.
    pub full_node: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum InvType {
    Tx,
    Block,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct InvVect {
    pub kind: InvType,
    pub hash: Hash256,
}

impl InvVect {
    pub fn tx(hash: Hash256) -> Self {
        Self {
            kind: InvType::Tx,
            hash,
        }
    }

    pub fn block(hash: Hash256) -> Self {
        Self {
            kind: InvType::Block,
            hash,
        }
    }
}

/// Outbound requests and announcements the block manager hands to peers.
pub trait PeerNotifier: Send + Sync {
    fn announce_new_transactions(&self, txs: &[Arc<TxDesc>]);

    fn relay_block(&self, hash: Hash256, header: &BlockHeader);

    fn transaction_confirmed(&self, tx: &Transaction);

    /// Re-announce every pending mempool transaction.
    fn rebroadcast_mempool(&self);

    fn push_get_data(&self, peer: PeerId, invs: Vec<InvVect>);

    fn push_get_headers(&self, peer: PeerId, locator: Vec<Hash256>, stop: Hash256);

    fn push_get_blocks(&self, peer: PeerId, locator: Vec<Hash256>, stop: Hash256);

    fn push_reject(&self, peer: PeerId, code: RejectCode, reason: String, hash: Hash256);

    fn disconnect(&self, peer: PeerId, reason: &str);

    /// The sync peer made no progress for too long; the peer layer decides
    /// whether to replace it.
    fn sync_peer_stalled(&self, peer: PeerId);
}

/// Message published by [`BroadcastRelay`] for the networking tasks.
#[derive(Clone, Debug, PartialEq)]
pub enum Relay {
    Transactions(Vec<Hash256>),
    Block { hash: Hash256, header: BlockHeader },
    Confirmed(Hash256),
    RebroadcastMempool,
    GetData { peer: PeerId, invs: Vec<InvVect> },
    GetHeaders { peer: PeerId, locator: Vec<Hash256>, stop: Hash256 },
    GetBlocks { peer: PeerId, locator: Vec<Hash256>, stop: Hash256 },
    Reject { peer: PeerId, code: RejectCode, reason: String, hash: Hash256 },
    Disconnect { peer: PeerId, reason: String },
    SyncStalled(PeerId),
}

/// [`PeerNotifier`] that fans requests out over a broadcast channel.
///
/// Sends never block; with no subscribers the message is dropped.
#[derive(Clone)]
pub struct BroadcastRelay {
    tx: broadcast::Sender<Relay>,
}

impl BroadcastRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Relay> {
        self.tx.subscribe()
    }

    fn send(&self, relay: Relay) {
        let _ = self.tx.send(relay);
    }
}

impl Default for BroadcastRelay {
    fn default() -> Self {
        Self::new(RELAY_QUEUE)
    }
}

impl PeerNotifier for BroadcastRelay {
    fn announce_new_transactions(&self, txs: &[Arc<TxDesc>]) {
        if txs.is_empty() {
            return;
        }
        self.send(Relay::Transactions(txs.iter().map(|desc| desc.txid).collect()));
    }

    fn relay_block(&self, hash: Hash256, header: &BlockHeader) {
        self.send(Relay::Block {
            hash,
            header: header.clone(),
        });
    }

    fn transaction_confirmed(&self, tx: &Transaction) {
        self.send(Relay::Confirmed(tx.txid()));
    }

    fn rebroadcast_mempool(&self) {
        self.send(Relay::RebroadcastMempool);
    }

    fn push_get_data(&self, peer: PeerId, invs: Vec<InvVect>) {
        self.send(Relay::GetData { peer, invs });
    }

    fn push_get_headers(&self, peer: PeerId, locator: Vec<Hash256>, stop: Hash256) {
        self.send(Relay::GetHeaders {
            peer,
            locator,
            stop,
        });
    }

    fn push_get_blocks(&self, peer: PeerId, locator: Vec<Hash256>, stop: Hash256) {
        self.send(Relay::GetBlocks {
            peer,
            locator,
            stop,
        });
    }

    fn push_reject(&self, peer: PeerId, code: RejectCode, reason: String, hash: Hash256) {
        self.send(Relay::Reject {
            peer,
            code,
            reason,
            hash,
        });
    }

    fn disconnect(&self, peer: PeerId, reason: &str) {
        self.send(Relay::Disconnect {
            peer,
            reason: reason.to_string(),
        });
    }

    fn sync_peer_stalled(&self, peer: PeerId) {
        self.send(Relay::SyncStalled(peer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_fans_out_to_subscribers() {
        let relay = BroadcastRelay::new(8);
        let mut first = relay.subscribe();
        let mut second = relay.subscribe();
        relay.rebroadcast_mempool();
        relay.disconnect(3, "bad headers");

        assert_eq!(first.try_recv().expect("first"), Relay::RebroadcastMempool);
        assert_eq!(second.try_recv().expect("second"), Relay::RebroadcastMempool);
        assert_eq!(
            first.try_recv().expect("disconnect"),
            Relay::Disconnect {
                peer: 3,
                reason: "bad headers".to_string()
            }
        );
    }

    #[test]
    fn sends_without_subscribers_are_dropped() {
        let relay = BroadcastRelay::new(1);
        relay.sync_peer_stalled(1);
        let mut late = relay.subscribe();
        assert!(late.try_recv().is_err());
    }
}
