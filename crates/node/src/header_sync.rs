//! Headers-first synchronisation towards the next checkpoint.
//!
//! The state machine only decides what to ask for next; the block manager
//! turns each [`SyncAction`] into a peer request.

use std::collections::{HashSet, VecDeque};

use dagd_consensus::{Checkpoint, Hash256};
use dagd_primitives::block::BlockHeader;

use crate::stats::hash256_to_hex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderNode {
    pub height: u64,
    pub hash: Hash256,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncMode {
    Normal,
    HeadersFirst,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncAction {
    GetHeaders {
        locator: Vec<Hash256>,
        stop: Hash256,
    },
    GetBlocks {
        locator: Vec<Hash256>,
        stop: Hash256,
    },
    GetData(Vec<Hash256>),
    Disconnect(String),
}

/// How a freshly received block relates to the header list.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockArrival {
    /// The block is the next expected one and was pre-validated by headers.
    pub fast_add: bool,
    pub is_checkpoint: bool,
}

#[derive(Debug)]
pub struct HeaderSync {
    checkpoints: Vec<Checkpoint>,
    mode: SyncMode,
    nodes: VecDeque<HeaderNode>,
    next_checkpoint: Option<Checkpoint>,
    requested: HashSet<Hash256>,
    min_in_flight: usize,
    max_request: usize,
}

impl HeaderSync {
    pub fn new(mut checkpoints: Vec<Checkpoint>, min_in_flight: usize, max_request: usize) -> Self {
        checkpoints.sort_by_key(|checkpoint| checkpoint.height);
        Self {
            checkpoints,
            mode: SyncMode::Normal,
            nodes: VecDeque::new(),
            next_checkpoint: None,
            requested: HashSet::new(),
            min_in_flight,
            max_request: max_request.max(1),
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn next_checkpoint(&self) -> Option<&Checkpoint> {
        self.next_checkpoint.as_ref()
    }

    pub fn header_nodes(&self) -> impl Iterator<Item = &HeaderNode> {
        self.nodes.iter()
    }

    pub fn in_flight(&self) -> usize {
        self.requested.len()
    }

    fn find_next_checkpoint(&self, height: u64) -> Option<Checkpoint> {
        self.checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height > height)
            .copied()
    }

    /// Begins syncing from our tip. Headers-first is used only when allowed
    /// and a checkpoint lies ahead of `best_height`.
    pub fn start(
        &mut self,
        best_height: u64,
        best_hash: Hash256,
        locator: Vec<Hash256>,
        headers_first: bool,
    ) -> SyncAction {
        self.reset();
        self.next_checkpoint = if headers_first {
            self.find_next_checkpoint(best_height)
        } else {
            None
        };
        match self.next_checkpoint {
            Some(checkpoint) => {
                self.mode = SyncMode::HeadersFirst;
                self.nodes.push_back(HeaderNode {
                    height: best_height,
                    hash: best_hash,
                });
                SyncAction::GetHeaders {
                    locator: vec![best_hash],
                    stop: checkpoint.hash,
                }
            }
            None => SyncAction::GetBlocks {
                locator,
                stop: [0u8; 32],
            },
        }
    }

    /// Extends the header list. Headers that do not link to the previous
    /// node or contradict the checkpoint abort headers-first mode.
    pub fn on_headers(
        &mut self,
        headers: &[BlockHeader],
        have_block: impl Fn(&Hash256) -> bool,
    ) -> Option<SyncAction> {
        if self.mode != SyncMode::HeadersFirst || headers.is_empty() {
            return None;
        }
        let checkpoint = self.next_checkpoint?;

        let mut received_checkpoint = false;
        let mut last_hash = None;
        for header in headers {
            let hash = header.hash();
            last_hash = Some(hash);
            let Some(prev) = self.nodes.back().copied() else {
                return Some(self.abort("header list is empty".to_string()));
            };
            if !header.parents.contains(&prev.hash) {
                return Some(self.abort(format!(
                    "received block header {} that does not properly connect to the chain",
                    hash256_to_hex(&hash)
                )));
            }
            let node = HeaderNode {
                height: prev.height.saturating_add(1),
                hash,
            };
            self.nodes.push_back(node);

            if node.height == checkpoint.height {
                if node.hash != checkpoint.hash {
                    return Some(self.abort(format!(
                        "block header at height {} has hash {}, checkpoint expects {}",
                        node.height,
                        hash256_to_hex(&node.hash),
                        hash256_to_hex(&checkpoint.hash)
                    )));
                }
                received_checkpoint = true;
                break;
            }
        }

        if received_checkpoint {
            // The front node is our own tip, kept only to link the first header.
            self.nodes.pop_front();
            return self.fetch_header_blocks(have_block);
        }
        last_hash.map(|hash| SyncAction::GetHeaders {
            locator: vec![hash],
            stop: checkpoint.hash,
        })
    }

    /// Records the arrival of `hash` and removes it from the header list,
    /// except for the checkpoint which links the next round of headers.
    pub fn on_block_received(&mut self, hash: &Hash256) -> BlockArrival {
        self.requested.remove(hash);
        if self.mode != SyncMode::HeadersFirst {
            return BlockArrival::default();
        }
        let Some(position) = self.nodes.iter().position(|node| node.hash == *hash) else {
            return BlockArrival::default();
        };
        let is_checkpoint = self
            .next_checkpoint
            .is_some_and(|checkpoint| checkpoint.hash == *hash);
        if !is_checkpoint {
            self.nodes.remove(position);
        }
        BlockArrival {
            fast_add: position == 0,
            is_checkpoint,
        }
    }

    /// Follow-up after a block from the header list was processed.
    pub fn after_block_processed(
        &mut self,
        hash: &Hash256,
        arrival: BlockArrival,
        have_block: impl Fn(&Hash256) -> bool,
    ) -> Option<SyncAction> {
        if self.mode != SyncMode::HeadersFirst {
            return None;
        }
        if !arrival.is_checkpoint {
            if self.requested.len() < self.min_in_flight {
                return self.fetch_header_blocks(have_block);
            }
            return None;
        }

        let reached = self.next_checkpoint?;
        self.next_checkpoint = self.find_next_checkpoint(reached.height);
        match self.next_checkpoint {
            Some(next) => Some(SyncAction::GetHeaders {
                locator: vec![reached.hash],
                stop: next.hash,
            }),
            None => {
                self.mode = SyncMode::Normal;
                self.nodes.clear();
                Some(SyncAction::GetBlocks {
                    locator: vec![*hash],
                    stop: [0u8; 32],
                })
            }
        }
    }

    /// Blocks we are still waiting for; used when the sync peer goes away.
    pub fn requested(&self) -> impl Iterator<Item = &Hash256> {
        self.requested.iter()
    }

    pub fn reset(&mut self) {
        self.mode = SyncMode::Normal;
        self.nodes.clear();
        self.next_checkpoint = None;
        self.requested.clear();
    }

    fn abort(&mut self, reason: String) -> SyncAction {
        self.reset();
        SyncAction::Disconnect(reason)
    }

    fn fetch_header_blocks(&mut self, have_block: impl Fn(&Hash256) -> bool) -> Option<SyncAction> {
        let mut hashes = Vec::new();
        for node in &self.nodes {
            if self.requested.len() >= self.max_request {
                break;
            }
            if have_block(&node.hash) || self.requested.contains(&node.hash) {
                continue;
            }
            self.requested.insert(node.hash);
            hashes.push(node.hash);
        }
        if hashes.is_empty() {
            None
        } else {
            Some(SyncAction::GetData(hashes))
        }
    }
}
