//! Cached mining templates.

use std::sync::Arc;

use dagd_primitives::block::Block;

/// A mining candidate assembled by the block template generator.
///
/// Deliberately not `Clone`: readers get a copy through
/// [`BlockTemplate::clone_for_reader`], which spells out what is shared.
#[derive(Debug, PartialEq)]
pub struct BlockTemplate {
    pub block: Block,
    pub fees: Vec<i64>,
    pub sig_op_counts: Vec<i64>,
    pub height: u64,
    pub blues: u64,
    pub valid_pay_address: bool,
}

impl BlockTemplate {
    /// Copy handed to template readers.
    ///
    /// The header and per-transaction vectors are copied. The coinbase is
    /// deep-copied into a fresh `Arc`, so a reader may take it with
    /// `Arc::get_mut` and change the extra nonce without touching the cached
    /// template. Every other transaction is immutable and its `Arc` is shared.
    pub fn clone_for_reader(&self) -> BlockTemplate {
        let transactions = self
            .block
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| {
                if index == 0 && tx.is_coinbase() {
                    Arc::new(tx.as_ref().clone())
                } else {
                    Arc::clone(tx)
                }
            })
            .collect();
        BlockTemplate {
            block: Block {
                header: self.block.header.clone(),
                transactions,
            },
            fees: self.fees.clone(),
            sig_op_counts: self.sig_op_counts.clone(),
            height: self.height,
            blues: self.blues,
            valid_pay_address: self.valid_pay_address,
        }
    }
}

/// Current and parent templates owned by the block manager.
#[derive(Debug, Default)]
pub struct TemplateCache {
    current: Option<BlockTemplate>,
    parent: Option<BlockTemplate>,
}

impl TemplateCache {
    pub fn current(&self) -> Option<BlockTemplate> {
        self.current.as_ref().map(BlockTemplate::clone_for_reader)
    }

    pub fn set_current(&mut self, template: Option<BlockTemplate>) {
        self.current = template;
    }

    pub fn parent(&self) -> Option<BlockTemplate> {
        self.parent.as_ref().map(BlockTemplate::clone_for_reader)
    }

    pub fn set_parent(&mut self, template: Option<BlockTemplate>) {
        self.parent = template;
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.parent = None;
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.parent.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagd_primitives::block::BlockHeader;
    use dagd_primitives::outpoint::OutPoint;
    use dagd_primitives::transaction::{Transaction, TxIn, TxOut, TxType};

    fn tx(tx_type: TxType, prevout: OutPoint, script_sig: Vec<u8>) -> Transaction {
        Transaction {
            version: 1,
            tx_type,
            vin: vec![TxIn {
                prevout,
                script_sig,
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: 10,
                coin_id: 0,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
            expire: 0,
        }
    }

    fn template() -> BlockTemplate {
        let coinbase = tx(TxType::Coinbase, OutPoint::null(), vec![0x01, 0x00]);
        let spend = tx(TxType::Regular, OutPoint::new([7u8; 32], 0), vec![0x51]);
        BlockTemplate {
            block: Block {
                header: BlockHeader {
                    version: 1,
                    parents: vec![[1u8; 32]],
                    tx_root: [0u8; 32],
                    state_root: [0u8; 32],
                    bits: 0,
                    timestamp: 0,
                    nonce: 0,
                },
                transactions: vec![Arc::new(coinbase), Arc::new(spend)],
            },
            fees: vec![0, 100],
            sig_op_counts: vec![1, 1],
            height: 5,
            blues: 3,
            valid_pay_address: true,
        }
    }

    #[test]
    fn reader_copy_shares_only_non_coinbase() {
        let original = template();
        let copy = original.clone_for_reader();
        assert_eq!(copy, original);
        assert!(!Arc::ptr_eq(
            &copy.block.transactions[0],
            &original.block.transactions[0]
        ));
        assert!(Arc::ptr_eq(
            &copy.block.transactions[1],
            &original.block.transactions[1]
        ));
    }

    #[test]
    fn reader_can_bump_extra_nonce_privately() {
        let original = template();
        let mut copy = original.clone_for_reader();
        let coinbase = Arc::get_mut(&mut copy.block.transactions[0]).expect("unique coinbase");
        assert!(coinbase.set_extra_nonce(vec![0x01, 0x09]));
        assert_eq!(
            original.block.transactions[0].extra_nonce(),
            Some(&[0x01, 0x00][..])
        );
    }

    #[test]
    fn cache_hands_out_copies() {
        let mut cache = TemplateCache::default();
        assert!(cache.current().is_none());
        cache.set_current(Some(template()));
        let first = cache.current().expect("template");
        let second = cache.current().expect("template");
        assert!(Arc::ptr_eq(
            &first.block.transactions[1],
            &second.block.transactions[1]
        ));
        cache.clear();
        assert!(cache.is_empty());
    }
}
