//! DAG block header and block types.

use std::sync::Arc;

use dagd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::Transaction;

pub const CURRENT_VERSION: i32 = 1;

/// Upper bound on parents referenced by one header.
pub const MAX_PARENTS: usize = 50;

#[derive(Clone, Debug, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    /// Tips of the DAG this block builds on; the first entry is the main parent.
    pub parents: Vec<Hash256>,
    pub tx_root: Hash256,
    pub state_root: Hash256,
    pub bits: u32,
    pub timestamp: u64,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(4 + 1 + self.parents.len() * 32 + 84);
        Encodable::consensus_encode(self, &mut encoder);
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    pub fn main_parent(&self) -> Option<&Hash256> {
        self.parents.first()
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.parents.len() as u64);
        for parent in &self.parents {
            encoder.write_hash_le(parent);
        }
        encoder.write_hash_le(&self.tx_root);
        encoder.write_hash_le(&self.state_root);
        encoder.write_u32_le(self.bits);
        encoder.write_u64_le(self.timestamp);
        encoder.write_u64_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let parent_count = decoder.read_count(32)?;
        if parent_count > MAX_PARENTS {
            return Err(DecodeError::InvalidData("too many block parents"));
        }
        let mut parents = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            parents.push(decoder.read_hash_le()?);
        }
        let tx_root = decoder.read_hash_le()?;
        let state_root = decoder.read_hash_le()?;
        let bits = decoder.read_u32_le()?;
        let timestamp = decoder.read_u64_le()?;
        let nonce = decoder.read_u64_le()?;
        Ok(Self {
            version,
            parents,
            tx_root,
            state_root,
            bits,
            timestamp,
            nonce,
        })
    }
}

#[derive(Debug)]
pub enum BlockDecodeError {
    Header(DecodeError),
    Transaction { index: usize, error: DecodeError },
    TrailingBytes,
}

impl std::fmt::Display for BlockDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockDecodeError::Header(err) => write!(f, "invalid block header: {err}"),
            BlockDecodeError::Transaction { index, error } => {
                write!(f, "invalid transaction {index}: {error}")
            }
            BlockDecodeError::TrailingBytes => write!(f, "trailing bytes after block"),
        }
    }
}

impl std::error::Error for BlockDecodeError {}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Arc<Transaction>>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn coinbase(&self) -> Option<&Arc<Transaction>> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Merkle root over the transaction ids, duplicating the last entry on odd levels.
    pub fn compute_tx_root(&self) -> Hash256 {
        let mut level: Vec<Hash256> = self.transactions.iter().map(|tx| tx.txid()).collect();
        if level.is_empty() {
            return [0u8; 32];
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                let mut joined = [0u8; 64];
                joined[..32].copy_from_slice(&pair[0]);
                joined[32..].copy_from_slice(right);
                next.push(sha256d(&joined));
            }
            level = next;
        }
        level[0]
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        Encodable::consensus_encode(&self.header, &mut encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            Encodable::consensus_encode(tx.as_ref(), &mut encoder);
        }
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = <BlockHeader as Decodable>::consensus_decode(&mut decoder)
            .map_err(BlockDecodeError::Header)?;
        let tx_count = decoder.read_count(1).map_err(BlockDecodeError::Header)?;
        let mut transactions = Vec::with_capacity(tx_count);
        for index in 0..tx_count {
            let tx = <Transaction as Decodable>::consensus_decode(&mut decoder)
                .map_err(|error| BlockDecodeError::Transaction { index, error })?;
            transactions.push(Arc::new(tx));
        }
        if !decoder.is_empty() {
            return Err(BlockDecodeError::TrailingBytes);
        }
        Ok(Self {
            header,
            transactions,
        })
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }
}
