//! Network parameter definitions.

use crate::anticone::anticone_size;
use crate::constants::COINBASE_MATURITY;
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "test" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: u64,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Target seconds between blocks; the block rate is its inverse.
    pub target_time_per_block: f64,
    /// Expected network propagation delay in seconds.
    pub propagation_delay: f64,
    /// Acceptable probability that an honest block is flagged.
    pub security_level: f64,
    pub coinbase_maturity: u64,
    pub checkpoints: Vec<Checkpoint>,
}

impl ChainParams {
    pub fn block_rate(&self) -> f64 {
        1.0 / self.target_time_per_block
    }

    /// Anticone size k for this network.
    ///
    /// Panics when the parameters are inconsistent: a node must not start
    /// with a propagation delay and block rate that admit no safe k.
    pub fn anticone_k(&self) -> u32 {
        match anticone_size(
            self.propagation_delay,
            self.block_rate(),
            self.security_level,
        ) {
            Ok(k) => k,
            Err(err) => panic!(
                "invalid {} consensus parameters (delay {}s, block time {}s, security {}): {err}",
                self.network.as_str(),
                self.propagation_delay,
                self.target_time_per_block,
                self.security_level
            ),
        }
    }

    /// First checkpoint strictly above `height`.
    pub fn next_checkpoint(&self, height: u64) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height > height)
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// Inserts a checkpoint keeping the list ordered by height.
    pub fn add_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoints
            .retain(|existing| existing.height != checkpoint.height);
        self.checkpoints.push(checkpoint);
        self.checkpoints.sort_by_key(|checkpoint| checkpoint.height);
    }
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            target_time_per_block: 30.0,
            propagation_delay: 15.0,
            security_level: 0.01,
            coinbase_maturity: 720,
            checkpoints: Vec::new(),
        },
        Network::Testnet => ChainParams {
            network,
            target_time_per_block: 30.0,
            propagation_delay: 15.0,
            security_level: 0.01,
            coinbase_maturity: COINBASE_MATURITY,
            checkpoints: Vec::new(),
        },
        Network::Regtest => ChainParams {
            network,
            target_time_per_block: 1.0,
            propagation_delay: 0.5,
            security_level: 0.01,
            coinbase_maturity: COINBASE_MATURITY,
            checkpoints: Vec::new(),
        },
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hash length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (byte-reversed) hex hash.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }

    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex.len()) {
        padded.push('0');
    }
    padded.push_str(hex);

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out = u8::from_str_radix(&padded[start..start + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_anticone_k() {
        assert_eq!(chain_params(Network::Mainnet).anticone_k(), 4);
    }

    #[test]
    fn next_checkpoint_skips_reached_heights() {
        let mut params = chain_params(Network::Testnet);
        params.add_checkpoint(Checkpoint {
            height: 200,
            hash: [2u8; 32],
        });
        params.add_checkpoint(Checkpoint {
            height: 100,
            hash: [1u8; 32],
        });
        assert_eq!(params.next_checkpoint(0).map(|c| c.height), Some(100));
        assert_eq!(params.next_checkpoint(100).map(|c| c.height), Some(200));
        assert!(params.next_checkpoint(200).is_none());
        assert_eq!(params.latest_checkpoint().map(|c| c.height), Some(200));
    }

    #[test]
    fn hash_hex_is_byte_reversed() {
        let hash = hash256_from_hex("01").expect("hash");
        assert_eq!(hash[0], 1);
        assert!(hash[1..].iter().all(|byte| *byte == 0));
        assert!(hash256_from_hex("zz").is_err());
        assert!(hash256_from_hex("").is_err());
    }

    #[test]
    #[should_panic(expected = "invalid regtest consensus parameters")]
    fn inconsistent_params_are_fatal() {
        let mut params = chain_params(Network::Regtest);
        params.propagation_delay = 600.0;
        params.target_time_per_block = 1.0;
        params.anticone_k();
    }
}
