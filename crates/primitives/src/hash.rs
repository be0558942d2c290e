use dagd_consensus::Hash256;
use sha2::{Digest, Sha256};

/// Double SHA-256, the hash behind transaction and block ids.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}
