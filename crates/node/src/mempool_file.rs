//! `mempool.dat`: the pool snapshot written at shutdown and replayed at startup.
//!
//! Layout, little endian: `u8 version`, `u32 count`, then per transaction
//! `u32 length`, the consensus-encoded transaction and the `u64` unix time it
//! was admitted.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use dagd_consensus::Hash256;
use dagd_log::{log_debug, log_info, log_warn};
use dagd_primitives::encoding::{Decoder, Encoder};
use dagd_primitives::transaction::Transaction;

use crate::mempool::{TxDesc, TxPool};
use crate::stats::hash256_to_hex;

pub const MEMPOOL_FILE_NAME: &str = "mempool.dat";
pub const MEMPOOL_FILE_VERSION: u8 = 1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SavedTx {
    pub raw: Vec<u8>,
    pub added: u64,
}

pub fn encode(entries: &[SavedTx]) -> Result<Vec<u8>, String> {
    let count = u32::try_from(entries.len()).map_err(|_| "too many transactions".to_string())?;
    let mut encoder = Encoder::new();
    encoder.write_u8(MEMPOOL_FILE_VERSION);
    encoder.write_u32_le(count);
    for entry in entries {
        let len =
            u32::try_from(entry.raw.len()).map_err(|_| "transaction too large".to_string())?;
        encoder.write_u32_le(len);
        encoder.write_bytes(&entry.raw);
        encoder.write_u64_le(entry.added);
    }
    Ok(encoder.into_inner())
}

pub fn decode(bytes: &[u8]) -> Result<Vec<SavedTx>, String> {
    let mut decoder = Decoder::new(bytes);
    let version = decoder.read_u8().map_err(|err| err.to_string())?;
    if version != MEMPOOL_FILE_VERSION {
        return Err(format!("unsupported mempool file version {version}"));
    }
    let count = decoder.read_u32_le().map_err(|err| err.to_string())? as usize;
    let mut entries = Vec::with_capacity(count.min(decoder.remaining() / 12));
    for index in 0..count {
        let entry = read_entry(&mut decoder)
            .map_err(|err| format!("mempool entry {index}: {err}"))?;
        entries.push(entry);
    }
    if !decoder.is_empty() {
        return Err("trailing bytes after mempool entries".to_string());
    }
    Ok(entries)
}

fn read_entry(decoder: &mut Decoder<'_>) -> Result<SavedTx, String> {
    let len = decoder.read_u32_le().map_err(|err| err.to_string())? as usize;
    let raw = decoder.read_bytes(len).map_err(|err| err.to_string())?;
    let added = decoder.read_u64_le().map_err(|err| err.to_string())?;
    Ok(SavedTx { raw, added })
}

/// Writes `descs` parents first, so a replay never has to park children as
/// orphans. Returns the number of bytes written.
pub fn save(path: &Path, descs: &[Arc<TxDesc>]) -> Result<usize, String> {
    let entries: Vec<SavedTx> = dependency_order(descs)
        .into_iter()
        .map(|desc| SavedTx {
            raw: desc.tx.consensus_encode(),
            added: desc.added,
        })
        .collect();
    let bytes = encode(&entries)?;
    write_file_atomic(path, &bytes)?;
    Ok(bytes.len())
}

/// Replays the snapshot at `path` through the admission pipeline.
///
/// Entries older than the pool's expiry are skipped. The file is removed once
/// every entry decoded; a missing file loads nothing.
pub fn load(pool: &TxPool, path: &Path, now: u64) -> Result<usize, String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };
    let entries = decode(&bytes).map_err(|err| format!("{}: {err}", path.display()))?;
    let logger = pool.logger();
    let expiry = pool.policy().mempool_expiry_secs;

    let mut accepted = 0usize;
    let mut expired = 0usize;
    let mut rejected = 0usize;
    let mut undecodable = 0usize;
    for entry in entries {
        if expiry > 0 && now.saturating_sub(entry.added) > expiry {
            expired += 1;
            continue;
        }
        let tx = match Transaction::consensus_decode(&entry.raw) {
            Ok(tx) => tx,
            Err(err) => {
                undecodable += 1;
                log_warn!(logger, "Skipping undecodable mempool entry: {}", err);
                continue;
            }
        };
        let txid = tx.txid();
        match pool.process_transaction(Arc::new(tx), false, false, true) {
            Ok(descs) => accepted += descs.len(),
            Err(err) => {
                rejected += 1;
                log_debug!(
                    logger,
                    "Dropped saved transaction {}: {}",
                    hash256_to_hex(&txid),
                    err
                );
            }
        }
    }

    pool.metrics().note_loaded(accepted as u64);
    pool.metrics()
        .note_load_reject((rejected + undecodable) as u64);

    if undecodable == 0 {
        fs::remove_file(path)
            .map_err(|err| format!("failed to remove {}: {err}", path.display()))?;
    }
    log_info!(
        logger,
        "Loaded {} mempool transaction(s) from {} ({} expired, {} rejected, {} undecodable)",
        accepted,
        path.display(),
        expired,
        rejected,
        undecodable
    );
    Ok(accepted)
}

fn dependency_order(descs: &[Arc<TxDesc>]) -> Vec<&Arc<TxDesc>> {
    let by_txid: HashMap<Hash256, &Arc<TxDesc>> =
        descs.iter().map(|desc| (desc.txid, desc)).collect();
    let mut sorted: Vec<&Arc<TxDesc>> = descs.iter().collect();
    sorted.sort_by(|a, b| a.added.cmp(&b.added).then_with(|| a.txid.cmp(&b.txid)));

    let mut visited = HashSet::with_capacity(descs.len());
    let mut out = Vec::with_capacity(descs.len());
    for desc in sorted {
        visit(desc, &by_txid, &mut visited, &mut out);
    }
    out
}

fn visit<'a>(
    desc: &'a Arc<TxDesc>,
    by_txid: &HashMap<Hash256, &'a Arc<TxDesc>>,
    visited: &mut HashSet<Hash256>,
    out: &mut Vec<&'a Arc<TxDesc>>,
) {
    if !visited.insert(desc.txid) {
        return;
    }
    for input in &desc.tx.vin {
        if let Some(parent) = by_txid.get(&input.prevout.hash).copied() {
            visit(parent, by_txid, visited, out);
        }
    }
    out.push(desc);
}

pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|err| err.to_string())?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path).map_err(|err| err.to_string())?;
    }
    Ok(())
}
