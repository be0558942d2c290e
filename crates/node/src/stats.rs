use std::sync::atomic::{AtomicU64, Ordering};

use dagd_consensus::Hash256;
use serde::Serialize;

/// Counters updated by the mempool as transactions move through it.
#[derive(Debug, Default)]
pub struct MempoolMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    orphaned: AtomicU64,
    orphans_accepted: AtomicU64,
    orphans_purged: AtomicU64,
    evicted: AtomicU64,
    loaded: AtomicU64,
    load_reject: AtomicU64,
    persisted_writes: AtomicU64,
    persisted_bytes: AtomicU64,
}

impl MempoolMetrics {
    pub fn note_accepted(&self, count: u64) {
        self.accepted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn note_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_orphaned(&self) {
        self.orphaned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_orphan_accepted(&self) {
        self.orphans_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_orphan_purged(&self) {
        self.orphans_purged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_evicted(&self, count: u64) {
        self.evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn note_loaded(&self, count: u64) {
        self.loaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn note_load_reject(&self, count: u64) {
        self.load_reject.fetch_add(count, Ordering::Relaxed);
    }

    pub fn note_persisted(&self, bytes: u64) {
        self.persisted_writes.fetch_add(1, Ordering::Relaxed);
        self.persisted_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MempoolMetricsSnapshot {
        MempoolMetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            orphans_accepted: self.orphans_accepted.load(Ordering::Relaxed),
            orphans_purged: self.orphans_purged.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            loaded: self.loaded.load(Ordering::Relaxed),
            load_reject: self.load_reject.load(Ordering::Relaxed),
            persisted_writes: self.persisted_writes.load(Ordering::Relaxed),
            persisted_bytes: self.persisted_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MempoolMetricsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub orphaned: u64,
    pub orphans_accepted: u64,
    pub orphans_purged: u64,
    pub evicted: u64,
    pub loaded: u64,
    pub load_reject: u64,
    pub persisted_writes: u64,
    pub persisted_bytes: u64,
}

/// Hex of a hash in display order (byte-reversed).
pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push(hex_digit(byte >> 4));
        out.push(hex_digit(byte & 0x0f));
    }
    out
}

fn hex_digit(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        _ => (b'a' + value - 10) as char,
    }
}
