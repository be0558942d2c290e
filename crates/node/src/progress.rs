use std::sync::Mutex;
use std::time::{Duration, Instant};

use dagd_log::{log_info, Logger};
use dagd_primitives::block::Block;

use crate::chain::BestSnapshot;

pub const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct ProgressState {
    received_blocks: u64,
    received_txs: u64,
    last_log: Instant,
}

/// Rate-limited "Processed N blocks" reporting.
pub struct BlockProgressLogger {
    action: &'static str,
    logger: Logger,
    interval: Duration,
    state: Mutex<ProgressState>,
}

impl BlockProgressLogger {
    pub fn new(action: &'static str, logger: Logger) -> Self {
        Self::with_interval(action, logger, PROGRESS_LOG_INTERVAL)
    }

    pub fn with_interval(action: &'static str, logger: Logger, interval: Duration) -> Self {
        Self {
            action,
            logger,
            interval,
            state: Mutex::new(ProgressState {
                received_blocks: 0,
                received_txs: 0,
                last_log: Instant::now(),
            }),
        }
    }

    pub fn log_block_order(&self, block: &Block, best: &BestSnapshot) {
        self.record(block, best, Instant::now());
    }

    /// Counts `block` and logs a summary once `interval` has elapsed since the
    /// last summary. Returns whether a line was written.
    pub fn record(&self, block: &Block, best: &BestSnapshot, now: Instant) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.received_blocks += 1;
        state.received_txs += block.transactions.len() as u64;

        let elapsed = now.saturating_duration_since(state.last_log);
        if elapsed < self.interval {
            return false;
        }

        let tenths = (elapsed.as_millis() / 100) as f64 / 10.0;
        log_info!(
            self.logger,
            "{} {} {} in the last {:.1}s ({} {}, order {}, height {}, {})",
            self.action,
            state.received_blocks,
            plural(state.received_blocks, "block", "blocks"),
            tenths,
            state.received_txs,
            plural(state.received_txs, "transaction", "transactions"),
            best.order,
            best.height,
            block.header.timestamp,
        );

        state.received_blocks = 0;
        state.received_txs = 0;
        state.last_log = now;
        true
    }
}

fn plural(count: u64, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagd_primitives::block::BlockHeader;

    fn block() -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                parents: Vec::new(),
                tx_root: [0u8; 32],
                state_root: [0u8; 32],
                bits: 0,
                timestamp: 1_700_000_000,
                nonce: 0,
            },
            transactions: Vec::new(),
        }
    }

    #[test]
    fn logs_at_most_once_per_interval() {
        let logger = Logger::discard();
        logger.enable_capture(16);
        let progress = BlockProgressLogger::new("Processed", logger.clone());
        let best = BestSnapshot {
            order: 12,
            height: 9,
            ..BestSnapshot::default()
        };
        let start = Instant::now();

        assert!(!progress.record(&block(), &best, start));
        assert!(!progress.record(&block(), &best, start + Duration::from_secs(5)));
        assert!(progress.record(&block(), &best, start + Duration::from_secs(11)));

        let lines = logger.capture_snapshot(16);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].msg.starts_with("Processed 3 blocks in the last"));
        assert!(lines[0].msg.contains("order 12, height 9"));
    }
}
