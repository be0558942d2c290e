//! Chain notifications and their publish/subscribe feed.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use dagd_consensus::Hash256;
use dagd_primitives::block::Block;

use crate::chain::BehaviorFlags;

#[derive(Clone, Debug)]
pub enum Notification {
    /// The block passed validation and was added to the DAG.
    BlockAccepted {
        block: Arc<Block>,
        flags: BehaviorFlags,
    },
    /// The block's transactions were applied to the authoritative chain.
    BlockConnected(Arc<Block>),
    /// The block's transactions were rolled back.
    BlockDisconnected(Arc<Block>),
    Reorganization {
        old_tips: Vec<Hash256>,
        new_tips: Vec<Hash256>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::BlockAccepted { .. } => "block-accepted",
            Notification::BlockConnected(_) => "block-connected",
            Notification::BlockDisconnected(_) => "block-disconnected",
            Notification::Reorganization { .. } => "reorganization",
        }
    }
}

/// A delivered notification. Dropping or acknowledging it releases a
/// publisher blocked in [`EventFeed::publish_and_wait`].
#[derive(Debug)]
pub struct Event {
    pub notification: Notification,
    ack: Option<Sender<()>>,
}

impl Event {
    pub fn acknowledge(mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(());
        }
    }
}

#[derive(Default)]
pub struct EventFeed {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        if let Ok(mut guard) = self.subscribers.lock() {
            guard.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|guard| guard.len())
            .unwrap_or(0)
    }

    /// Queues `notification` for every live subscriber without waiting.
    pub fn publish(&self, notification: Notification) {
        let Ok(mut guard) = self.subscribers.lock() else {
            return;
        };
        guard.retain(|subscriber| {
            subscriber
                .send(Event {
                    notification: notification.clone(),
                    ack: None,
                })
                .is_ok()
        });
    }

    /// Delivers `notification` and blocks until every subscriber has handled it.
    ///
    /// Must not be called from the thread that consumes a subscription, such as
    /// from inside `BlockChain::process_block` while the block manager waits on it.
    pub fn publish_and_wait(&self, notification: Notification) {
        let pending: Vec<Receiver<()>> = {
            let Ok(mut guard) = self.subscribers.lock() else {
                return;
            };
            let mut pending = Vec::with_capacity(guard.len());
            guard.retain(|subscriber| {
                let (ack_tx, ack_rx) = bounded(1);
                let delivered = subscriber
                    .send(Event {
                        notification: notification.clone(),
                        ack: Some(ack_tx),
                    })
                    .is_ok();
                if delivered {
                    pending.push(ack_rx);
                }
                delivered
            });
            pending
        };
        for ack in pending {
            // A dropped event disconnects the channel, which also releases us.
            let _ = ack.recv();
        }
    }
}

/// External consumer of chain notifications forwarded by the block manager.
pub trait ChainObserver: Send + Sync {
    fn on_notification(&self, notification: &Notification);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn reorg() -> Notification {
        Notification::Reorganization {
            old_tips: vec![[1u8; 32]],
            new_tips: vec![[2u8; 32]],
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = EventFeed::new();
        let kept = feed.subscribe();
        drop(feed.subscribe());
        feed.publish(reorg());
        assert_eq!(feed.subscriber_count(), 1);
        let event = kept.try_recv().expect("event");
        assert_eq!(event.notification.kind(), "reorganization");
    }

    #[test]
    fn publish_and_wait_returns_after_ack() {
        let feed = Arc::new(EventFeed::new());
        let rx = feed.subscribe();
        let consumer = thread::spawn(move || {
            let event = rx.recv().expect("event");
            event.acknowledge();
        });
        feed.publish_and_wait(reorg());
        consumer.join().expect("consumer");
    }
}
