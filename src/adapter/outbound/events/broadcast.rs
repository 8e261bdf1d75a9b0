//! In-process `account_updates` channel.
//!
//! Tokio broadcast with at-most-once semantics per subscriber: slow readers
//! lose old events, matching the cache-substrate pub/sub contract.

use tokio::sync::broadcast;

use crate::error::Result;
use crate::port::outbound::events::{AccountUpdate, EventPublisher};

pub struct BroadcastPublisher {
    tx: broadcast::Sender<AccountUpdate>,
}

impl BroadcastPublisher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the channel (operator console bridge, tests).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AccountUpdate> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: AccountUpdate) -> Result<()> {
        // A channel with no subscribers is not a failure; the event simply
        // has no audience right now.
        let _ = self.tx.send(event);
        Ok(())
    }
}
