//! In-process pub/sub: one bounded `broadcast` channel per [`ChannelName`].

use std::collections::HashMap;
use std::sync::Arc;

use palaver_shared::ChannelName;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use crate::events::{BroadcastEvent, Envelope};

/// Frames buffered per channel before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Hub {
    channels: Arc<RwLock<HashMap<ChannelName, broadcast::Sender<Arc<Envelope>>>>>,
    capacity: usize,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Deliver `event` to everyone subscribed to `channel`. Returns the number
    /// of receivers; zero is not an error.
    pub async fn publish(&self, channel: ChannelName, event: BroadcastEvent) -> usize {
        let name = event.name();
        let channels = self.channels.read().await;
        let Some(tx) = channels.get(&channel) else {
            trace!(%channel, event = name, "No subscribers");
            return 0;
        };
        let delivered = tx.send(Arc::new(Envelope { channel, event })).unwrap_or(0);
        debug!(%channel, event = name, delivered, "Published");
        delivered
    }

    /// Publish the same event to several channels.
    pub async fn publish_all(
        &self,
        channels: impl IntoIterator<Item = ChannelName>,
        event: &BroadcastEvent,
    ) {
        for channel in channels {
            self.publish(channel, event.clone()).await;
        }
    }

    pub async fn subscribe(&self, channel: ChannelName) -> broadcast::Receiver<Arc<Envelope>> {
        if let Some(tx) = self.channels.read().await.get(&channel) {
            return tx.subscribe();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop channels nobody listens to any more. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
