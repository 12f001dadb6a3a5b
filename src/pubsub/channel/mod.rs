//! In-memory channel-based pubsub.
//!
//! Uses one tokio mpsc channel per subscription for fan-out within a single
//! process. Ideal for local development and testing without external
//! dependencies. Delivery is best-effort and at-most-once: messages published
//! to a topic without subscribers are dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{MessageStream, PubSub, PubSubError, Result};
use crate::message::Message;

/// Configuration for the channel pubsub.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Per-subscriber queue capacity.
    /// - `None`: unbounded, publish never waits
    /// - `Some(n)`: bounded, publish waits for room in every subscriber queue
    pub subscriber_buffer: Option<usize>,
}

impl ChannelConfig {
    pub fn unbounded() -> Self {
        Self {
            subscriber_buffer: None,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            subscriber_buffer: Some(capacity.max(1)),
        }
    }
}

#[derive(Clone)]
enum SubscriberTx {
    Unbounded(mpsc::UnboundedSender<Message>),
    Bounded(mpsc::Sender<Message>),
}

impl SubscriberTx {
    fn is_closed(&self) -> bool {
        match self {
            SubscriberTx::Unbounded(tx) => tx.is_closed(),
            SubscriberTx::Bounded(tx) => tx.is_closed(),
        }
    }

    /// Returns false when the subscriber has gone away.
    async fn send(&self, message: Message) -> bool {
        match self {
            SubscriberTx::Unbounded(tx) => tx.send(message).is_ok(),
            SubscriberTx::Bounded(tx) => tx.send(message).await.is_ok(),
        }
    }
}

/// In-memory pubsub using one mpsc channel per subscription.
pub struct ChannelPubSub {
    /// Live subscriptions by topic.
    subscribers: RwLock<HashMap<String, Vec<SubscriberTx>>>,
    /// Fires once on close.
    closed: CancellationToken,
    config: ChannelConfig,
}

impl ChannelPubSub {
    /// Create a new channel pubsub.
    pub fn new(config: ChannelConfig) -> Self {
        info!(
            subscriber_buffer = ?config.subscriber_buffer,
            "Channel pubsub initialized"
        );

        Self {
            subscribers: RwLock::new(HashMap::new()),
            closed: CancellationToken::new(),
            config,
        }
    }

    /// Number of live subscriptions on a topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    async fn prune(&self, topic: &str) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(subs) = subscribers.get_mut(topic) {
            subs.retain(|s| !s.is_closed());
            if subs.is_empty() {
                subscribers.remove(topic);
            }
        }
    }
}

impl Default for ChannelPubSub {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

#[async_trait]
impl PubSub for ChannelPubSub {
    #[tracing::instrument(name = "pubsub.publish", skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(PubSubError::Closed);
        }

        // Snapshot the senders: bounded sends may wait, and subscribe/prune
        // must not stall behind them.
        let subs: Vec<SubscriberTx> = match self.subscribers.read().await.get(topic) {
            Some(subs) => subs.clone(),
            None => {
                debug!(count = messages.len(), "Published messages (no subscribers)");
                return Ok(());
            }
        };

        let mut disconnected = false;
        for mut message in messages {
            message.set_topic(topic);
            for sub in &subs {
                // Bounded sends may wait; close must still win.
                let delivered = tokio::select! {
                    biased;
                    _ = self.closed.cancelled() => return Err(PubSubError::Closed),
                    delivered = sub.send(message.clone()) => delivered,
                };
                disconnected |= !delivered;
            }
            debug!(
                message_id = %message.id(),
                receivers = subs.len(),
                "Published message to channel"
            );
        }

        if disconnected {
            self.prune(topic).await;
        }

        Ok(())
    }

    async fn subscribe(&self, cancel: CancellationToken, topic: &str) -> Result<MessageStream> {
        if self.closed.is_cancelled() {
            return Err(PubSubError::Closed);
        }

        let stream = {
            let mut subscribers = self.subscribers.write().await;
            let (tx, stream) = match self.config.subscriber_buffer {
                None => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    (
                        SubscriberTx::Unbounded(tx),
                        UnboundedReceiverStream::new(rx).boxed(),
                    )
                }
                Some(capacity) => {
                    let (tx, rx) = mpsc::channel(capacity.max(1));
                    (SubscriberTx::Bounded(tx), ReceiverStream::new(rx).boxed())
                }
            };
            subscribers.entry(topic.to_string()).or_default().push(tx);
            stream
        };

        debug!(topic = %topic, "Channel subscription established");

        let closed = self.closed.clone();
        let stop = async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = closed.cancelled() => {}
            }
        };

        Ok(stream.take_until(stop).boxed())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        self.subscribers.write().await.clear();

        info!("Channel pubsub closed");
        Ok(())
    }
}
