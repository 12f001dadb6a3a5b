//! Publish/subscribe transport underneath the router.
//!
//! This module contains:
//! - `PubSub` trait: topic-addressed publish plus per-call subscriptions
//! - `PubSubError` and the `MessageStream` alias
//! - Implementations: in-memory channels (`ChannelPubSub`)
//!
//! A network-backed implementation may be substituted as long as it keeps
//! the publish/subscribe/close contract below.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::errors::{Classify, ErrorKind};
use crate::message::Message;

pub mod channel;

pub use channel::{ChannelConfig, ChannelPubSub};

// ============================================================================
// Traits
// ============================================================================

/// Result type for pubsub operations.
pub type Result<T> = std::result::Result<T, PubSubError>;

/// Lazy stream of messages for one subscription.
pub type MessageStream = BoxStream<'static, Message>;

/// Errors that can occur during pubsub operations.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("pubsub is closed")]
    Closed,

    #[error("Publish failed on topic '{topic}': {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe failed on topic '{topic}': {message}")]
    Subscribe { topic: String, message: String },
}

impl Classify for PubSubError {
    fn code(&self) -> &str {
        match self {
            PubSubError::Closed => "PUBSUB_CLOSED",
            PubSubError::Publish { .. } => "PUBLISH_ERROR",
            PubSubError::Subscribe { .. } => "SUBSCRIBE_ERROR",
        }
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }

    fn is_retryable(&self) -> bool {
        false
    }
}

/// Topic-based publish/subscribe.
///
/// Implementations must be safe under concurrent publish and subscribe on the
/// same or different topics.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish messages to every live subscriber of `topic`, in order.
    ///
    /// Returns once the transport has accepted the messages, not once they
    /// have been handled.
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<()>;

    /// Open a new subscription on `topic`.
    ///
    /// Every call creates an independent subscription receiving its own copy
    /// of each message. The stream ends when `cancel` fires or the pubsub is
    /// closed.
    async fn subscribe(&self, cancel: CancellationToken, topic: &str) -> Result<MessageStream>;

    /// Close the pubsub, ending every outstanding subscription.
    async fn close(&self) -> Result<()>;
}
