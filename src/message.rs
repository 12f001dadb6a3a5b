//! Message envelope carried by the pubsub.

use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

/// String-to-string message headers. Middlewares may mutate them; the
/// payload stays untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(HashMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A single published message.
///
/// The payload is an immutable, cheaply cloned buffer: fan-out to several
/// subscribers shares the same bytes.
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    topic: String,
    payload: Bytes,
    pub metadata: Metadata,
}

impl Message {
    /// New message with a random UUID v4 id. The topic is assigned on publish.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    pub fn with_id(id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            topic: String::new(),
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Topic the message was published to; empty before publish.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn set_topic(&mut self, topic: &str) {
        self.topic = topic.to_string();
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_gets_unique_id() {
        let a = Message::new("{}");
        let b = Message::new("{}");
        assert_ne!(a.id(), b.id());
        assert!(Uuid::parse_str(a.id()).is_ok());
        assert_eq!(a.topic(), "");
    }

    #[test]
    fn test_metadata_set_and_get() {
        let msg = Message::with_id("msg-1", "payload")
            .with_metadata("correlation_id", "abc-123")
            .with_metadata("name", "OrderPlaced");

        assert_eq!(msg.metadata.get("correlation_id"), Some("abc-123"));
        assert_eq!(msg.metadata.get("name"), Some("OrderPlaced"));
        assert_eq!(msg.metadata.get("missing"), None);
        assert_eq!(msg.metadata.len(), 2);
    }

    #[test]
    fn test_clone_shares_payload() {
        let msg = Message::new(vec![1u8, 2, 3]);
        let copy = msg.clone();
        assert_eq!(copy.payload().as_ptr(), msg.payload().as_ptr());
    }
}
