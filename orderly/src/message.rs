use std::{borrow::Borrow, collections::BTreeMap, fmt, sync::Arc};

use bytes::Bytes;

/// Groups messages which must be published and delivered in submission
/// order. The empty key means "no ordering constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey(Arc<str>);

impl OrderingKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unordered messages carry the empty key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for OrderingKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for OrderingKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl Borrow<str> for OrderingKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broker-assigned identifier of a published message. Resolving a publish
/// to a [MessageId] is the broker's acknowledgement of that publish.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token used to acknowledge one delivery of a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckId(pub String);

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable message: a payload, its ordering key and optional
/// metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    ordering_key: OrderingKey,
    attributes: BTreeMap<String, String>,
}

impl Message {
    /// An unordered message with no attributes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_ordering_key(mut self, key: impl Into<OrderingKey>) -> Self {
        self.ordering_key = key.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn without_attribute(mut self, key: &str) -> Self {
        self.attributes.remove(key);
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn ordering_key(&self) -> &OrderingKey {
        &self.ordering_key
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A message as it comes off the listen stream, before the subscriber
/// wraps it with an acknowledgement handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub ack_id: AckId,
    pub message_id: MessageId,
    /// Broker publish time in nano-seconds.
    pub publish_time: i64,
    /// Present when the subscription tracks delivery attempts.
    pub delivery_attempt: Option<u32>,
    pub message: Message,
}
