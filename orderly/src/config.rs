//! Tunables for publishers and subscribers. Both structs deserialize with
//! every field optional, so they can be embedded in an application's own
//! configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PULL_DEADLINE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Route keyed messages through per-key sequencers. When disabled, a
    /// publish carrying an ordering key is refused.
    pub enable_message_ordering: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enable_message_ordering: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// How long a listen session runs before shutting down gracefully.
    /// `None` listens until cancelled or the stream ends.
    pub session_timeout: Option<Duration>,
    /// Acknowledge every message the handler accepts.
    pub auto_ack: bool,
    /// Maximum number of undrained messages buffered per ordering key.
    /// `None` is unbounded.
    pub per_key_capacity: Option<usize>,
    /// How long a [pull](crate::Subscriber::pull) retries transient
    /// failures before giving up.
    pub pull_deadline: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            session_timeout: None,
            auto_ack: true,
            per_key_capacity: None,
            pull_deadline: DEFAULT_PULL_DEADLINE,
        }
    }
}
