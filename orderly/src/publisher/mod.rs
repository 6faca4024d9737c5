//! An [OrderedPublisher] gives the part of your application producing
//! messages a way to publish them such that every message sharing an
//! ordering key reaches the broker in the order it was published.
//!
//! Each ordering key gets its own [KeySequencer](sequencer::KeySequencer),
//! which allows one send in flight at a time. Different keys never wait on
//! each other, and messages without a key skip sequencing altogether.
//!
//! A failed send latches its key: the failed message stays at the head of
//! the key's queue and nothing more is sent for that key until
//! [resume_publish](OrderedPublisher::resume_publish) or
//! [clear_pending](OrderedPublisher::clear_pending) is called.
//!
//! Example usage:
//!
//! ``` no_run
//! # use std::sync::Arc;
//! # use orderly::{Message, OrderedPublisher, PublisherConfig, Transport};
//! #
//! # async fn inner<T: Transport>(transport: Arc<T>) {
//! let publisher = OrderedPublisher::new(transport, PublisherConfig::default());
//!
//! let first = publisher.publish(Message::new("one").with_ordering_key("A"));
//! let second = publisher.publish(Message::new("two").with_ordering_key("A"));
//!
//! // "one" is guaranteed to have been sent (successfully) before "two"
//! // was attempted.
//! let id = first.await.unwrap();
//! # }
//! ```

mod handle;
mod sequencer;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub use handle::PublishHandle;
pub use sequencer::ResumeMode;
use tracing::{debug, info};

use crate::{
    config::PublisherConfig,
    error::{Error, TransportError},
    message::{Message, OrderingKey},
    publisher::sequencer::KeySequencer,
    transport::Transport,
    util::lock,
};

type SharedSequencer = Arc<Mutex<KeySequencer>>;

/// Publishes messages, preserving per-key order. Cloning is cheap and
/// every clone shares the same sequencers.
pub struct OrderedPublisher<T> {
    inner: Arc<PublisherInner<T>>,
}

impl<T> Clone for OrderedPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PublisherInner<T> {
    transport: Arc<T>,
    config: PublisherConfig,
    /// One entry per key with queued, in-flight or latched messages.
    sequencers: Mutex<HashMap<OrderingKey, SharedSequencer>>,
}

impl<T: Transport> OrderedPublisher<T> {
    /// Create a new instance.
    pub fn new(transport: Arc<T>, config: PublisherConfig) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                transport,
                config,
                sequencers: Default::default(),
            }),
        }
    }

    /// Publish a message. The returned handle resolves once this message's
    /// send completes or fails.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, message: Message) -> PublishHandle {
        let key = message.ordering_key().clone();
        if key.is_empty() {
            return self.publish_unordered(message);
        }
        if !self.inner.config.enable_message_ordering {
            return PublishHandle::ready(Err(Error::OrderingDisabled(key)));
        }

        let message = Arc::new(message);
        let (handle, completion) = PublishHandle::pair();
        loop {
            let sequencer = self.inner.sequencer(&key);
            let mut guard = lock(&sequencer);
            if guard.is_retired() {
                // evicted between lookup and lock
                continue;
            }
            let send = guard.enqueue(message, completion);
            drop(guard);
            if let Some(send) = send {
                self.inner.spawn_pump(key, sequencer, send);
            }
            return handle;
        }
    }

    /// Clear the latch on `key` and retry its failed message, followed by
    /// everything queued behind it.
    ///
    /// The handles originally returned for these messages have already
    /// resolved, so fresh ones are returned in queue order.
    pub fn resume_publish(&self, key: &str) -> Vec<PublishHandle> {
        self.resume_publish_with(key, ResumeMode::Retry)
    }

    pub fn resume_publish_with(&self, key: &str, mode: ResumeMode) -> Vec<PublishHandle> {
        let sequencer = match self.inner.existing(key) {
            Some(sequencer) => sequencer,
            None => return Vec::new(),
        };
        let (handles, send) = lock(&sequencer).resume(mode);
        info!(
            "Resumed publishing on key `{}` ({:?}), {} message(s) queued",
            key,
            mode,
            handles.len()
        );
        match send {
            Some(send) => self.inner.spawn_pump(key.into(), sequencer, send),
            None => self.inner.evict_if_idle(key, &sequencer),
        }
        handles
    }

    /// Drop every message queued on a latched key, returning them, and
    /// clear the latch. Keys which aren't latched are left untouched.
    pub fn clear_pending(&self, key: &str) -> Vec<Message> {
        let sequencer = match self.inner.existing(key) {
            Some(sequencer) => sequencer,
            None => return Vec::new(),
        };
        let cleared = lock(&sequencer).clear();
        self.inner.evict_if_idle(key, &sequencer);
        cleared
    }

    /// Whether `key` is latched by a failed send.
    pub fn is_blocked(&self, key: &str) -> bool {
        self.inner
            .inspect(key, KeySequencer::is_blocked)
            .unwrap_or(false)
    }

    /// The error which latched `key`, if it is latched.
    pub fn last_error(&self, key: &str) -> Option<TransportError> {
        self.inner
            .inspect(key, |sequencer| sequencer.last_error().cloned())
            .flatten()
    }

    /// Messages queued on `key`, including one in flight.
    pub fn pending_len(&self, key: &str) -> usize {
        self.inner
            .inspect(key, KeySequencer::pending_len)
            .unwrap_or(0)
    }

    /// Keys which currently have a sequencer.
    pub fn active_keys(&self) -> Vec<OrderingKey> {
        lock(&self.inner.sequencers).keys().cloned().collect()
    }

    fn publish_unordered(&self, message: Message) -> PublishHandle {
        let (handle, completion) = PublishHandle::pair();
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            let result = transport.send(&message).await.map_err(Error::SendFailed);
            // the caller is allowed to drop its handle
            let _ = completion.send(result);
        });
        handle
    }
}

impl<T: Transport> PublisherInner<T> {
    fn sequencer(&self, key: &OrderingKey) -> SharedSequencer {
        let mut sequencers = lock(&self.sequencers);
        let sequencer = sequencers.entry(key.clone()).or_insert_with(|| {
            debug!("New sequencer for key `{}`", key);
            Arc::new(Mutex::new(KeySequencer::new(key.clone())))
        });
        Arc::clone(sequencer)
    }

    fn existing(&self, key: &str) -> Option<SharedSequencer> {
        lock(&self.sequencers).get(key).map(Arc::clone)
    }

    fn inspect<R>(&self, key: &str, f: impl FnOnce(&KeySequencer) -> R) -> Option<R> {
        let sequencer = self.existing(key)?;
        let guard = lock(&sequencer);
        Some(f(&*guard))
    }

    /// Start sending for a key with nothing in flight.
    fn spawn_pump(
        self: &Arc<Self>,
        key: OrderingKey,
        sequencer: SharedSequencer,
        first: Arc<Message>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.pump(key, sequencer, first).await });
    }

    /// Send the head of a key's queue until the queue empties or a send
    /// fails. Only one pump runs per key at a time.
    async fn pump(&self, key: OrderingKey, sequencer: SharedSequencer, first: Arc<Message>) {
        let mut message = first;
        loop {
            let result = self.transport.send(&message).await;
            let next = lock(&sequencer).on_send_result(result);
            match next {
                Some(next) => message = next,
                None => break,
            }
        }
        self.evict_if_idle(key.as_str(), &sequencer);
    }

    fn evict_if_idle(&self, key: &str, sequencer: &SharedSequencer) {
        let mut sequencers = lock(&self.sequencers);
        let mut guard = lock(sequencer);
        let current = sequencers
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(entry, sequencer));
        if current && guard.is_idle() {
            guard.retire();
            sequencers.remove(key);
            debug!("Evicted idle sequencer for key `{}`", key);
        }
    }
}
