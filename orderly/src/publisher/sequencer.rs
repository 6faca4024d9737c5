//! The per-key state machine behind ordered publishing.
//!
//! A [KeySequencer] holds the queue of outbound messages for one ordering
//! key and lets at most one of them be in flight. It performs no I/O:
//! every transition hands back the message which should be sent next (if
//! any) and the [OrderedPublisher](super::OrderedPublisher) performs the
//! send.

use std::{collections::VecDeque, sync::Arc};

use tracing::{debug, warn};

use crate::{
    constants::KEY_QUEUE_CAPACITY,
    error::{Error, TransportError},
    message::{Message, MessageId, OrderingKey},
    publisher::handle::{resolve, Completion, PublishHandle},
};

/// How to restart a key latched by a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    /// Send the failed message again before anything queued behind it.
    #[default]
    Retry,
    /// Discard the failed message and carry on with the next one.
    DropFailed,
}

#[derive(Debug)]
struct Pending {
    message: Arc<Message>,
    /// Taken once the caller has been told the outcome.
    completion: Option<Completion>,
}

#[derive(Debug)]
pub(crate) struct KeySequencer {
    key: OrderingKey,
    pending: VecDeque<Pending>,
    /// Whether the head of `pending` is currently being sent.
    in_flight: bool,
    /// Set by a failed send; nothing is sent until it is cleared.
    last_error: Option<TransportError>,
    /// Set once this sequencer has been removed from the publisher's table.
    retired: bool,
}

impl KeySequencer {
    pub fn new(key: OrderingKey) -> Self {
        Self {
            key,
            pending: VecDeque::with_capacity(KEY_QUEUE_CAPACITY),
            in_flight: false,
            last_error: None,
            retired: false,
        }
    }

    /// Queue a message. Returns the message to send when this call should
    /// start a send.
    ///
    /// While the key is latched the message is still queued, but its
    /// handle resolves with [Error::Blocked] straight away.
    pub fn enqueue(
        &mut self,
        message: Arc<Message>,
        completion: Completion,
    ) -> Option<Arc<Message>> {
        if self.last_error.is_some() {
            debug!("Key `{}` is blocked, parking message", self.key);
            resolve(Some(completion), Err(Error::Blocked(self.key.clone())));
            self.pending.push_back(Pending {
                message,
                completion: None,
            });
            return None;
        }
        self.pending.push_back(Pending {
            message,
            completion: Some(completion),
        });
        self.next_send()
    }

    /// Record the outcome of the in-flight send of the queue head.
    pub fn on_send_result(
        &mut self,
        result: Result<MessageId, TransportError>,
    ) -> Option<Arc<Message>> {
        self.in_flight = false;
        match result {
            Ok(id) => {
                if let Some(head) = self.pending.pop_front() {
                    resolve(head.completion, Ok(id));
                }
                self.next_send()
            }
            Err(err) => {
                warn!(
                    "Send failed for key `{}`, blocking {} queued message(s): {}",
                    self.key,
                    self.pending.len(),
                    err
                );
                let mut pending = self.pending.iter_mut();
                if let Some(head) = pending.next() {
                    resolve(head.completion.take(), Err(Error::SendFailed(err.clone())));
                }
                for queued in pending {
                    resolve(queued.completion.take(), Err(Error::Blocked(self.key.clone())));
                }
                self.last_error = Some(err);
                None
            }
        }
    }

    /// Clear the latch. Every message still queued gets a fresh handle,
    /// returned in queue order, along with the message to send next.
    ///
    /// Resuming a key which isn't latched does nothing.
    pub fn resume(&mut self, mode: ResumeMode) -> (Vec<PublishHandle>, Option<Arc<Message>>) {
        if self.last_error.take().is_none() {
            return (Vec::new(), None);
        }
        if mode == ResumeMode::DropFailed && self.pending.pop_front().is_some() {
            debug!("Dropped failed message for key `{}`", self.key);
        }
        let handles = self
            .pending
            .iter_mut()
            .map(|queued| {
                let (handle, completion) = PublishHandle::pair();
                queued.completion = Some(completion);
                handle
            })
            .collect();
        (handles, self.next_send())
    }

    /// Remove everything queued on a latched key and clear the latch.
    /// Keys which aren't latched are left alone.
    pub fn clear(&mut self) -> Vec<Message> {
        if self.last_error.take().is_none() {
            return Vec::new();
        }
        self.pending
            .drain(..)
            .map(|queued| {
                Arc::try_unwrap(queued.message).unwrap_or_else(|shared| (*shared).clone())
            })
            .collect()
    }

    fn next_send(&mut self) -> Option<Arc<Message>> {
        if self.in_flight || self.last_error.is_some() {
            return None;
        }
        let head = self.pending.front()?;
        self.in_flight = true;
        Some(Arc::clone(&head.message))
    }

    /// Nothing queued, nothing in flight and no latched error.
    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.last_error.is_none() && self.pending.is_empty()
    }

    pub fn is_blocked(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn retire(&mut self) {
        self.retired = true;
    }
}
