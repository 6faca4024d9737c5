//! An in-memory broker double. Don't use this for any real-life purpose, as
//! it keeps every message it ever saw.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex as SyncMutex, PoisonError,
    },
    time::Duration,
};

use async_stream::stream;
use chrono::Utc;
use rand::Rng;
use tokio::{
    sync::{mpsc, Mutex, MutexGuard},
    time::sleep,
};
use tracing::trace;

use crate::{
    message::{AckId, InboundMessage, Message, MessageId, OrderingKey},
    transport::{InboundStream, Transport, TransportError},
};

type InboundItem = Result<InboundMessage, TransportError>;

#[derive(Debug, Default)]
pub struct MockSends {
    /// Every send attempt, in the order the attempts started.
    pub attempts: Vec<Message>,
    /// Every send which succeeded, in completion order.
    pub published: Vec<(MessageId, Message)>,
    /// Highest number of concurrent sends seen per key.
    pub max_in_flight: HashMap<OrderingKey, usize>,
    in_flight: HashMap<OrderingKey, usize>,
    failures: HashMap<OrderingKey, usize>,
}

impl MockSends {
    /// Attempted payloads for one key, in attempt order.
    pub fn attempts_for(&self, key: &str) -> Vec<Message> {
        self.attempts
            .iter()
            .filter(|m| m.ordering_key().as_str() == key)
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub struct MockTransport {
    sends: Mutex<MockSends>,
    acks: Mutex<Vec<AckId>>,
    latency: Option<Duration>,
    loopback: bool,
    fail_acks: AtomicBool,
    ack_requests: AtomicUsize,
    fail_pulls: AtomicUsize,
    next_id: AtomicU64,
    inbound_tx: SyncMutex<Option<mpsc::UnboundedSender<InboundItem>>>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<InboundItem>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sends: Default::default(),
            acks: Default::default(),
            latency: None,
            loopback: false,
            fail_acks: AtomicBool::new(false),
            ack_requests: AtomicUsize::new(0),
            fail_pulls: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            inbound_tx: SyncMutex::new(Some(tx)),
            inbound_rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Delay every send by a random duration up to `max`.
    pub fn with_latency(mut self, max: Duration) -> Self {
        self.latency = Some(max);
        self
    }

    /// Deliver every successfully sent message to the listen stream.
    pub fn loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    /// Fail the next `n` send attempts for `key`.
    pub async fn fail_next_sends(&self, key: impl Into<OrderingKey>, n: usize) {
        *self.sends.lock().await.failures.entry(key.into()).or_default() += n;
    }

    pub fn fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` pull requests with [TransportError::Unavailable].
    pub fn fail_next_pulls(&self, n: usize) {
        self.fail_pulls.fetch_add(n, Ordering::SeqCst);
    }

    /// Number of acknowledge requests, counting a batch as one.
    pub fn ack_requests(&self) -> usize {
        self.ack_requests.load(Ordering::SeqCst)
    }

    pub async fn sends(&self) -> MutexGuard<'_, MockSends> {
        self.sends.lock().await
    }

    pub async fn acks(&self) -> MutexGuard<'_, Vec<AckId>> {
        self.acks.lock().await
    }

    /// Push a message on to the listen stream.
    pub fn deliver(&self, message: InboundMessage) {
        self.push(Ok(message));
    }

    /// Push a stream failure on to the listen stream.
    pub fn deliver_error(&self, error: TransportError) {
        self.push(Err(error));
    }

    /// End the listen stream once everything already delivered is consumed.
    pub fn close(&self) {
        self.inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Build an [InboundMessage] as the broker would deliver it.
    pub fn inbound(&self, message: Message) -> InboundMessage {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Self::wrap(MessageId(id.to_string()), message)
    }

    fn wrap(message_id: MessageId, message: Message) -> InboundMessage {
        InboundMessage {
            ack_id: AckId(format!("ack-{}", message_id)),
            message_id,
            publish_time: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            delivery_attempt: None,
            message,
        }
    }

    fn push(&self, item: InboundItem) {
        let guard = self
            .inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            // the receiver lives as long as self
            let _ = tx.send(item);
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: &Message) -> Result<MessageId, TransportError> {
        let key = message.ordering_key().clone();
        let fail = {
            let mut sends = self.sends.lock().await;
            sends.attempts.push(message.clone());
            let in_flight = sends.in_flight.entry(key.clone()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let max = sends.max_in_flight.entry(key.clone()).or_default();
            *max = current.max(*max);
            match sends.failures.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if let Some(max) = self.latency {
            let delay = rand::thread_rng().gen_range(Duration::ZERO..=max);
            sleep(delay).await;
        }

        let mut sends = self.sends.lock().await;
        if let Some(in_flight) = sends.in_flight.get_mut(&key) {
            *in_flight -= 1;
        }
        if fail {
            trace!("Failing scripted send for key `{}`", key);
            return Err(TransportError::Unavailable(format!(
                "scripted failure for key `{key}`"
            )));
        }
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        sends.published.push((id.clone(), message.clone()));
        if self.loopback {
            self.push(Ok(Self::wrap(id.clone(), message.clone())));
        }
        Ok(id)
    }

    fn listen(&self) -> Result<InboundStream, TransportError> {
        let rx = Arc::clone(&self.inbound_rx);
        Ok(Box::pin(stream! {
            loop {
                let next = rx.lock().await.recv().await;
                match next {
                    Some(item) => yield item,
                    None => break,
                }
            }
        }))
    }

    /// Takes whatever is already delivered, without waiting. A delivered
    /// error fails the whole request.
    async fn pull(&self, max_messages: usize) -> Result<Vec<InboundMessage>, TransportError> {
        let scripted = self
            .fail_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if scripted.is_ok() {
            trace!("Failing scripted pull");
            return Err(TransportError::Unavailable("scripted pull failure".into()));
        }
        let mut rx = self.inbound_rx.lock().await;
        let mut batch = Vec::with_capacity(max_messages);
        while batch.len() < max_messages {
            match rx.try_recv() {
                Ok(item) => batch.push(item?),
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    async fn acknowledge(&self, ack_id: &AckId) -> Result<(), TransportError> {
        self.acknowledge_batch(std::slice::from_ref(ack_id)).await
    }

    async fn acknowledge_batch(&self, ack_ids: &[AckId]) -> Result<(), TransportError> {
        self.ack_requests.fetch_add(1, Ordering::SeqCst);
        self.acks.lock().await.extend_from_slice(ack_ids);
        if self.fail_acks.load(Ordering::SeqCst) {
            Err(TransportError::Unavailable(format!(
                "{} ack(s) dropped",
                ack_ids.len()
            )))
        } else {
            Ok(())
        }
    }
}
