//! A subscription delivers one stream with every ordering key interleaved.
//! The [Demultiplexer] regroups it into one buffer per key, so a consumer
//! interested in key `A` sees exactly the `A` messages, in the order they
//! came off the stream.

use std::{
    collections::{vec_deque, HashMap, VecDeque},
    sync::{Arc, Mutex, RwLock},
};

use tracing::{debug, trace};

use crate::{
    constants::KEY_QUEUE_CAPACITY,
    error::Error,
    message::OrderingKey,
    subscriber::message::ReceivedMessage,
    util::{lock, read, write},
    Result,
};

/// Receives every message of a listen session, in stream order.
///
/// Returning an error declines the message: it is not acknowledged and the
/// broker will redeliver it.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: ReceivedMessage) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(ReceivedMessage) -> Result<()> + Send + Sync + 'static,
{
    fn on_message(&self, message: ReceivedMessage) -> Result<()> {
        self(message)
    }
}

#[derive(Debug, Default)]
struct PerKeyBuffer {
    messages: VecDeque<ReceivedMessage>,
    /// Set once a message was refused for lack of space. Stays set until
    /// the buffer is drained so nothing overtakes a refused message.
    overflowed: bool,
}

/// Per-key ordered buffers of received messages.
#[derive(Debug, Default)]
pub struct Demultiplexer {
    buffers: RwLock<HashMap<OrderingKey, Arc<Mutex<PerKeyBuffer>>>>,
    capacity: Option<usize>,
}

impl Demultiplexer {
    /// `capacity` bounds the number of undrained messages per key.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            buffers: Default::default(),
            capacity,
        }
    }

    /// Append a message to the buffer for its key. Messages without a key
    /// share the empty-key buffer.
    pub fn on_message(&self, message: ReceivedMessage) -> Result<()> {
        let key = message.ordering_key().clone();
        let buffer = self.buffer(&key);
        let mut buffer = lock(&buffer);
        if let Some(capacity) = self.capacity {
            if buffer.overflowed || buffer.messages.len() >= capacity {
                if !buffer.overflowed {
                    debug!("Buffer for key `{}` is full ({})", key, capacity);
                }
                buffer.overflowed = true;
                return Err(Error::BufferFull(key));
            }
        }
        trace!("Buffered {} under key `{}`", message.message_id, key);
        buffer.messages.push_back(message);
        Ok(())
    }

    /// Take everything buffered for `key` so far, in arrival order. Never
    /// blocks; messages arriving later are left for the next call.
    pub fn drain(&self, key: &str) -> Drain {
        let buffer = read(&self.buffers).get(key).map(Arc::clone);
        let messages = match buffer {
            Some(buffer) => {
                let mut buffer = lock(&buffer);
                buffer.overflowed = false;
                std::mem::take(&mut buffer.messages)
            }
            None => VecDeque::new(),
        };
        Drain {
            inner: messages.into_iter(),
        }
    }

    /// Every key seen so far, sorted.
    pub fn keys(&self) -> Vec<OrderingKey> {
        let mut keys: Vec<_> = read(&self.buffers).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of undrained messages for `key`.
    pub fn pending_len(&self, key: &str) -> usize {
        read(&self.buffers)
            .get(key)
            .map_or(0, |buffer| lock(buffer).messages.len())
    }

    fn buffer(&self, key: &OrderingKey) -> Arc<Mutex<PerKeyBuffer>> {
        if let Some(buffer) = read(&self.buffers).get(key) {
            return Arc::clone(buffer);
        }
        let mut buffers = write(&self.buffers);
        let buffer = buffers.entry(key.clone()).or_insert_with(|| {
            debug!("New receive buffer for key `{}`", key);
            Arc::new(Mutex::new(PerKeyBuffer {
                messages: VecDeque::with_capacity(KEY_QUEUE_CAPACITY),
                overflowed: false,
            }))
        });
        Arc::clone(buffer)
    }
}

impl MessageHandler for Demultiplexer {
    fn on_message(&self, message: ReceivedMessage) -> Result<()> {
        Demultiplexer::on_message(self, message)
    }
}

/// Snapshot of one key's messages, returned by [Demultiplexer::drain].
#[derive(Debug)]
pub struct Drain {
    inner: vec_deque::IntoIter<ReceivedMessage>,
}

impl Iterator for Drain {
    type Item = ReceivedMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Drain {}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{
        subscriber::message::test_utils::{make_received, payloads},
        transport::mock::MockTransport,
    };

    #[test]
    fn groups_by_key() {
        let transport = Arc::new(MockTransport::new());
        let demux = Demultiplexer::default();
        let interleaved = [
            ("A", "A1"),
            ("B", "B1"),
            ("A", "A2"),
            ("C", "C1"),
            ("B", "B2"),
            ("A", "A3"),
        ];
        for (key, payload) in interleaved {
            demux.on_message(make_received(&transport, key, payload)).unwrap();
        }
        assert_eq!(payloads(demux.drain("A")), vec!["A1", "A2", "A3"]);
        assert_eq!(payloads(demux.drain("B")), vec!["B1", "B2"]);
        assert_eq!(payloads(demux.drain("C")), vec!["C1"]);
        assert_eq!(demux.drain("D").len(), 0);
        assert_eq!(
            demux.keys(),
            vec![OrderingKey::from("A"), OrderingKey::from("B"), OrderingKey::from("C")]
        );
    }

    #[test]
    fn drain_is_restartable() {
        let transport = Arc::new(MockTransport::new());
        let demux = Demultiplexer::default();
        demux.on_message(make_received(&transport, "A", "1")).unwrap();
        let first = demux.drain("A");
        demux.on_message(make_received(&transport, "A", "2")).unwrap();
        assert_eq!(payloads(first), vec!["1"]);
        assert_eq!(demux.pending_len("A"), 1);
        assert_eq!(payloads(demux.drain("A")), vec!["2"]);
        assert_eq!(demux.drain("A").len(), 0);
    }

    #[test]
    fn unordered_messages_share_a_buffer() {
        let transport = Arc::new(MockTransport::new());
        let demux = Demultiplexer::default();
        demux.on_message(make_received(&transport, "", "x")).unwrap();
        demux.on_message(make_received(&transport, "A", "a")).unwrap();
        demux.on_message(make_received(&transport, "", "y")).unwrap();
        assert_eq!(payloads(demux.drain("")), vec!["x", "y"]);
    }

    #[test]
    fn bounded_buffer_refuses_until_drained() {
        let transport = Arc::new(MockTransport::new());
        let demux = Demultiplexer::new(Some(2));
        demux.on_message(make_received(&transport, "A", "1")).unwrap();
        demux.on_message(make_received(&transport, "A", "2")).unwrap();
        assert_eq!(
            demux.on_message(make_received(&transport, "A", "3")).unwrap_err(),
            Error::BufferFull("A".into())
        );
        // other keys are unaffected
        demux.on_message(make_received(&transport, "B", "1")).unwrap();

        assert_eq!(payloads(demux.drain("A")), vec!["1", "2"]);
        demux.on_message(make_received(&transport, "A", "3")).unwrap();
        assert_eq!(payloads(demux.drain("A")), vec!["3"]);
    }

    #[test]
    fn concurrent_keys() {
        let transport = Arc::new(MockTransport::new());
        let demux = Arc::new(Demultiplexer::default());
        let producers: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|key| {
                let demux = Arc::clone(&demux);
                let messages: Vec<_> = (0..200)
                    .map(|i| make_received(&transport, key, &i.to_string()))
                    .collect();
                thread::spawn(move || {
                    for message in messages {
                        demux.on_message(message).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        let expected: Vec<_> = (0..200).map(|i| i.to_string()).collect();
        for key in ["A", "B", "C", "D"] {
            assert_eq!(payloads(demux.drain(key)), expected);
        }
    }

    #[test]
    fn concurrent_appends_to_one_key() {
        let transport = Arc::new(MockTransport::new());
        let demux = Arc::new(Demultiplexer::default());
        let producers: Vec<_> = (0..8)
            .map(|producer| {
                let demux = Arc::clone(&demux);
                let messages: Vec<_> = (0..200)
                    .map(|i| make_received(&transport, "K", &format!("{producer}-{i}")))
                    .collect();
                thread::spawn(move || {
                    for message in messages {
                        demux.on_message(message).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let drained = payloads(demux.drain("K"));
        assert_eq!(drained.len(), 8 * 200);
        for producer in 0..8 {
            let prefix = format!("{producer}-");
            let own: Vec<_> = drained
                .iter()
                .filter_map(|payload| payload.strip_prefix(&prefix))
                .map(|i| i.parse::<usize>().unwrap())
                .collect();
            assert_eq!(own, (0..200).collect::<Vec<_>>());
        }
    }
}
