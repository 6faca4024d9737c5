use bytes::Bytes;
use orderly::{encoding::Encoding, Message};
use rand::prelude::*;
use serde_json::json;

pub const KEYS: [&str; 3] = ["A", "B", "C"];

/// A stream of small JSON quotes, each ordered under a random key.
#[derive(Debug, Default)]
pub struct QuoteGenerator {
    counters: [u32; 3],
}

impl QuoteGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// For demonstration purposes, generate a random quote. Each key's
    /// quotes carry a `seq` counting up from 1.
    pub fn next_message(&mut self) -> Message {
        let mut rng = thread_rng();
        let index = rng.gen_range(0..KEYS.len());
        self.counters[index] += 1;
        let payload = json!({
            "key": KEYS[index],
            "seq": self.counters[index],
            "price": rng.gen_range(9_000..11_000),
        });
        Message::new(Bytes::from(payload.to_string()))
            .with_ordering_key(KEYS[index])
            .with_encoding(Encoding::Json)
    }
}
