//! # Orderly
//!
//! Orderly is the ordering layer of a publish/subscribe client. It sits
//! between your application and a broker [Transport] and guarantees that
//! messages sharing an ordering key are published, and consumed, in the
//! order they were submitted.
//!
//! ## Publishing
//!
//! Sends happen concurrently, and any one of them can fail. An
//! [OrderedPublisher] lets only one send per ordering key be in flight,
//! while different keys proceed independently. When a send fails, its key
//! is _latched_: the failed message and everything behind it stay queued,
//! and their handles resolve with [Error::SendFailed] or [Error::Blocked],
//! until the application calls
//! [resume_publish](OrderedPublisher::resume_publish) or
//! [clear_pending](OrderedPublisher::clear_pending).
//!
//! ``` no_run
//! use std::sync::Arc;
//! use orderly::{Error, Message, OrderedPublisher, PublisherConfig, Transport};
//!
//! # async fn inner<T: Transport>(transport: Arc<T>) {
//! let publisher = OrderedPublisher::new(transport, PublisherConfig::default());
//!
//! let handles: Vec<_> = ["m1", "m2", "m3"]
//!     .into_iter()
//!     .map(|payload| publisher.publish(Message::new(payload).with_ordering_key("A")))
//!     .collect();
//!
//! for handle in handles {
//!     match handle.await {
//!         Ok(id) => println!("published {id}"),
//!         Err(Error::SendFailed(cause)) => println!("latched: {cause}"),
//!         Err(Error::Blocked(key)) => println!("waiting on {key}"),
//!         Err(other) => println!("{other}"),
//!     }
//! }
//!
//! // retry the failed message, then everything queued behind it
//! for handle in publisher.resume_publish("A") {
//!     handle.await.unwrap();
//! }
//! # }
//! ```
//!
//! ## Subscribing
//!
//! A [Subscriber] runs listen sessions over the transport's streaming pull.
//! Received messages are grouped by ordering key in a [Demultiplexer] and
//! acknowledged; the application drains each key's buffer independently.
//! Messages which aren't acknowledged are redelivered by the broker.
//! [Subscriber::pull] fetches a single batch into the same buffers instead.
//!
//! ## Crate feature flags
//!
//! - `mocks`: an in-memory [MockTransport](transport::mock::MockTransport)
//! for tests and demos.

pub(crate) mod constants;

pub mod config;
pub mod encoding;
mod error;
mod message;
pub mod publisher;
pub mod subscriber;
pub mod transport;
mod util;

pub use config::{PublisherConfig, SubscriberConfig};
pub use error::{Error, Result, TransportError};
pub use message::{AckId, InboundMessage, Message, MessageId, OrderingKey};
pub use publisher::{OrderedPublisher, PublishHandle, ResumeMode};
pub use subscriber::{
    AckHandle, AckState, Demultiplexer, ListenHandle, MessageHandler, PullReport, ReceivedMessage,
    SessionOutcome, SessionReport, Subscriber,
};
pub use transport::Transport;
