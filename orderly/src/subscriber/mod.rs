//! A [Subscriber] listens on a subscription and regroups what it receives
//! by ordering key.
//!
//! The broker delivers messages for every key over a single stream. Each
//! listen session feeds that stream, in order, to a [MessageHandler]. The
//! default handler is the subscriber's own [Demultiplexer], which keeps one
//! ordered buffer per key for the application to [drain](Subscriber::drain).
//!
//! A one-off synchronous [pull](Subscriber::pull) fills the same buffers
//! from a single batch request.
//!
//! Example usage:
//!
//! ``` no_run
//! # use std::{sync::Arc, time::Duration};
//! # use orderly::{Subscriber, SubscriberConfig, Transport};
//! #
//! # async fn inner<T: Transport>(transport: Arc<T>) {
//! let subscriber = Subscriber::new(
//!     transport,
//!     SubscriberConfig {
//!         session_timeout: Some(Duration::from_secs(5)),
//!         ..Default::default()
//!     },
//! );
//!
//! // runs until the timeout elapses, acknowledging everything it buffers
//! subscriber.listen().await.unwrap();
//!
//! for message in subscriber.drain("A") {
//!     println!("{:?}", message.payload());
//! }
//! # }
//! ```

mod ack;
mod demux;
mod message;
mod pull;
mod session;

use std::sync::Arc;

pub use ack::{AckHandle, AckState};
pub use demux::{Demultiplexer, Drain, MessageHandler};
pub use message::ReceivedMessage;
pub use pull::PullReport;
pub use session::{ListenHandle, SessionOutcome, SessionReport};

use crate::{
    config::SubscriberConfig,
    subscriber::{pull::pull_batch, session::ListenSession},
    transport::Transport,
    Result,
};

pub struct Subscriber<T> {
    transport: Arc<T>,
    config: SubscriberConfig,
    demux: Arc<Demultiplexer>,
}

impl<T: Transport> Subscriber<T> {
    /// Create a new instance.
    pub fn new(transport: Arc<T>, config: SubscriberConfig) -> Self {
        let demux = Arc::new(Demultiplexer::new(config.per_key_capacity));
        Self {
            transport,
            config,
            demux,
        }
    }

    /// The per-key buffers filled by [listen](Self::listen). They outlive
    /// any single session.
    pub fn demultiplexer(&self) -> &Arc<Demultiplexer> {
        &self.demux
    }

    /// Start a listen session feeding this subscriber's [Demultiplexer].
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen(&self) -> ListenHandle {
        self.listen_with(Arc::clone(&self.demux))
    }

    /// Start a listen session feeding a custom handler.
    pub fn listen_with<H: MessageHandler>(&self, handler: Arc<H>) -> ListenHandle {
        let transport: Arc<dyn Transport> = self.transport.clone();
        ListenSession::spawn(transport, handler, self.config.clone())
    }

    /// Fetch at most `max_messages` in one request and feed them, in order,
    /// to this subscriber's [Demultiplexer]. Accepted messages are
    /// acknowledged together.
    ///
    /// Fails with [Error::Timeout](crate::Error::Timeout) when transient
    /// failures persist past
    /// [pull_deadline](SubscriberConfig::pull_deadline).
    pub async fn pull(&self, max_messages: usize) -> Result<PullReport> {
        self.pull_with(self.demux.as_ref(), max_messages).await
    }

    /// Pull one batch into a custom handler.
    pub async fn pull_with<H: MessageHandler>(
        &self,
        handler: &H,
        max_messages: usize,
    ) -> Result<PullReport> {
        let transport: Arc<dyn Transport> = self.transport.clone();
        pull_batch(&transport, handler, &self.config, max_messages).await
    }

    /// Take everything buffered for `key`. See [Demultiplexer::drain].
    pub fn drain(&self, key: &str) -> Drain {
        self.demux.drain(key)
    }
}
