//! The boundary with the broker client. Connections and the wire protocol
//! live behind [Transport]; this crate only needs the calls below.

#[cfg(any(test, feature = "mocks"))]
pub mod mock;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use crate::error::TransportError;
use crate::message::{AckId, InboundMessage, Message, MessageId};

/// A live streaming pull. Dropping it asks the transport to stop.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, TransportError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a single message, resolving with the id the broker assigned.
    async fn send(&self, message: &Message) -> Result<MessageId, TransportError>;

    /// Open a streaming pull on the configured subscription.
    fn listen(&self) -> Result<InboundStream, TransportError>;

    /// Fetch at most `max_messages` deliveries in one request. The broker
    /// may return fewer, or none.
    async fn pull(&self, max_messages: usize) -> Result<Vec<InboundMessage>, TransportError>;

    /// Tell the broker a delivery was processed.
    async fn acknowledge(&self, ack_id: &AckId) -> Result<(), TransportError>;

    /// Acknowledge several deliveries in one request.
    async fn acknowledge_batch(&self, ack_ids: &[AckId]) -> Result<(), TransportError> {
        for ack_id in ack_ids {
            self.acknowledge(ack_id).await?;
        }
        Ok(())
    }
}
