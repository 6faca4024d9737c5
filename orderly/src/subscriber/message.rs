use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use crate::{
    message::{InboundMessage, Message, MessageId, OrderingKey},
    subscriber::ack::{AckHandle, AckState},
    transport::Transport,
    Result,
};

/// A delivered message along with the means to acknowledge it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// according to our process (in nano-seconds)
    pub recv_ts: i64,
    pub message_id: MessageId,
    /// according to the broker (in nano-seconds)
    pub publish_time: i64,
    pub delivery_attempt: Option<u32>,
    pub message: Message,
    ack: AckHandle,
}

impl ReceivedMessage {
    pub(crate) fn new(inbound: InboundMessage, transport: Arc<dyn Transport>) -> Self {
        ReceivedMessage {
            recv_ts: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            message_id: inbound.message_id,
            publish_time: inbound.publish_time,
            delivery_attempt: inbound.delivery_attempt,
            message: inbound.message,
            ack: AckHandle::new(inbound.ack_id, transport),
        }
    }

    pub fn ordering_key(&self) -> &OrderingKey {
        self.message.ordering_key()
    }

    pub fn payload(&self) -> &Bytes {
        self.message.payload()
    }

    pub fn ack_handle(&self) -> &AckHandle {
        &self.ack
    }

    pub fn ack_state(&self) -> AckState {
        self.ack.state()
    }

    /// See [AckHandle::ack].
    pub async fn ack(&self) -> Result<()> {
        self.ack.ack().await
    }
}
