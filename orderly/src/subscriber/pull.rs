//! A synchronous pull fetches a single batch, hands it to a
//! [MessageHandler] in broker order and acknowledges everything the handler
//! accepted in one request.
//!
//! Transient transport failures are retried until the configured deadline.

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::{
    config::SubscriberConfig,
    constants::PULL_RETRY_BACKOFF,
    error::{Error, TransportError},
    message::InboundMessage,
    subscriber::{demux::MessageHandler, message::ReceivedMessage},
    transport::Transport,
    Result,
};

/// Summary of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Messages the broker returned. Never more than requested.
    pub received: usize,
    /// Messages the handler declined.
    pub rejected: usize,
    /// Acknowledgements which failed. The broker will redeliver these.
    pub ack_failures: usize,
}

pub(super) async fn pull_batch<H: MessageHandler + ?Sized>(
    transport: &Arc<dyn Transport>,
    handler: &H,
    config: &SubscriberConfig,
    max_messages: usize,
) -> Result<PullReport> {
    let mut report = PullReport::default();
    if max_messages == 0 {
        return Ok(report);
    }
    let batch = fetch(transport.as_ref(), max_messages, config.pull_deadline).await?;
    report.received = batch.len();

    let mut ack_ids = Vec::with_capacity(batch.len());
    for inbound in batch {
        let received = ReceivedMessage::new(inbound, Arc::clone(transport));
        let ack = received.ack_handle().clone();
        let message_id = received.message_id.clone();
        match handler.on_message(received) {
            // a handler may have acknowledged the message itself
            Ok(()) if config.auto_ack && ack.claim() => ack_ids.push(ack.ack_id().clone()),
            Ok(()) => {}
            Err(err) => {
                report.rejected += 1;
                warn!(
                    "Declined message {}, leaving it for redelivery: {}",
                    message_id, err
                );
            }
        }
    }

    if !ack_ids.is_empty() {
        if let Err(err) = transport.acknowledge_batch(&ack_ids).await {
            warn!("Failed to acknowledge {} message(s): {}", ack_ids.len(), err);
            report.ack_failures = ack_ids.len();
        }
    }
    info!(
        "Pulled {} of at most {} message(s), {} rejected, {} ack failure(s)",
        report.received, max_messages, report.rejected, report.ack_failures
    );
    Ok(report)
}

async fn fetch(
    transport: &dyn Transport,
    max_messages: usize,
    deadline: Duration,
) -> Result<Vec<InboundMessage>> {
    let started = Instant::now();
    loop {
        let remaining = match deadline.checked_sub(started.elapsed()) {
            Some(remaining) => remaining,
            None => {
                warn!("Giving up on pull after {:?}", deadline);
                return Err(Error::Timeout);
            }
        };
        match timeout(remaining, transport.pull(max_messages)).await {
            Ok(Ok(batch)) => return Ok(batch),
            Ok(Err(TransportError::Unavailable(reason))) => {
                debug!("Pull failed, retrying: {}", reason);
                sleep(PULL_RETRY_BACKOFF.min(remaining)).await;
            }
            Ok(Err(err)) => return Err(Error::Transport(err)),
            Err(_) => {
                warn!("Giving up on pull after {:?}", deadline);
                return Err(Error::Timeout);
            }
        }
    }
}
