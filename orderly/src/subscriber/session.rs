//! A listen session drives one streaming pull: it hands each message to a
//! [MessageHandler] in stream order and acknowledges the ones it accepts.
//!
//! The session ends when its timeout elapses, when it is cancelled, or when
//! the stream ends or fails. In every case it drops the stream and waits
//! for outstanding acknowledgements before resolving.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::StreamExt;
use pin_project::{pin_project, pinned_drop};
use tokio::{
    select,
    task::{JoinHandle, JoinSet},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::SubscriberConfig,
    error::Error,
    message::InboundMessage,
    subscriber::{demux::MessageHandler, message::ReceivedMessage},
    transport::Transport,
    Result,
};

/// Why a session stopped. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The session timeout elapsed.
    TimedOut,
    /// [ListenHandle::cancel] was called, or the handle was dropped.
    Cancelled,
    /// The transport ended the stream.
    Closed,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    /// Messages taken off the stream.
    pub received: usize,
    /// Messages the handler declined.
    pub rejected: usize,
    /// Acknowledgements which failed. The broker will redeliver these.
    pub ack_failures: usize,
}

/// Handle to a running listen session. Resolves with the session's report.
///
/// Dropping the handle cancels the session.
#[pin_project(PinnedDrop)]
pub struct ListenHandle {
    cancel: CancellationToken,
    #[pin]
    join: JoinHandle<Result<SessionReport>>,
}

impl ListenHandle {
    /// Ask the session to stop. Messages already handed to the handler are
    /// kept; the session still waits for outstanding acknowledgements.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the report, giving up with [Error::Timeout] after
    /// `duration`. Giving up drops the handle, which cancels the session.
    pub async fn result_timeout(self, duration: Duration) -> Result<SessionReport> {
        timeout(duration, self).await.unwrap_or(Err(Error::Timeout))
    }

    /// Cancel the session and wait for it to wind down.
    pub async fn shutdown(self) -> Result<SessionReport> {
        self.cancel();
        self.await
    }
}

impl Future for ListenHandle {
    type Output = Result<SessionReport>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().join.poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| {
                error!("Listen session task failed: {}", err);
                Err(Error::Closed)
            })
        })
    }
}

#[pinned_drop]
impl PinnedDrop for ListenHandle {
    fn drop(self: Pin<&mut Self>) {
        self.cancel.cancel();
    }
}

pub(super) struct ListenSession<H> {
    transport: Arc<dyn Transport>,
    handler: Arc<H>,
    config: SubscriberConfig,
    cancel: CancellationToken,
    received: usize,
    rejected: usize,
    ack_failures: usize,
}

impl<H: MessageHandler> ListenSession<H> {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        handler: Arc<H>,
        config: SubscriberConfig,
    ) -> ListenHandle {
        let cancel = CancellationToken::new();
        let session = Self {
            transport,
            handler,
            config,
            cancel: cancel.clone(),
            received: 0,
            rejected: 0,
            ack_failures: 0,
        };
        let join = tokio::spawn(session.run());
        ListenHandle { cancel, join }
    }

    async fn run(mut self) -> Result<SessionReport> {
        let mut stream = self.transport.listen()?;
        info!(
            "Listen session started (timeout {:?})",
            self.config.session_timeout
        );

        let session_timeout = self.config.session_timeout;
        let deadline = async move {
            match session_timeout {
                Some(duration) => sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut acks = JoinSet::new();
        let cancel = self.cancel.clone();
        let ended = loop {
            select! {
                biased;
                _ = cancel.cancelled() => break Ok(SessionOutcome::Cancelled),
                _ = &mut deadline => break Ok(SessionOutcome::TimedOut),
                Some(acked) = acks.join_next(), if !acks.is_empty() => self.record_ack(acked),
                next = stream.next() => match next {
                    Some(Ok(inbound)) => self.dispatch(inbound, &mut acks),
                    Some(Err(err)) => {
                        error!("Listen stream failed: {}", err);
                        break Err(Error::Transport(err));
                    }
                    None => break Ok(SessionOutcome::Closed),
                },
            }
        };

        // graceful shutdown: stop pulling, then let in-flight acks finish
        drop(stream);
        while let Some(acked) = acks.join_next().await {
            self.record_ack(acked);
        }

        let outcome = ended?;
        info!(
            "Listen session ended ({:?}): {} received, {} rejected, {} ack failure(s)",
            outcome, self.received, self.rejected, self.ack_failures
        );
        Ok(SessionReport {
            outcome,
            received: self.received,
            rejected: self.rejected,
            ack_failures: self.ack_failures,
        })
    }

    fn dispatch(&mut self, inbound: InboundMessage, acks: &mut JoinSet<bool>) {
        self.received += 1;
        let received = ReceivedMessage::new(inbound, Arc::clone(&self.transport));
        let ack = received.ack_handle().clone();
        let message_id = received.message_id.clone();
        match self.handler.on_message(received) {
            Ok(()) if self.config.auto_ack => {
                acks.spawn(async move { ack.ack().await.is_ok() });
            }
            Ok(()) => {}
            Err(err) => {
                self.rejected += 1;
                warn!("Declined message {}, leaving it for redelivery: {}", message_id, err);
            }
        }
    }

    fn record_ack(&mut self, acked: std::result::Result<bool, tokio::task::JoinError>) {
        match acked {
            Ok(true) => {}
            Ok(false) => self.ack_failures += 1,
            Err(err) => {
                error!("Ack task failed: {}", err);
                self.ack_failures += 1;
            }
        }
    }
}
