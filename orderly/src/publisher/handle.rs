use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project::pin_project;
use tokio::{sync::oneshot, time::timeout};

use crate::{error::Error, message::MessageId, Result};

/// Sending half of a [PublishHandle].
pub(crate) type Completion = oneshot::Sender<Result<MessageId>>;

/// Resolves once the publish of one specific message completes or fails.
///
/// Dropping the handle does not cancel the publish.
#[pin_project]
#[derive(Debug)]
pub struct PublishHandle {
    #[pin]
    rx: oneshot::Receiver<Result<MessageId>>,
}

impl PublishHandle {
    pub(crate) fn pair() -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, tx)
    }

    /// A handle which has already resolved.
    pub(crate) fn ready(result: Result<MessageId>) -> Self {
        let (handle, tx) = Self::pair();
        // the receiver is held by `handle`
        let _ = tx.send(result);
        handle
    }

    /// Wait for the outcome, giving up with [Error::Timeout] after
    /// `duration`.
    pub async fn result_timeout(self, duration: Duration) -> Result<MessageId> {
        timeout(duration, self).await.unwrap_or(Err(Error::Timeout))
    }
}

impl Future for PublishHandle {
    type Output = Result<MessageId>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .rx
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Closed)))
    }
}

/// Hand a result to a waiting [PublishHandle], if there still is one.
pub(crate) fn resolve(completion: Option<Completion>, result: Result<MessageId>) {
    if let Some(tx) = completion {
        // the caller is allowed to drop its handle
        let _ = tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves() {
        let (handle, tx) = PublishHandle::pair();
        resolve(Some(tx), Ok(MessageId("1".into())));
        assert_eq!(handle.await, Ok(MessageId("1".into())));
    }

    #[tokio::test]
    async fn dropped_completion_is_closed() {
        let (handle, tx) = PublishHandle::pair();
        drop(tx);
        assert_eq!(handle.await, Err(Error::Closed));
    }

    #[tokio::test]
    async fn times_out() {
        let (handle, _tx) = PublishHandle::pair();
        assert_eq!(
            handle.result_timeout(Duration::from_millis(10)).await,
            Err(Error::Timeout)
        );
    }
}
