//! Every received message carries an [AckHandle]. Acknowledging is
//! idempotent: only the first [ack](AckHandle::ack) issues an RPC, later
//! calls succeed without doing anything.
//!
//! Nothing here retries. A failed acknowledgement is reported and the
//! broker's redelivery takes care of the rest.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::{trace, warn};

use crate::{error::Error, message::AckId, transport::Transport, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Unacked,
    Acked,
}

/// Shared handle to the acknowledgement state of one delivery.
#[derive(Clone)]
pub struct AckHandle {
    inner: Arc<AckInner>,
}

struct AckInner {
    ack_id: AckId,
    acked: AtomicBool,
    transport: Arc<dyn Transport>,
}

impl AckHandle {
    pub(crate) fn new(ack_id: AckId, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(AckInner {
                ack_id,
                acked: AtomicBool::new(false),
                transport,
            }),
        }
    }

    /// Mark the delivery acknowledged without sending anything. Returns
    /// whether this call made the transition, in which case the caller
    /// owns sending the acknowledgement.
    pub(crate) fn claim(&self) -> bool {
        !self.inner.acked.swap(true, Ordering::AcqRel)
    }

    pub fn ack_id(&self) -> &AckId {
        &self.inner.ack_id
    }

    pub fn state(&self) -> AckState {
        if self.inner.acked.load(Ordering::Acquire) {
            AckState::Acked
        } else {
            AckState::Unacked
        }
    }

    /// Acknowledge the delivery. A failure leaves the state [AckState::Acked];
    /// the broker will redeliver the message as a fresh delivery.
    pub async fn ack(&self) -> Result<()> {
        if !self.claim() {
            trace!("Ack {} already sent", self.inner.ack_id);
            return Ok(());
        }
        self.inner
            .transport
            .acknowledge(&self.inner.ack_id)
            .await
            .map_err(|err| {
                warn!("Failed to acknowledge {}: {}", self.inner.ack_id, err);
                Error::AckFailed(err)
            })
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("ack_id", &self.inner.ack_id)
            .field("state", &self.state())
            .finish()
    }
}
