use thiserror::Error;

use crate::message::OrderingKey;

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [Transport](crate::transport::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("rejected by broker: {0}")]
    Rejected(String),
    #[error("transport closed")]
    Closed,
}

/// Everything which can go wrong publishing or receiving ordered messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The transport could not deliver a send. Latches the ordering key.
    #[error("send failed: {0}")]
    SendFailed(TransportError),
    /// An earlier publish on this key failed and the key has not been
    /// resumed.
    #[error("ordering key `{0}` is blocked by an earlier failed publish")]
    Blocked(OrderingKey),
    /// The acknowledge RPC failed. The broker will redeliver the message.
    #[error("acknowledge failed: {0}")]
    AckFailed(TransportError),
    /// A caller-side wait elapsed.
    #[error("timed out")]
    Timeout,
    /// A keyed publish was attempted on a publisher without ordering.
    #[error("message ordering is not enabled, cannot publish with key `{0}`")]
    OrderingDisabled(OrderingKey),
    /// The receive buffer for this key is at capacity.
    #[error("receive buffer for ordering key `{0}` is full")]
    BufferFull(OrderingKey),
    /// The listen stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The publisher or session went away before producing a result.
    #[error("closed before completion")]
    Closed,
}
