//! Topics bound to a schema tag every message with the encoding of its
//! payload. This module turns that attribute into a closed set of variants
//! and splits a payload accordingly, leaving schema-aware decoding of the
//! binary form to the application.

use bytes::Bytes;
use thiserror::Error;

use crate::{constants::ENCODING_ATTRIBUTE, message::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Binary,
    Json,
    Unspecified,
}

impl Encoding {
    pub fn of(message: &Message) -> Self {
        match message.attribute(ENCODING_ATTRIBUTE) {
            Some("BINARY") => Encoding::Binary,
            Some("JSON") => Encoding::Json,
            _ => Encoding::Unspecified,
        }
    }

    fn tag(self) -> Option<&'static str> {
        match self {
            Encoding::Binary => Some("BINARY"),
            Encoding::Json => Some("JSON"),
            Encoding::Unspecified => None,
        }
    }
}

impl Message {
    /// Tag the payload with `encoding`. [Encoding::Unspecified] removes any
    /// existing tag.
    pub fn with_encoding(self, encoding: Encoding) -> Self {
        match encoding.tag() {
            Some(tag) => self.with_attribute(ENCODING_ATTRIBUTE, tag),
            None => self.without_attribute(ENCODING_ATTRIBUTE),
        }
    }
}

/// A payload tagged with its encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Schema-encoded bytes, untouched.
    Binary(Bytes),
    Json(serde_json::Value),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no encoding specified")]
    Unspecified,
    #[error("invalid json payload")]
    Json(#[from] serde_json::Error),
}

pub fn decode(message: &Message) -> Result<Payload, DecodeError> {
    match Encoding::of(message) {
        Encoding::Binary => Ok(Payload::Binary(message.payload().clone())),
        Encoding::Json => Ok(Payload::Json(serde_json::from_slice(message.payload())?)),
        Encoding::Unspecified => Err(DecodeError::Unspecified),
    }
}
