//! Codec error types.

use thiserror::Error;

/// Errors produced while decoding relay wire frames.
///
/// A codec error is always recoverable at the session level: the offending
/// frame is dropped and the socket stays open.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame was not valid JSON, or did not match the expected shape.
    #[error("malformed JSON frame: {0}")]
    MalformedJson(String),

    /// A required field was absent from an otherwise well-formed frame.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The `type` discriminator named a message this relay does not know.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}
