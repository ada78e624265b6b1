//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A value could not be encoded to CBOR.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded from CBOR.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// A message is structurally valid CBOR but semantically malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
