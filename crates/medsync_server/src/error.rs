//! Error types for the record server.

use crate::store::StoreError;
use medsync_protocol::{ProtocolError, Status};
use medsync_resilience::{CircuitOpenError, Classify, ErrorClass};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the record server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Request body could not be decoded or is missing fields.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ProtocolError),

    /// No handler for this path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Request body exceeds the configured limit.
    #[error("request body of {size} bytes exceeds limit of {max}")]
    BodyTooLarge {
        /// Body size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// The business-rule validator rejected the payload.
    #[error("rejected by validator: {0}")]
    Rejected(String),

    /// The record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The record store's breaker is open.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            ServerError::InvalidRequest(_) => Status::BAD_REQUEST,
            ServerError::UnknownEndpoint(_) => Status::NOT_FOUND,
            ServerError::BodyTooLarge { .. } => Status::PAYLOAD_TOO_LARGE,
            ServerError::Rejected(_) => Status::UNPROCESSABLE,
            ServerError::Store(e) => match e {
                StoreError::Conflict { .. } => Status::CONFLICT,
                StoreError::NotFound(_) => Status::NOT_FOUND,
                StoreError::Validation(_) => Status::UNPROCESSABLE,
                StoreError::Unavailable(_) | StoreError::SerializationFailure(_) => {
                    Status::SERVICE_UNAVAILABLE
                }
                StoreError::Corrupted(_) => Status::INTERNAL,
                StoreError::Storage(inner) => match inner.class() {
                    ErrorClass::Retryable => Status::SERVICE_UNAVAILABLE,
                    ErrorClass::Conflict | ErrorClass::Fatal => Status::INTERNAL,
                },
            },
            ServerError::CircuitOpen(_) => Status::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => Status::INTERNAL,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status().code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status().code())
    }
}

impl Classify for ServerError {
    fn class(&self) -> ErrorClass {
        match self {
            ServerError::Store(e) => e.class(),
            ServerError::CircuitOpen(e) => e.class(),
            ServerError::InvalidRequest(_)
            | ServerError::UnknownEndpoint(_)
            | ServerError::BodyTooLarge { .. }
            | ServerError::Rejected(_) => ErrorClass::Fatal,
            ServerError::Internal(_) => ErrorClass::Retryable,
        }
    }
}
