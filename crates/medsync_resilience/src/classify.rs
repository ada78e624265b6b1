//! Error classification.
//!
//! Every failure that crosses a retry or circuit boundary is mapped to one of
//! three classes. The mapping is a total function over each error type's
//! variants, so adding a variant without classifying it fails to compile.

use medsync_protocol::ProtocolError;
use medsync_storage::StorageError;
use std::fmt;

/// Class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Transient; the same call may succeed later.
    Retryable,
    /// The writer's expected version is stale. Never retried blindly.
    Conflict,
    /// Retrying the same call cannot succeed.
    Fatal,
}

impl ErrorClass {
    /// Returns a lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Retryable => "retryable",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error that knows its [`ErrorClass`].
pub trait Classify {
    /// Returns the class of this error.
    fn class(&self) -> ErrorClass;
}

impl<T: Classify + ?Sized> Classify for &T {
    fn class(&self) -> ErrorClass {
        (**self).class()
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn class(&self) -> ErrorClass {
        (**self).class()
    }
}

/// Pure classification entry points.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classifies a typed error.
    pub fn classify<E: Classify + ?Sized>(error: &E) -> ErrorClass {
        error.class()
    }

    /// Classifies an HTTP status code. Returns `None` for 2xx.
    ///
    /// | Status | Class |
    /// |--------|-------|
    /// | 409 | Conflict |
    /// | 408, 429, 5xx | Retryable |
    /// | other 4xx | Fatal |
    ///
    /// Codes outside 2xx/4xx/5xx are treated as Fatal protocol violations.
    pub fn classify_status(status: u16) -> Option<ErrorClass> {
        match status {
            200..=299 => None,
            409 => Some(ErrorClass::Conflict),
            408 | 429 => Some(ErrorClass::Retryable),
            400..=499 => Some(ErrorClass::Fatal),
            500..=599 => Some(ErrorClass::Retryable),
            _ => Some(ErrorClass::Fatal),
        }
    }
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            // Any I/O failure of the backing medium is treated as an outage.
            StorageError::Io(_) | StorageError::Unavailable(_) | StorageError::Locked(_) => {
                ErrorClass::Retryable
            }
            StorageError::ReadPastEnd { .. } | StorageError::Corrupted(_) => ErrorClass::Fatal,
        }
    }
}

impl Classify for ProtocolError {
    fn class(&self) -> ErrorClass {
        match self {
            ProtocolError::Encode(_) | ProtocolError::Decode(_) | ProtocolError::InvalidRequest(_) => {
                ErrorClass::Fatal
            }
        }
    }
}
