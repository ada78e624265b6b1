//! Versioned records and mutation kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Version of a freshly created record.
pub const INITIAL_VERSION: u64 = 1;

/// Version placeholder for a record the client has never seen on the server
/// (the local side of a create conflict).
pub const UNVERSIONED: u64 = 0;

/// Opaque identity of a record.
///
/// Ids are 128-bit UUIDs generated on whichever side creates the record, so
/// an offline client can create, queue and later sync a record without a
/// server round-trip.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates an id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of mutation carried by a request or queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    /// Create a record at version 1.
    Create,
    /// Replace the payload of an existing record.
    Update,
    /// Delete a record (terminal).
    Delete,
}

impl MutationKind {
    /// Returns a lowercase name for logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutable domain entity under optimistic concurrency control.
///
/// `payload` holds the domain fields (for example an encoded outcome
/// measurement) and is never interpreted by the sync core. `version` starts
/// at [`INITIAL_VERSION`] and every accepted mutation raises it by exactly
/// one. `updated_at_ms` is stamped by the store, never by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Record identity.
    pub id: RecordId,
    /// Domain payload bytes.
    pub payload: Vec<u8>,
    /// Current version.
    pub version: u64,
    /// Last mutation time in milliseconds since the Unix epoch.
    pub updated_at_ms: u64,
}

impl VersionedRecord {
    /// Creates a record at the initial version.
    pub fn new(id: RecordId, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload,
            version: INITIAL_VERSION,
            updated_at_ms: now_ms(),
        }
    }

    /// Returns the record after one accepted mutation with `payload`.
    #[must_use]
    pub fn next(&self, payload: Vec<u8>) -> Self {
        Self {
            id: self.id,
            payload,
            version: self.version + 1,
            updated_at_ms: now_ms().max(self.updated_at_ms),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
