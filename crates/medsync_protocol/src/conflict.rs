//! Version conflicts and their resolutions.

use crate::codec::{from_cbor, to_cbor};
use crate::error::ProtocolResult;
use crate::record::{MutationKind, RecordId, VersionedRecord, UNVERSIONED};
use serde::{Deserialize, Serialize};

/// One side of a conflict: a version and the payload at that version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Version this side holds. [`UNVERSIONED`] for a local create.
    pub version: u64,
    /// Payload bytes. `None` for a local delete.
    pub payload: Option<Vec<u8>>,
}

/// A rejected write: the client's expected version is not the server's.
///
/// Produced when the server answers `409`. `local` is what the queued
/// mutation attempted, `remote` is what the server currently stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Record the conflict is about.
    pub record_id: RecordId,
    /// Queue sequence of the rejected mutation.
    pub sequence: u64,
    /// Kind of the rejected mutation.
    pub kind: MutationKind,
    /// Client side.
    pub local: Snapshot,
    /// Server side.
    pub remote: Snapshot,
}

impl Conflict {
    /// Builds a conflict from a rejected mutation and the server's record.
    pub fn new(
        sequence: u64,
        kind: MutationKind,
        expected_version: Option<u64>,
        local_payload: Option<Vec<u8>>,
        remote: VersionedRecord,
    ) -> Self {
        Self {
            record_id: remote.id,
            sequence,
            kind,
            local: Snapshot {
                version: expected_version.unwrap_or(UNVERSIONED),
                payload: local_payload,
            },
            remote: Snapshot {
                version: remote.version,
                payload: Some(remote.payload),
            },
        }
    }

    /// Returns true if the rejected mutation was a create of an id the
    /// server already holds.
    pub fn is_create_conflict(&self) -> bool {
        self.kind == MutationKind::Create
    }

    /// Returns true if the rejected mutation was a delete.
    pub fn is_delete_conflict(&self) -> bool {
        self.kind == MutationKind::Delete
    }

    /// Number of server-side versions the client missed.
    pub fn version_gap(&self) -> u64 {
        self.remote.version.saturating_sub(self.local.version)
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Outcome chosen for a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Re-submit the local payload on top of the server's version.
    KeepLocal,
    /// Drop the queued mutation and adopt the server's record.
    KeepRemote,
    /// Re-submit a caller-supplied combined payload on top of the server's
    /// version.
    Merged(Vec<u8>),
}

impl Resolution {
    /// Returns a short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::KeepLocal => "keep-local",
            Resolution::KeepRemote => "keep-remote",
            Resolution::Merged(_) => "merged",
        }
    }
}

/// Unattended conflict policy.
///
/// Must be chosen explicitly; there is no implicit default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// The server's record wins.
    KeepRemote,
    /// The queued local mutation overwrites the server.
    KeepLocal,
}

impl ConflictPolicy {
    /// Returns the resolution this policy applies to every conflict.
    pub fn resolution(&self) -> Resolution {
        match self {
            ConflictPolicy::KeepRemote => Resolution::KeepRemote,
            ConflictPolicy::KeepLocal => Resolution::KeepLocal,
        }
    }
}
