//! Wire messages for record mutations.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{MutationKind, RecordId, VersionedRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Endpoint paths served by the record server.
pub mod endpoints {
    /// Create a record.
    pub const CREATE: &str = "/records/create";
    /// Conditionally update a record.
    pub const UPDATE: &str = "/records/update";
    /// Conditionally delete a record.
    pub const DELETE: &str = "/records/delete";
    /// Fetch the current version of a record.
    pub const GET: &str = "/records/get";
}

/// HTTP status code carried in responses.
///
/// Client and server share this vocabulary: 200/201 success, 404 not found,
/// 409 version conflict, 400/422 validation, 503/504 transient.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(u16);

impl Status {
    /// 200 OK.
    pub const OK: Status = Status(200);
    /// 201 Created.
    pub const CREATED: Status = Status(201);
    /// 400 Bad Request.
    pub const BAD_REQUEST: Status = Status(400);
    /// 404 Not Found.
    pub const NOT_FOUND: Status = Status(404);
    /// 408 Request Timeout.
    pub const REQUEST_TIMEOUT: Status = Status(408);
    /// 409 Conflict.
    pub const CONFLICT: Status = Status(409);
    /// 413 Payload Too Large.
    pub const PAYLOAD_TOO_LARGE: Status = Status(413);
    /// 422 Unprocessable Entity.
    pub const UNPROCESSABLE: Status = Status(422);
    /// 500 Internal Server Error.
    pub const INTERNAL: Status = Status(500);
    /// 503 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: Status = Status(503);
    /// 504 Gateway Timeout.
    pub const GATEWAY_TIMEOUT: Status = Status(504);

    /// Wraps a raw status code.
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the raw code.
    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Returns true for 2xx codes.
    pub const fn is_success(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({})", self.0)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw HTTP response: status code and CBOR body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// A create, update or delete submitted to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Mutation kind.
    pub kind: MutationKind,
    /// Target record.
    pub record_id: RecordId,
    /// New payload (create and update).
    pub payload: Option<Vec<u8>>,
    /// Version the client believes is current (update and delete).
    pub expected_version: Option<u64>,
}

impl MutationRequest {
    /// Creates a create request for a client-generated id.
    pub fn create(record_id: RecordId, payload: Vec<u8>) -> Self {
        Self {
            kind: MutationKind::Create,
            record_id,
            payload: Some(payload),
            expected_version: None,
        }
    }

    /// Creates a conditional update request.
    pub fn update(record_id: RecordId, expected_version: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: MutationKind::Update,
            record_id,
            payload: Some(payload),
            expected_version: Some(expected_version),
        }
    }

    /// Creates a conditional delete request.
    pub fn delete(record_id: RecordId, expected_version: u64) -> Self {
        Self {
            kind: MutationKind::Delete,
            record_id,
            payload: None,
            expected_version: Some(expected_version),
        }
    }

    /// Returns the endpoint this request is posted to.
    pub fn endpoint(&self) -> &'static str {
        match self.kind {
            MutationKind::Create => endpoints::CREATE,
            MutationKind::Update => endpoints::UPDATE,
            MutationKind::Delete => endpoints::DELETE,
        }
    }

    /// Checks that the fields required by `kind` are present.
    pub fn validate(&self) -> ProtocolResult<()> {
        match self.kind {
            MutationKind::Create if self.payload.is_none() => Err(ProtocolError::InvalidRequest(
                "create requires a payload".into(),
            )),
            MutationKind::Update if self.payload.is_none() => Err(ProtocolError::InvalidRequest(
                "update requires a payload".into(),
            )),
            MutationKind::Update | MutationKind::Delete if self.expected_version.is_none() => {
                Err(ProtocolError::InvalidRequest(format!(
                    "{} requires an expected version",
                    self.kind
                )))
            }
            _ => Ok(()),
        }
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

/// Request for the current state of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Record to fetch.
    pub record_id: RecordId,
}

impl FetchRequest {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Server reply to a mutation or fetch.
///
/// On success `record` is the stored record with its new version (absent
/// for deletes). On `409` it is the server's current record so the client
/// can build a [`crate::Conflict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Status code.
    pub status: Status,
    /// Stored or current record.
    pub record: Option<VersionedRecord>,
    /// Error message for non-2xx statuses.
    pub error: Option<String>,
}

impl MutationResponse {
    /// 200 with the stored record.
    pub fn ok(record: VersionedRecord) -> Self {
        Self {
            status: Status::OK,
            record: Some(record),
            error: None,
        }
    }

    /// 201 with the created record.
    pub fn created(record: VersionedRecord) -> Self {
        Self {
            status: Status::CREATED,
            record: Some(record),
            error: None,
        }
    }

    /// 200 without a body record (delete).
    pub fn deleted() -> Self {
        Self {
            status: Status::OK,
            record: None,
            error: None,
        }
    }

    /// 409 carrying the server's current record.
    pub fn conflict(current: VersionedRecord) -> Self {
        Self {
            status: Status::CONFLICT,
            error: Some(format!(
                "version conflict on {}: server is at version {}",
                current.id, current.version
            )),
            record: Some(current),
        }
    }

    /// Any error status with a message.
    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            record: None,
            error: Some(message.into()),
        }
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
