//! # MedSync Protocol
//!
//! Types shared by the record server and the offline sync client.
//!
//! This crate provides:
//! - [`RecordId`] and [`VersionedRecord`], the optimistic-concurrency unit
//! - [`MutationRequest`] / [`MutationResponse`] wire messages with an HTTP
//!   [`Status`] vocabulary
//! - [`Conflict`] and [`Resolution`] for version mismatches
//! - CBOR encoding/decoding via `ciborium`
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod conflict;
mod error;
mod messages;
mod record;

pub use codec::{from_cbor, to_cbor};
pub use conflict::{Conflict, ConflictPolicy, Resolution, Snapshot};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{endpoints, FetchRequest, HttpResponse, MutationRequest, MutationResponse, Status};
pub use record::{now_ms, MutationKind, RecordId, VersionedRecord, INITIAL_VERSION, UNVERSIONED};
