//! # MedSync Server
//!
//! Optimistic-concurrency record server for MedSync.
//!
//! This crate provides:
//! - The [`VersionedStore`] contract with in-memory and durable stores
//! - Record endpoints (create, conditional update, conditional delete, get)
//! - A circuit breaker around every store call
//! - A [`RecordValidator`] hook for business rules
//!
//! # Concurrency
//!
//! The store is the only arbiter of concurrent writes. A conditional update
//! compares the stored version with the client's expected version and
//! writes in one atomic step; the loser of a race receives `409 Conflict`
//! with the winner's record and resolves it on the client. Handlers hold no
//! application-level locks.
//!
//! # Status codes
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 200 / 201 | Accepted |
//! | 400 | Malformed request |
//! | 404 | Unknown or deleted record |
//! | 409 | Version conflict, body carries the current record |
//! | 413 | Body too large |
//! | 422 | Rejected by the validator |
//! | 503 | Store unavailable or its breaker is open |

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod durable;
mod error;
mod handler;
mod memory;
mod server;
mod store;
mod validate;

pub use config::ServerConfig;
pub use durable::DurableStore;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use memory::InMemoryStore;
pub use server::RecordServer;
pub use store::{StoreError, StoreResult, VersionedStore};
pub use validate::{AcceptAll, RecordValidator};
