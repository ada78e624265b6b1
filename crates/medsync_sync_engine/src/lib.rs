//! # MedSync Sync Engine
//!
//! Offline-first client sync for MedSync.
//!
//! This crate provides:
//! - A durable [`MutationQueue`] holding local writes until the server
//!   accepts them
//! - The [`Replica`] write path: local writes never wait for the network
//! - A [`SyncEngine`] draining the queue through classified retry and the
//!   sync server's circuit breaker
//! - Conflict resolution through an explicit [`ConflictResolver`]
//! - A [`RecordTransport`] seam with HTTP and loopback implementations
//! - A per-device [`SyncWorker`]
//!
//! ## Architecture
//!
//! ```text
//! UI ──▶ Replica ──▶ MutationQueue (durable) ──▶ SyncWorker ──▶ SyncEngine
//!           │                                                     │
//!           ▼                                         RetryExecutor + CircuitBreaker
//!       LocalStore ◀──── synced / adopted records ◀──── RecordTransport
//! ```
//!
//! ## Key Invariants
//!
//! - A write is durable in the queue before the call returns
//! - Entries for one record are sent strictly in sequence order
//! - A conflict is never retried blindly; the resolver decides
//! - A permanently rejected entry never blocks other records
//! - A cancelled or interrupted submission leaves its entry pending

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod engine;
mod error;
mod http;
mod local;
pub mod queue;
mod replica;
mod report;
mod resolver;
mod transport;
mod worker;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{QueueError, QueueResult, SyncError, SyncResult, TransportFailure};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use local::{LocalRecord, LocalStore, MemoryLocalStore};
pub use queue::{MutationQueue, NewMutation, QueueEntry, QueueEvent, QueueLog};
pub use replica::Replica;
pub use report::{FailedMutation, HaltReason, SyncReport, SyncStats};
pub use resolver::{ConflictResolver, Decision, ManualResolver, PolicyResolver};
pub use transport::{into_result, MockReply, MockTransport, RecordTransport};
pub use worker::{SyncTrigger, SyncWorker};

pub use medsync_resilience::{CircuitConfig, RetryConfig};
