//! # MedSync Storage
//!
//! Byte-store backends and checksummed frame logs for MedSync.
//!
//! Backends are **opaque byte stores**: they append, read, flush and
//! truncate bytes and know nothing about what the bytes mean. Two higher
//! layers build on them:
//!
//! - the client mutation queue, which persists pending offline writes;
//! - the server's durable record store, which persists row images.
//!
//! Both use the [`frame`] module's record envelope (magic, format version,
//! frame type, length, CRC32) so that a crash mid-append leaves at most one
//! torn frame at the tail, which recovery truncates.
//!
//! ## Example
//!
//! ```rust
//! use medsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"pending write").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"pending");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
pub mod frame;
mod lock;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use frame::{append_frame, compute_crc32, encode_frame, scan_frames, Frame, FrameScan};
pub use lock::DirLock;
pub use memory::InMemoryBackend;
