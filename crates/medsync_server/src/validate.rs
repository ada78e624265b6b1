//! Business-rule validation hook.
//!
//! Domain rules (coverage limits, measurement ranges) live outside this
//! crate. The server only asks a [`RecordValidator`] whether a payload is
//! acceptable and answers `422` when it is not.

use medsync_protocol::{MutationKind, RecordId};

/// Decides whether a create or update payload is acceptable.
pub trait RecordValidator: Send + Sync {
    /// Returns `Err(reason)` to reject the write.
    fn validate(&self, kind: MutationKind, id: RecordId, payload: &[u8]) -> Result<(), String>;
}

/// Accepts every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RecordValidator for AcceptAll {
    fn validate(&self, _kind: MutationKind, _id: RecordId, _payload: &[u8]) -> Result<(), String> {
        Ok(())
    }
}

impl<F> RecordValidator for F
where
    F: Fn(MutationKind, RecordId, &[u8]) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, kind: MutationKind, id: RecordId, payload: &[u8]) -> Result<(), String> {
        self(kind, id, payload)
    }
}
