//! Conflict resolution.
//!
//! The engine never picks a winner on its own. Every engine is built with a
//! [`ConflictResolver`]: [`PolicyResolver`] applies one unattended policy to
//! every conflict, [`ManualResolver`] parks every conflict until the UI
//! calls [`crate::SyncEngine::resolve`].

use medsync_protocol::{Conflict, ConflictPolicy, Resolution};

/// What to do with a conflict now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Apply this resolution immediately.
    Resolved(Resolution),
    /// Park the conflict and skip the record until it is resolved.
    Deferred,
}

/// Decides the outcome of version conflicts.
pub trait ConflictResolver: Send + Sync {
    /// Decides what to do with `conflict`.
    fn resolve(&self, conflict: &Conflict) -> Decision;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Conflict) -> Decision + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict) -> Decision {
        self(conflict)
    }
}

/// Applies one [`ConflictPolicy`] to every conflict.
#[derive(Debug, Clone, Copy)]
pub struct PolicyResolver {
    policy: ConflictPolicy,
}

impl PolicyResolver {
    /// Creates a resolver for `policy`.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }
}

impl ConflictResolver for PolicyResolver {
    fn resolve(&self, _conflict: &Conflict) -> Decision {
        Decision::Resolved(self.policy.resolution())
    }
}

/// Defers every conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualResolver;

impl ConflictResolver for ManualResolver {
    fn resolve(&self, _conflict: &Conflict) -> Decision {
        Decision::Deferred
    }
}
