//! Request handlers for record endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{StoreError, StoreResult, VersionedStore};
use crate::validate::RecordValidator;
use medsync_protocol::{
    FetchRequest, MutationKind, MutationRequest, MutationResponse, ProtocolError, RecordId,
};
use medsync_resilience::{CircuitBreaker, Classify};
use std::sync::Arc;
use tracing::debug;

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Record store (shared across all handlers).
    pub store: Arc<dyn VersionedStore>,
    /// Business-rule validator.
    pub validator: Arc<dyn RecordValidator>,
    /// Breaker guarding the record store.
    pub breaker: Arc<CircuitBreaker>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn VersionedStore>,
        validator: Arc<dyn RecordValidator>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            store,
            validator,
            breaker,
        }
    }
}

/// Handler for record requests.
///
/// Handlers hold no locks of their own; atomicity comes from the store's
/// conditional write. A version conflict is a normal answer and is returned
/// as a `409` response, not as an error.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Dispatches a mutation by kind.
    pub fn handle_mutation(&self, request: MutationRequest) -> ServerResult<MutationResponse> {
        request.validate()?;
        let MutationRequest {
            kind,
            record_id,
            payload,
            expected_version,
        } = request;

        match kind {
            MutationKind::Create => self.handle_create(record_id, required(payload, "payload")?),
            MutationKind::Update => self.handle_update(
                record_id,
                required(expected_version, "expected version")?,
                required(payload, "payload")?,
            ),
            MutationKind::Delete => {
                self.handle_delete(record_id, required(expected_version, "expected version")?)
            }
        }
    }

    /// Handles a create with a client-generated id.
    pub fn handle_create(&self, id: RecordId, payload: Vec<u8>) -> ServerResult<MutationResponse> {
        self.check_payload(MutationKind::Create, id, &payload)?;
        let result = self.with_store(|store| store.create_with_id(id, payload));
        answer_conflict(result.map(MutationResponse::created))
    }

    /// Handles a conditional update.
    pub fn handle_update(
        &self,
        id: RecordId,
        expected_version: u64,
        payload: Vec<u8>,
    ) -> ServerResult<MutationResponse> {
        self.check_payload(MutationKind::Update, id, &payload)?;
        let result =
            self.with_store(|store| store.conditional_update(id, expected_version, payload));
        answer_conflict(result.map(MutationResponse::ok))
    }

    /// Handles a conditional delete.
    pub fn handle_delete(&self, id: RecordId, expected_version: u64) -> ServerResult<MutationResponse> {
        let result = self.with_store(|store| store.delete(id, expected_version));
        answer_conflict(result.map(|()| MutationResponse::deleted()))
    }

    /// Handles a fetch of the current record.
    pub fn handle_get(&self, request: FetchRequest) -> ServerResult<MutationResponse> {
        self.with_store(|store| store.get(request.record_id))
            .map(MutationResponse::ok)
    }

    fn check_payload(&self, kind: MutationKind, id: RecordId, payload: &[u8]) -> ServerResult<()> {
        self.context
            .validator
            .validate(kind, id, payload)
            .map_err(ServerError::Rejected)
    }

    /// Runs one store call through the database breaker.
    ///
    /// Conflicts, misses and validation failures are correct answers from a
    /// healthy store and are recorded as successes.
    fn with_store<T>(
        &self,
        f: impl FnOnce(&dyn VersionedStore) -> StoreResult<T>,
    ) -> ServerResult<T> {
        let permit = self.context.breaker.try_acquire()?;
        let result = f(self.context.store.as_ref());
        match &result {
            Ok(_) => permit.success(),
            Err(e) if e.is_answer() => permit.success(),
            Err(e) => {
                debug!(error = %e, "record store call failed");
                permit.record(Some(e.class()));
            }
        }
        Ok(result?)
    }
}

fn required<T>(value: Option<T>, field: &str) -> ServerResult<T> {
    value.ok_or_else(|| ProtocolError::InvalidRequest(format!("missing {field}")).into())
}

fn answer_conflict(result: ServerResult<MutationResponse>) -> ServerResult<MutationResponse> {
    match result {
        Err(ServerError::Store(StoreError::Conflict { current })) => {
            debug!(id = %current.id, version = current.version, "version conflict");
            Ok(MutationResponse::conflict(*current))
        }
        other => other,
    }
}
