//! Record server facade.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::memory::InMemoryStore;
use crate::store::VersionedStore;
use crate::validate::{AcceptAll, RecordValidator};
use medsync_protocol::{
    endpoints, FetchRequest, HttpResponse, MutationRequest, MutationResponse, Status,
};
use medsync_resilience::{dependencies, CircuitBreaker, CircuitRegistry};
use std::sync::Arc;
use tracing::{debug, warn};

/// The record server.
///
/// Accepts CBOR-encoded requests on the `/records/*` endpoints and answers
/// with a status code and a CBOR [`MutationResponse`]. Transport (an HTTP
/// listener, or the in-process loopback used by tests) is up to the caller.
///
/// # Example
///
/// ```
/// use medsync_protocol::{endpoints, MutationRequest, MutationResponse, RecordId};
/// use medsync_server::{RecordServer, ServerConfig};
///
/// let server = RecordServer::new(ServerConfig::default());
/// let request = MutationRequest::create(RecordId::new(), b"bp=120/80".to_vec());
///
/// let http = server.handle_post(endpoints::CREATE, &request.encode().unwrap());
/// assert_eq!(http.status, 201);
///
/// let response = MutationResponse::decode(&http.body).unwrap();
/// assert_eq!(response.record.unwrap().version, 1);
/// ```
pub struct RecordServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl RecordServer {
    /// Creates a server over a fresh in-memory store.
    pub fn new(config: ServerConfig) -> Self {
        let registry = CircuitRegistry::default();
        Self::with_store(config, Arc::new(InMemoryStore::new()), &registry)
    }

    /// Creates a server over `store`, taking the database breaker from
    /// `registry`.
    ///
    /// The breaker is registered with the configuration's
    /// `database_circuit` settings unless the registry already has one.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<dyn VersionedStore>,
        registry: &CircuitRegistry,
    ) -> Self {
        let breaker = registry
            .get(dependencies::DATABASE)
            .unwrap_or_else(|| registry.insert(dependencies::DATABASE, config.database_circuit.clone()));
        Self::from_context(HandlerContext::new(config, store, Arc::new(AcceptAll), breaker))
    }

    /// Replaces the business-rule validator.
    pub fn with_validator(self, validator: Arc<dyn RecordValidator>) -> Self {
        Self::from_context(HandlerContext::new(
            self.context.config.clone(),
            Arc::clone(&self.context.store),
            validator,
            Arc::clone(&self.context.breaker),
        ))
    }

    fn from_context(context: HandlerContext) -> Self {
        let context = Arc::new(context);
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles a POST to `path` with a CBOR body.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse {
        let response = match self.dispatch(path, body) {
            Ok(response) => response,
            Err(e) => {
                let status = e.status();
                if e.is_server_error() {
                    warn!(path, %status, error = %e, "request failed");
                } else {
                    debug!(path, %status, error = %e, "request rejected");
                }
                MutationResponse::error(status, e.to_string())
            }
        };

        match response.encode() {
            Ok(encoded) => HttpResponse::new(response.status.code(), encoded),
            Err(e) => {
                warn!(path, error = %e, "failed to encode response");
                HttpResponse::new(Status::INTERNAL.code(), Vec::new())
            }
        }
    }

    fn dispatch(&self, path: &str, body: &[u8]) -> ServerResult<MutationResponse> {
        let max = self.context.config.max_body_size;
        if body.len() > max {
            return Err(ServerError::BodyTooLarge {
                size: body.len(),
                max,
            });
        }

        match path {
            endpoints::GET => self.handler.handle_get(FetchRequest::decode(body)?),
            endpoints::CREATE | endpoints::UPDATE | endpoints::DELETE => {
                let request = MutationRequest::decode(body)?;
                if request.endpoint() != path {
                    return Err(ServerError::InvalidRequest(
                        medsync_protocol::ProtocolError::InvalidRequest(format!(
                            "{} request posted to {path}",
                            request.kind
                        )),
                    ));
                }
                self.handler.handle_mutation(request)
            }
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }

    /// Handles a decoded mutation, mapping errors to responses.
    pub fn handle_mutation(&self, request: MutationRequest) -> MutationResponse {
        self.handler
            .handle_mutation(request)
            .unwrap_or_else(|e| MutationResponse::error(e.status(), e.to_string()))
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<dyn VersionedStore> {
        &self.context.store
    }

    /// Returns the breaker guarding the record store.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.context.breaker
    }

    /// Returns the number of live records.
    pub fn record_count(&self) -> usize {
        self.context.store.len()
    }
}
