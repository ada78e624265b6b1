//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so the engine does not
//! depend on a particular HTTP library. [`LoopbackClient`] routes requests
//! to an in-process server for tests.

use crate::error::{SyncError, SyncResult, TransportFailure};
use crate::transport::RecordTransport;
use async_trait::async_trait;
use medsync_protocol::{
    endpoints, FetchRequest, HttpResponse, MutationRequest, MutationResponse, RecordId, Status,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport (reqwest,
/// hyper, a platform networking stack).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the status and body.
    ///
    /// `Err` means no response arrived at all.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, TransportFailure>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based record transport.
///
/// Uses CBOR encoding for request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the record server (e.g., "https://records.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    async fn post_cbor(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<MutationResponse> {
        let url = format!("{}{}", self.base_url, endpoint);
        let http = self.client.post(&url, body).await.map_err(|e| {
            self.set_error(&e.to_string());
            SyncError::from(e)
        })?;
        self.clear_error();

        let status = Status::new(http.status);
        match MutationResponse::decode(&http.body) {
            Ok(response) => Ok(response),
            // Proxies and load balancers answer errors without our body.
            Err(e) if !status.is_success() => {
                debug!(%url, %status, error = %e, "non-CBOR error body");
                Ok(MutationResponse::error(status, format!("HTTP {status}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<C: HttpClient> RecordTransport for HttpTransport<C> {
    async fn submit(&self, request: &MutationRequest) -> SyncResult<MutationResponse> {
        request.validate()?;
        self.post_cbor(request.endpoint(), request.encode()?).await
    }

    async fn fetch(&self, record_id: RecordId) -> SyncResult<MutationResponse> {
        let request = FetchRequest { record_id };
        self.post_cbor(endpoints::GET, request.encode()?).await
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead. Setting the client
/// offline makes every request fail with
/// [`TransportFailure::ConnectionRefused`].
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    offline: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates losing or regaining connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, TransportFailure> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportFailure::ConnectionRefused(url.to_string()));
        }
        // Extract path from URL
        let path = url.find("/records/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, &body))
    }

    fn is_healthy(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
