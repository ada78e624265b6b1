//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult, TransportFailure};
use async_trait::async_trait;
use medsync_protocol::{MutationRequest, MutationResponse, RecordId, Status, VersionedRecord};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// A record transport carries mutations to the record server.
///
/// Implementations return the server's [`MutationResponse`] for any answer
/// the server gave, including `409` and other non-success statuses, and
/// reserve `Err` for failures where no answer arrived. [`into_result`]
/// turns an answer into the engine's error vocabulary.
#[async_trait]
pub trait RecordTransport: Send + Sync {
    /// Submits one mutation.
    async fn submit(&self, request: &MutationRequest) -> SyncResult<MutationResponse>;

    /// Fetches the server's current copy of a record.
    async fn fetch(&self, record_id: RecordId) -> SyncResult<MutationResponse>;
}

/// Maps a server answer to a result.
///
/// A `409` with the current record becomes [`SyncError::Conflict`]; any other
/// non-success status becomes [`SyncError::Status`].
pub fn into_result(response: MutationResponse) -> SyncResult<MutationResponse> {
    if response.status.is_success() {
        return Ok(response);
    }
    match (response.status, response.record) {
        (Status::CONFLICT, Some(current)) => Err(SyncError::Conflict {
            current: Box::new(current),
        }),
        (status, _) => Err(SyncError::Status {
            status,
            message: response.error.unwrap_or_default(),
        }),
    }
}

/// One scripted answer for [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this response.
    Respond(MutationResponse),
    /// Fail without an answer.
    Fail(TransportFailure),
}

/// A mock transport for testing.
///
/// Replies are consumed in order. When the script is empty, every call
/// receives the fallback reply (success echoing the request by default).
/// Fetches have their own script and answer `404` once it runs out.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<MutationRequest>>,
    delay: Mutex<Option<Duration>>,
    fetch_script: Mutex<VecDeque<MockReply>>,
    fetches: Mutex<Vec<RecordId>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    /// Queues a response.
    pub fn push_response(&self, response: MutationResponse) {
        self.push_reply(MockReply::Respond(response));
    }

    /// Queues a network failure.
    pub fn push_failure(&self, failure: TransportFailure) {
        self.push_reply(MockReply::Fail(failure));
    }

    /// Sets the reply used once the script runs out.
    pub fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock() = Some(reply);
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Queues a reply for the next fetch.
    pub fn push_fetch_reply(&self, reply: MockReply) {
        self.fetch_script.lock().push_back(reply);
    }

    /// Returns the record ids fetched so far.
    pub fn fetches(&self) -> Vec<RecordId> {
        self.fetches.lock().clone()
    }

    /// Returns the requests submitted so far.
    pub fn requests(&self) -> Vec<MutationRequest> {
        self.requests.lock().clone()
    }

    fn next_reply(&self, request: &MutationRequest) -> MockReply {
        if let Some(reply) = self.script.lock().pop_front() {
            return reply;
        }
        if let Some(fallback) = self.fallback.lock().clone() {
            return fallback;
        }
        MockReply::Respond(echo(request))
    }
}

fn echo(request: &MutationRequest) -> MutationResponse {
    let version = request.expected_version.map_or(1, |v| v + 1);
    match &request.payload {
        Some(payload) => {
            let mut record = VersionedRecord::new(request.record_id, payload.clone());
            record.version = version;
            if request.expected_version.is_none() {
                MutationResponse::created(record)
            } else {
                MutationResponse::ok(record)
            }
        }
        None => MutationResponse::deleted(),
    }
}

#[async_trait]
impl RecordTransport for MockTransport {
    async fn submit(&self, request: &MutationRequest) -> SyncResult<MutationResponse> {
        self.requests.lock().push(request.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply(request) {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(failure) => Err(failure.into()),
        }
    }

    async fn fetch(&self, record_id: RecordId) -> SyncResult<MutationResponse> {
        self.fetches.lock().push(record_id);
        let reply = self.fetch_script.lock().pop_front();
        match reply {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(failure)) => Err(failure.into()),
            None => Ok(MutationResponse::error(
                Status::NOT_FOUND,
                format!("mock has no record {record_id}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_resilience::{Classify, ErrorClass};

    #[test]
    fn conflict_answer_becomes_conflict_error() {
        let current = VersionedRecord::new(RecordId::new(), b"server".to_vec());
        let err = into_result(MutationResponse::conflict(current.clone())).unwrap_err();
        match err {
            SyncError::Conflict { current: got } => assert_eq!(*got, current),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_statuses_keep_their_class() {
        let rejected = into_result(MutationResponse::error(Status::UNPROCESSABLE, "bad"));
        assert_eq!(rejected.unwrap_err().class(), ErrorClass::Fatal);

        let unavailable = into_result(MutationResponse::error(Status::SERVICE_UNAVAILABLE, ""));
        assert_eq!(unavailable.unwrap_err().class(), ErrorClass::Retryable);
    }

    #[tokio::test]
    async fn mock_follows_script_then_echoes() {
        let transport = MockTransport::new();
        transport.push_failure(TransportFailure::Timeout);
        let request = MutationRequest::update(RecordId::new(), 3, vec![1]);

        assert!(matches!(
            transport.submit(&request).await,
            Err(SyncError::Transport(TransportFailure::Timeout))
        ));
        let echoed = transport.submit(&request).await.unwrap();
        assert_eq!(echoed.status, Status::OK);
        assert_eq!(echoed.record.unwrap().version, 4);
        assert_eq!(transport.requests().len(), 2);
    }
}
