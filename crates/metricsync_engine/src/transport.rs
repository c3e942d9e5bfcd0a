//! Transport layer abstraction for metrics and session requests.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Request parameters: a query string for GET/DELETE, a JSON body for POST.
pub type RequestParams = serde_json::Map<String, Value>;

/// HTTP method of a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET, parameters in the query string.
    Get,
    /// POST, parameters as a JSON body.
    Post,
    /// DELETE, parameters in the query string.
    Delete,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }

    /// Returns true if parameters travel in the query string.
    pub fn uses_query(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

/// A transport issues parameterized requests to the remote API.
///
/// Implementations normalize every outcome into a `SyncResult`: a 200 yields
/// the parsed JSON body, anything else an error. Retry policy belongs to the
/// caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns the parsed JSON body.
    async fn request(&self, method: Method, path: &str, params: RequestParams)
        -> SyncResult<Value>;
}

/// Side-channel events raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server answered 401; any session state is stale.
    Unauthorized {
        /// Path of the request that was rejected.
        path: String,
    },
}

/// Receives transport events.
pub trait EventSink: Send + Sync {
    /// Handles one event. Called synchronously before the request resolves.
    fn on_event(&self, event: &TransportEvent);
}

/// Renders parameters as query pairs.
///
/// Strings are used verbatim, other scalars through their JSON text, and
/// nulls are skipped.
pub fn query_pairs(params: &RequestParams) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key.clone(), s.clone())),
            other => Some((key.clone(), other.to_string())),
        })
        .collect()
}

/// A scripted reply for `MockTransport`.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 200 with the given body.
    Ok(Value),
    /// Non-200 with the given status and message.
    Fail {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },
    /// Connection-level failure.
    Transport(String),
    /// Never resolves.
    Hang,
}

/// A recorded request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Method.
    pub method: Method,
    /// Path.
    pub path: String,
    /// Parameters.
    pub params: RequestParams,
    /// Time the request started.
    pub at: tokio::time::Instant,
}

/// A mock transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    /// Sets the reply used once the queue is empty.
    pub fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock() = Some(reply);
    }

    /// Delays every reply by the given duration.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests seen so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the highest number of concurrently outstanding requests.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Option<MockReply> {
        self.replies
            .lock()
            .pop_front()
            .or_else(|| self.fallback.lock().clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: RequestParams,
    ) -> SyncResult<Value> {
        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_string(),
            params,
            at: tokio::time::Instant::now(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.next_reply() {
            Some(MockReply::Ok(body)) => Ok(body),
            Some(MockReply::Fail { status, message }) => Err(SyncError::Server { status, message }),
            Some(MockReply::Transport(message)) => Err(SyncError::transport_retryable(message)),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(SyncError::transport_fatal("no mock reply set")),
        }
    }
}
