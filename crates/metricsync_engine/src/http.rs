//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait so the same transport
//! logic runs over `reqwest` in production and over in-memory fakes in tests.

use crate::error::{SyncError, SyncResult};
use crate::transport::{query_pairs, EventSink, Method, RequestParams, Transport, TransportEvent};
use async_trait::async_trait;
use metricsync_protocol::ErrorBody;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A fully resolved HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Query pairs (GET/DELETE).
    pub query: Vec<(String, String)>,
    /// JSON body (POST).
    pub body: Option<Value>,
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates a JSON response.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Errors are
/// connection-level failures only; any received status, including 4xx and
/// 5xx, is an `Ok` response.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the raw response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// HTTP-based transport.
///
/// Uses JSON for request and response bodies. A 401 from any endpoint is
/// broadcast to the registered event sinks before the error is returned.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the API (e.g., "https://metrics.example.com/api").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Event sinks notified of side-channel events.
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Registers a sink for transport events.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    fn emit(&self, event: TransportEvent) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            sink.on_event(&event);
        }
    }

    fn build(&self, method: Method, path: &str, params: RequestParams) -> HttpRequest {
        let url = format!("{}{}", self.base_url, path);
        if method.uses_query() {
            HttpRequest {
                method,
                url,
                query: query_pairs(&params),
                body: None,
            }
        } else {
            HttpRequest {
                method,
                url,
                query: Vec::new(),
                body: Some(Value::Object(params)),
            }
        }
    }
}

#[async_trait]
impl<C: HttpClient> Transport for HttpTransport<C> {
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: RequestParams,
    ) -> SyncResult<Value> {
        let request = self.build(method, path, params);
        debug!(method = method.as_str(), path, "sending request");

        let response = self
            .client
            .send(request)
            .await
            .map_err(SyncError::transport_retryable)?;

        if response.status == 200 {
            return serde_json::from_slice(&response.body)
                .map_err(|e| SyncError::Decode(format!("response body of {path}: {e}")));
        }

        if response.status == 401 {
            warn!(path, "unauthorized response, resetting session");
            self.emit(TransportEvent::Unauthorized {
                path: path.to_string(),
            });
        }

        let body = ErrorBody::decode(&response.body)?;
        Err(SyncError::Server {
            status: response.status,
            message: body.error,
        })
    }
}

/// `HttpClient` backed by `reqwest`.
///
/// Keeps a cookie store so the session cookie set by `POST /login` is sent
/// with every later request.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the given total request timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let builder = match request.method {
            Method::Get => self.inner.get(&request.url),
            Method::Post => self.inner.post(&request.url),
            Method::Delete => self.inner.delete(&request.url),
        };
        let builder = if request.query.is_empty() {
            builder
        } else {
            builder.query(&request.query)
        };
        let builder = match request.body {
            Some(ref body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}
