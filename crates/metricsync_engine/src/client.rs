//! Wiring of transport, session and metrics store.

use crate::config::ClientConfig;
use crate::error::SyncResult;
use crate::fetcher::{Clock, MetricsFetcher, SystemClock};
use crate::http::{HttpClient, HttpTransport, ReqwestClient};
use crate::session::{SessionClient, SessionStore};
use crate::store::MetricStore;
use crate::transport::{EventSink, Transport};
use std::sync::Arc;
use tracing::info;

/// A configured client: one transport shared by the session and metrics sides.
pub struct Client {
    config: ClientConfig,
    session: SessionClient,
    metrics: MetricStore,
}

impl Client {
    /// Builds a client over HTTP with a cookie-keeping reqwest client.
    pub fn connect(config: ClientConfig) -> SyncResult<Self> {
        let http = ReqwestClient::new(config.http_timeout())?;
        Self::with_http_client(config, http)
    }

    /// Builds a client over HTTP using the given HTTP client.
    pub fn with_http_client<C: HttpClient + 'static>(
        config: ClientConfig,
        http: C,
    ) -> SyncResult<Self> {
        Self::with_http_client_and_clock(config, http, Arc::new(SystemClock))
    }

    /// Builds a client over HTTP with an explicit clock.
    pub fn with_http_client_and_clock<C: HttpClient + 'static>(
        config: ClientConfig,
        http: C,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let sessions = Arc::new(SessionStore::new());
        let transport = HttpTransport::new(config.base_url.clone(), http);
        let sink: Arc<dyn EventSink> = sessions.clone();
        transport.add_sink(sink);
        let transport: Arc<dyn Transport> = Arc::new(transport);

        info!(base_url = config.base_url.as_str(), "client configured");
        Ok(Self::assemble(config, transport, sessions, clock))
    }

    /// Builds a client over an arbitrary transport.
    ///
    /// 401 handling is the transport's business; `HttpTransport` needs the
    /// session store registered as a sink.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        sessions: Arc<SessionStore>,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self::assemble(
            config,
            transport,
            sessions,
            Arc::new(SystemClock),
        ))
    }

    fn assemble(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fetcher = MetricsFetcher::with_clock(Arc::clone(&transport), clock);
        Self {
            session: SessionClient::new(transport, sessions),
            metrics: MetricStore::new(fetcher, &config),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the session client.
    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    /// Returns the metrics store.
    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    /// Stops every stream.
    pub async fn shutdown(&self) {
        self.metrics.stop_all().await;
    }
}
