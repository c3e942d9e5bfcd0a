//! Cursor-based metrics fetcher.

use crate::config::StreamConfig;
use crate::error::SyncResult;
use crate::transport::{Method, Transport};
use metricsync_protocol::{MetricRecord, MetricsQuery, MetricsResponse, Timestamp};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Path of the metrics endpoint.
pub const METRICS_PATH: &str = "/metrics";

/// How far back the first fetch of a stream reaches, in seconds.
pub const BACKFILL_WINDOW_SECS: i64 = 86_400;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time in seconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// A manually driven clock for tests.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Stream-specific parameters added to every fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    /// Look-back window hint in seconds.
    pub watch: u32,
    /// Optional source tag.
    pub source: Option<String>,
}

impl From<&StreamConfig> for StreamFilter {
    fn from(config: &StreamConfig) -> Self {
        Self {
            watch: config.watch,
            source: config.source.clone(),
        }
    }
}

/// Fetches records newer than a cursor.
#[derive(Clone)]
pub struct MetricsFetcher {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl MetricsFetcher {
    /// Creates a fetcher using the system clock.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_clock(transport, Arc::new(SystemClock))
    }

    /// Creates a fetcher with an explicit clock.
    pub fn with_clock(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self { transport, clock }
    }

    /// Builds the query for the page after `cursor`.
    ///
    /// Without a cursor the page starts `BACKFILL_WINDOW_SECS` before now.
    pub fn query_for(
        &self,
        cursor: Option<Timestamp>,
        limit: usize,
        filter: &StreamFilter,
    ) -> MetricsQuery {
        let from = cursor.unwrap_or_else(|| self.clock.now() - BACKFILL_WINDOW_SECS);
        let query = MetricsQuery::new()
            .with_limit(u32::try_from(limit).unwrap_or(u32::MAX))
            .with_watch(filter.watch)
            .with_from(from);
        match filter.source {
            Some(ref source) => query.with_src(source.clone()),
            None => query,
        }
    }

    /// Returns the records newer than `cursor`, newest first.
    ///
    /// An empty result means no new records, not a fault.
    pub async fn fetch_since(
        &self,
        cursor: Option<Timestamp>,
        limit: usize,
        filter: &StreamFilter,
    ) -> SyncResult<Vec<MetricRecord>> {
        let query = self.query_for(cursor, limit, filter);
        let response = self.fetch(&query).await?;

        let mut records = response.metrics;
        if let Some(ref source) = filter.source {
            for record in records.iter_mut().filter(|r| r.source.is_empty()) {
                record.source = source.clone();
            }
        }

        debug!(
            from = query.from,
            count = records.len(),
            timed_out = response.timeout,
            "fetched metrics page"
        );
        Ok(records)
    }

    /// Runs an arbitrary metrics query.
    pub async fn fetch(&self, query: &MetricsQuery) -> SyncResult<MetricsResponse> {
        let body = self
            .transport
            .request(Method::Get, METRICS_PATH, query.encode()?)
            .await?;
        Ok(MetricsResponse::decode(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::transport::{MockReply, MockTransport};
    use serde_json::json;

    const NOW: Timestamp = 1_700_000_000;

    fn fetcher(transport: Arc<MockTransport>) -> MetricsFetcher {
        MetricsFetcher::with_clock(transport, Arc::new(FixedClock::new(NOW)))
    }

    fn filter() -> StreamFilter {
        StreamFilter {
            watch: 30,
            source: None,
        }
    }

    #[tokio::test]
    async fn first_fetch_backfills_one_day() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::Ok(json!({
            "total": 1,
            "metrics": [{"Timestamp": 100, "cpu": 0.1}]
        })));

        let records = fetcher(transport.clone())
            .fetch_since(None, 20, &filter())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let request = &transport.requests()[0];
        assert_eq!(request.path, METRICS_PATH);
        assert_eq!(request.params["from"], NOW - 86_400);
        assert_eq!(request.params["limit"], 20);
        assert_eq!(request.params["watch"], 30);
        assert!(request.params.get("src").is_none());
    }

    #[tokio::test]
    async fn cursor_is_sent_as_from() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::Ok(json!({"total": 0, "metrics": []})));

        fetcher(transport.clone())
            .fetch_since(Some(501), 1, &filter())
            .await
            .unwrap();
        assert_eq!(transport.requests()[0].params["from"], 501);
    }

    #[tokio::test]
    async fn empty_and_null_pages_are_not_errors() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::Ok(json!({"total": 0, "metrics": null})));
        transport.push_reply(MockReply::Ok(json!({"metrics": [], "timeout": true})));

        let f = fetcher(transport);
        assert!(f.fetch_since(Some(1), 5, &filter()).await.unwrap().is_empty());
        assert!(f.fetch_since(Some(1), 5, &filter()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn source_filter_is_sent_and_stamped() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::Ok(json!({
            "metrics": [{"Timestamp": 10, "temp": 20.0}]
        })));

        let filter = StreamFilter {
            watch: 30,
            source: Some("node-a".into()),
        };
        let records = fetcher(transport.clone())
            .fetch_since(None, 1, &filter)
            .await
            .unwrap();

        assert_eq!(transport.requests()[0].params["src"], "node-a");
        assert_eq!(records[0].source, "node-a");
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::Transport("connection reset".into()));

        let result = fetcher(transport).fetch_since(None, 5, &filter()).await;
        assert!(matches!(result, Err(SyncError::Transport { .. })));
    }

    #[test]
    fn fixed_clock_moves() {
        let clock = FixedClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(3);
        assert_eq!(clock.now(), 3);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
