//! Metrics state and the streams that feed it.

use crate::config::{ClientConfig, PollerConfig, StreamConfig};
use crate::error::{SyncError, SyncResult};
use crate::fetcher::MetricsFetcher;
use crate::merge::{merge, merge_latest, DuplicatePolicy};
use crate::observable::{Observable, Subscription};
use crate::poller::{PollHandle, PollSession, Poller, StreamKind, StreamSink};
use metricsync_protocol::{MetricRecord, MetricsQuery, MetricsResponse, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Bounded buffer of recent records, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    /// Records, strictly descending by timestamp within a source.
    pub items: Vec<MetricRecord>,
    /// `from` of the next fetch, one past the newest record seen.
    pub cursor: Option<Timestamp>,
    /// Maximum number of records kept.
    pub max_size: usize,
}

impl StreamState {
    /// Creates an empty buffer.
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::new(),
            cursor: None,
            max_size,
        }
    }

    /// Returns the newest record.
    pub fn newest(&self) -> Option<&MetricRecord> {
        self.items.first()
    }
}

/// Everything the metrics side of the client knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricState {
    /// `total` of the last one-shot query.
    pub total: u64,
    /// Rows of the last one-shot query.
    pub metrics: Vec<MetricRecord>,
    /// Recent-events stream.
    pub recents: StreamState,
    /// Latest record per dashboard source filter.
    pub dashboard: BTreeMap<String, MetricRecord>,
    /// A one-shot query is in flight.
    pub loading: bool,
    /// Message of the last failed one-shot query.
    pub error: Option<String>,
}

impl MetricState {
    /// Returns the dashboard record for a source filter.
    pub fn dashboard_for(&self, source: &str) -> Option<&MetricRecord> {
        self.dashboard.get(source)
    }

    /// Returns the cursor of a dashboard stream.
    pub fn dashboard_cursor(&self, source: &str) -> Option<Timestamp> {
        self.dashboard_for(source).map(MetricRecord::next_cursor)
    }
}

/// The merge layer's handle on `MetricState`; the only writer of polled data.
struct StateWriter {
    state: Arc<Observable<MetricState>>,
    policy: DuplicatePolicy,
}

impl StreamSink for StateWriter {
    fn apply(&self, kind: &StreamKind, records: &[MetricRecord]) -> SyncResult<bool> {
        if records.is_empty() {
            return Ok(false);
        }

        let mut result = Ok(());
        let changed = match kind {
            StreamKind::Recents => self.state.update(|s| {
                match merge(&s.recents.items, records, s.recents.max_size, self.policy) {
                    Ok(outcome) => {
                        if outcome.changed() {
                            s.recents.items = outcome.items;
                        }
                        let newest = records.iter().map(MetricRecord::next_cursor).max();
                        s.recents.cursor = s.recents.cursor.max(newest);
                    }
                    Err(e) => result = Err(e),
                }
            }),
            StreamKind::Dashboard { source } => self.state.update(|s| {
                if let Some(latest) = merge_latest(s.dashboard.get(source), records) {
                    s.dashboard.insert(source.clone(), latest);
                }
            }),
        };
        result?;

        debug!(stream = %kind, changed, "applied page");
        Ok(changed)
    }
}

/// Holds `MetricState` and runs the streams that keep it current.
///
/// At most one poller runs per `StreamKind`; starting a running stream again
/// is a no-op.
pub struct MetricStore {
    state: Arc<Observable<MetricState>>,
    fetcher: MetricsFetcher,
    writer: Arc<StateWriter>,
    recents: StreamConfig,
    dashboard: StreamConfig,
    poller: PollerConfig,
    pollers: Mutex<HashMap<StreamKind, PollHandle>>,
}

impl MetricStore {
    /// Creates a store over the given fetcher.
    pub fn new(fetcher: MetricsFetcher, config: &ClientConfig) -> Self {
        let state = Arc::new(Observable::new(MetricState {
            recents: StreamState::new(config.recents.limit),
            ..MetricState::default()
        }));
        let writer = Arc::new(StateWriter {
            state: Arc::clone(&state),
            policy: config.duplicate_policy,
        });
        Self {
            state,
            fetcher,
            writer,
            recents: config.recents.clone(),
            dashboard: config.dashboard.clone(),
            poller: config.poller.clone(),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> MetricState {
        self.state.get()
    }

    /// Subscribes to state changes.
    pub fn subscribe(
        &self,
        listener: impl Fn(&MetricState) + Send + Sync + 'static,
    ) -> Subscription<MetricState> {
        self.state.subscribe(listener)
    }

    /// Runs a one-shot query. The outcome is recorded in `total`/`metrics` or `error`.
    pub async fn get_metrics(&self, query: &MetricsQuery) -> SyncResult<MetricsResponse> {
        self.state.update(|s| s.loading = true);

        match self.fetcher.fetch(query).await {
            Ok(response) => {
                let total = response.total;
                let metrics = response.metrics.clone();
                self.state.update(|s| {
                    s.total = total;
                    s.metrics = metrics;
                    s.loading = false;
                    s.error = None;
                });
                Ok(response)
            }
            Err(e) => {
                let message = e.to_string();
                self.state.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Starts polling recent records into a buffer of `limit` items.
    ///
    /// Returns `Ok(false)` if the stream was already running. A zero `limit`
    /// is a configuration error. Must be called from within a tokio runtime.
    pub fn start_recents(&self, limit: usize) -> SyncResult<bool> {
        if limit == 0 {
            return Err(SyncError::Config("recents limit must be positive".into()));
        }
        let stream = StreamConfig {
            limit,
            ..self.recents.clone()
        };
        let resume = self.state.with(|s| s.recents.cursor);
        Ok(self.start(StreamKind::Recents, &stream, resume, |s| {
            s.recents.max_size = limit;
            s.recents.items.truncate(limit);
        }))
    }

    /// Starts polling the latest record for `source` (empty = unfiltered).
    ///
    /// Returns false if the stream was already running. Must be called from
    /// within a tokio runtime.
    pub fn start_dashboard(&self, source: &str) -> bool {
        let stream = StreamConfig {
            limit: 1,
            ..self.dashboard.clone()
        }
        .with_source(source);
        let resume = self.state.with(|s| s.dashboard_cursor(source));
        let kind = StreamKind::Dashboard {
            source: source.to_string(),
        };
        self.start(kind, &stream, resume, |_| {})
    }

    fn start(
        &self,
        kind: StreamKind,
        stream: &StreamConfig,
        resume: Option<Timestamp>,
        prepare: impl FnOnce(&mut MetricState),
    ) -> bool {
        let mut pollers = self.pollers.lock();
        if pollers.get(&kind).is_some_and(PollHandle::is_running) {
            debug!(stream = %kind, "stream already running");
            return false;
        }

        self.state.update(prepare);
        let writer: Arc<dyn StreamSink> = self.writer.clone();
        let mut poller = Poller::new(
            kind.clone(),
            self.fetcher.clone(),
            writer,
            stream,
            self.poller.clone(),
        );
        if let Some(cursor) = resume {
            poller = poller.with_cursor(cursor);
        }
        pollers.insert(kind, poller.spawn());
        true
    }

    /// Stops the recent-records stream. Returns false if it was not running.
    pub fn stop_recents(&self) -> bool {
        self.stop(&StreamKind::Recents)
    }

    /// Stops a dashboard stream. Returns false if it was not running.
    pub fn stop_dashboard(&self, source: &str) -> bool {
        self.stop(&StreamKind::Dashboard {
            source: source.to_string(),
        })
    }

    fn stop(&self, kind: &StreamKind) -> bool {
        match self.pollers.lock().remove(kind) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every stream and waits for the loops to exit.
    pub async fn stop_all(&self) {
        let handles: Vec<PollHandle> = self.pollers.lock().drain().map(|(_, h)| h).collect();
        info!(streams = handles.len(), "stopping all streams");
        for handle in handles {
            handle.shutdown().await;
        }
    }

    /// Returns the poll session of a stream.
    pub fn session(&self, kind: &StreamKind) -> Option<PollSession> {
        self.pollers.lock().get(kind).map(PollHandle::session)
    }

    /// Returns the streams with a live poller.
    pub fn running_streams(&self) -> Vec<StreamKind> {
        let mut kinds: Vec<StreamKind> = self
            .pollers
            .lock()
            .iter()
            .filter(|(_, h)| h.is_running())
            .map(|(k, _)| k.clone())
            .collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FixedClock;
    use crate::transport::{MockReply, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    const NOW: Timestamp = 1_700_000_000;

    fn store_with(transport: Arc<MockTransport>, config: ClientConfig) -> MetricStore {
        let fetcher = MetricsFetcher::with_clock(transport, Arc::new(FixedClock::new(NOW)));
        MetricStore::new(fetcher, &config)
    }

    fn store(transport: Arc<MockTransport>) -> MetricStore {
        store_with(transport, ClientConfig::default())
    }

    fn page(timestamps: &[i64]) -> MockReply {
        let metrics: Vec<_> = timestamps
            .iter()
            .map(|ts| json!({"Timestamp": ts, "cpu": 0.5}))
            .collect();
        MockReply::Ok(json!({"total": metrics.len(), "metrics": metrics}))
    }

    fn record_ts(items: &[MetricRecord]) -> Vec<i64> {
        items.iter().map(|r| r.timestamp).collect()
    }

    #[tokio::test]
    async fn get_metrics_records_result() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::Ok(json!({
            "total": 42,
            "metrics": [{"Timestamp": 9, "cpu": 1.0}]
        })));
        let store = store(transport);

        let response = store
            .get_metrics(&MetricsQuery::new().with_limit(10))
            .await
            .unwrap();
        assert_eq!(response.total, 42);

        let state = store.state();
        assert_eq!(state.total, 42);
        assert_eq!(state.metrics.len(), 1);
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn get_metrics_failure_sets_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::Fail {
            status: 400,
            message: "query: bad column".into(),
        });
        let store = store(transport);

        assert!(store.get_metrics(&MetricsQuery::new()).await.is_err());
        let state = store.state();
        assert!(!state.loading);
        assert!(state.error.unwrap().contains("bad column"));
    }

    #[test]
    fn writer_merges_recents_with_bound() {
        let store = store(Arc::new(MockTransport::new()));
        store.state.update(|s| {
            s.recents.max_size = 5;
            s.recents.items = vec![
                MetricRecord::new(3),
                MetricRecord::new(2),
                MetricRecord::new(1),
            ];
        });

        let incoming: Vec<_> = [7, 6, 5, 4].into_iter().map(MetricRecord::new).collect();
        assert!(store.writer.apply(&StreamKind::Recents, &incoming).unwrap());

        let state = store.state();
        assert_eq!(record_ts(&state.recents.items), vec![7, 6, 5, 4, 3]);
        assert_eq!(state.recents.cursor, Some(8));
    }

    #[test]
    fn writer_empty_page_does_not_notify() {
        let store = store(Arc::new(MockTransport::new()));
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let _sub = store.subscribe(move |_| *counter.lock() += 1);

        assert!(!store.writer.apply(&StreamKind::Recents, &[]).unwrap());
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn writer_dashboard_replaces_per_source() {
        let store = store(Arc::new(MockTransport::new()));
        let a = StreamKind::Dashboard {
            source: "a".into(),
        };
        let b = StreamKind::Dashboard {
            source: "b".into(),
        };

        store
            .writer
            .apply(&a, &[MetricRecord::new(10).with_source("a")])
            .unwrap();
        store
            .writer
            .apply(&a, &[MetricRecord::new(11).with_source("a")])
            .unwrap();
        store
            .writer
            .apply(&b, &[MetricRecord::new(5).with_source("b")])
            .unwrap();

        let state = store.state();
        assert_eq!(state.dashboard_for("a").unwrap().timestamp, 11);
        assert_eq!(state.dashboard_for("b").unwrap().timestamp, 5);
        assert_eq!(state.dashboard_cursor("a"), Some(12));
        assert!(state.recents.items.is_empty());
    }

    #[test]
    fn writer_duplicate_rejected_leaves_state() {
        let store = store(Arc::new(MockTransport::new()));
        store
            .writer
            .apply(&StreamKind::Recents, &[MetricRecord::new(5)])
            .unwrap();
        let before = store.state();

        let result = store
            .writer
            .apply(&StreamKind::Recents, &[MetricRecord::new(6), MetricRecord::new(5)]);
        assert!(result.is_err());
        assert_eq!(store.state(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn recents_stream_accumulates() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(page(&[102, 101, 100]));
        transport.push_reply(page(&[104, 103]));
        transport.set_fallback(page(&[]));
        let store = store(transport.clone());

        assert!(store.start_recents(4).unwrap());
        assert!(!store.start_recents(4).unwrap());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let state = store.state();
        assert_eq!(record_ts(&state.recents.items), vec![104, 103, 102, 101]);
        assert_eq!(state.recents.max_size, 4);

        let requests = transport.requests();
        assert_eq!(requests[0].params["from"], NOW - 86_400);
        assert_eq!(requests[1].params["from"], 103);
        assert_eq!(store.running_streams(), vec![StreamKind::Recents]);

        store.stop_all().await;
        assert!(store.running_streams().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_leaves_state_and_backs_off() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(page(&[100]));
        transport.push_reply(MockReply::Transport("connection reset".into()));
        transport.set_fallback(page(&[]));
        let store = store(transport.clone());

        store.start_recents(10).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let after_failure = store.state();
        assert_eq!(record_ts(&after_failure.recents.items), vec![100]);

        // The retry after the failure comes 5s later, not 1s.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(transport.request_count(), 2);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(transport.request_count(), 3);
        assert_eq!(transport.requests()[2].params["from"], 101);
        assert_eq!(store.state(), after_failure);

        store.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dashboard_stream_tracks_latest() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(page(&[500]));
        transport.set_fallback(page(&[]));
        let store = store(transport.clone());

        assert!(store.start_dashboard("node-a"));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let state = store.state();
        let latest = state.dashboard_for("node-a").unwrap();
        assert_eq!(latest.timestamp, 500);
        assert_eq!(latest.source, "node-a");

        let requests = transport.requests();
        assert_eq!(requests[0].params["limit"], 1);
        assert_eq!(requests[0].params["src"], "node-a");
        assert_eq!(requests[1].params["from"], 501);

        assert!(store.stop_dashboard("node-a"));
        assert!(!store.stop_dashboard("node-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resumes_from_state_cursor() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(page(&[200]));
        transport.set_fallback(page(&[]));
        let store = store(transport.clone());

        store.start_recents(10).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.stop_recents());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let before = transport.request_count();
        assert!(store.start_recents(10).unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.requests()[before].params["from"], 201);

        store.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_with_smaller_limit_shrinks_buffer() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reply(page(&[109, 108, 107, 106, 105, 104, 103, 102, 101, 100]));
        transport.set_fallback(page(&[]));
        let store = store(transport);

        store.start_recents(10).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.state().recents.items.len(), 10);
        assert!(store.stop_recents());

        store.start_recents(3).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let recents = store.state().recents;
        assert_eq!(recents.max_size, 3);
        assert_eq!(record_ts(&recents.items), vec![109, 108, 107]);
        assert_eq!(recents.cursor, Some(110));

        store.stop_all().await;
    }

    #[tokio::test]
    async fn zero_recents_limit_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        let store = store(transport.clone());

        let err = store.start_recents(0).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(store.running_streams().is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streams_poll_independently() {
        let transport = Arc::new(MockTransport::new());
        transport.set_fallback(page(&[]));
        transport.set_latency(Duration::from_millis(2000));
        let store = store(transport.clone());

        store.start_recents(10).unwrap();
        store.start_dashboard("");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(transport.max_in_flight(), 2);
        assert_eq!(store.running_streams().len(), 2);
        store.stop_all().await;
    }

    #[tokio::test]
    async fn keep_incoming_policy_is_configurable() {
        let transport = Arc::new(MockTransport::new());
        let config = ClientConfig::default().with_duplicate_policy(DuplicatePolicy::KeepIncoming);
        let store = store_with(transport, config);

        store
            .writer
            .apply(&StreamKind::Recents, &[MetricRecord::new(5).with_value("cpu", 1.0)])
            .unwrap();
        store
            .writer
            .apply(&StreamKind::Recents, &[MetricRecord::new(5).with_value("cpu", 2.0)])
            .unwrap();

        let state = store.state();
        assert_eq!(state.recents.items.len(), 1);
        assert_eq!(state.recents.items[0].value("cpu"), Some(2.0));
    }
}
