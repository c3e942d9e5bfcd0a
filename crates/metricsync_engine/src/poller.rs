//! Recurring poller state machine.
//!
//! A poller drives one logical stream: fetch the page after its cursor, hand
//! the records to a `StreamSink`, then wait and repeat. The wait is scheduled
//! only after the previous fetch resolved, so a stream never has two fetches
//! in flight.
//!
//! ```text
//! Idle -> Polling -> Succeeded -> Scheduled -> Polling -> ...
//!                 \-> Failed   -/
//! ```
//!
//! Success waits `interval`, failure waits `failure_interval`. The cursor
//! only moves on success.

use crate::config::{PollerConfig, StreamConfig};
use crate::error::{SyncError, SyncResult};
use crate::fetcher::{MetricsFetcher, StreamFilter};
use metricsync_protocol::{MetricRecord, Timestamp};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Logical stream driven by a poller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    /// Bounded buffer of the most recent records.
    Recents,
    /// Latest record for one source filter (empty = unfiltered).
    Dashboard {
        /// Source filter.
        source: String,
    },
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Recents => write!(f, "recents"),
            StreamKind::Dashboard { source } if source.is_empty() => write!(f, "dashboard"),
            StreamKind::Dashboard { source } => write!(f, "dashboard[{source}]"),
        }
    }
}

/// The current state of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Created, no poll attempted yet.
    Idle,
    /// A fetch is in flight.
    Polling,
    /// The last poll succeeded.
    Succeeded,
    /// The last poll failed.
    Failed,
    /// Waiting for the next poll.
    Scheduled,
    /// The loop has exited.
    Stopped,
}

/// Statistics about poll cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Total number of poll cycles started.
    pub polls: u64,
    /// Cycles that fetched and merged successfully.
    pub successes: u64,
    /// Cycles that failed.
    pub failures: u64,
    /// Failures that retrying cannot fix (4xx, decode, merge conflicts).
    pub fatal_failures: u64,
    /// Total number of records handed to the sink.
    pub records_received: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Snapshot of a poller's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSession {
    /// Stream being polled.
    pub kind: StreamKind,
    /// `from` of the next fetch; `None` until the first record arrives.
    pub cursor: Option<Timestamp>,
    /// Delay after a success.
    pub interval: Duration,
    /// Delay after a failure.
    pub failure_interval: Duration,
    /// Set while the loop task is alive.
    pub running: bool,
    /// Current state.
    pub state: PollState,
    /// Counters.
    pub stats: PollStats,
}

/// Receives fetched records. The only path by which polled data reaches state.
pub trait StreamSink: Send + Sync {
    /// Folds a page into the stream's state. Returns true if state changed.
    ///
    /// An error fails the poll cycle; the cursor stays where it was.
    fn apply(&self, kind: &StreamKind, records: &[MetricRecord]) -> SyncResult<bool>;
}

/// Drives one stream.
pub struct Poller {
    kind: StreamKind,
    fetcher: MetricsFetcher,
    sink: Arc<dyn StreamSink>,
    limit: usize,
    filter: StreamFilter,
    config: PollerConfig,
    session: Arc<RwLock<PollSession>>,
}

impl Poller {
    /// Creates a poller for `kind`.
    pub fn new(
        kind: StreamKind,
        fetcher: MetricsFetcher,
        sink: Arc<dyn StreamSink>,
        stream: &StreamConfig,
        config: PollerConfig,
    ) -> Self {
        let session = PollSession {
            kind: kind.clone(),
            cursor: None,
            interval: config.interval,
            failure_interval: config.failure_interval,
            running: false,
            state: PollState::Idle,
            stats: PollStats::default(),
        };
        Self {
            kind,
            fetcher,
            sink,
            limit: stream.limit,
            filter: StreamFilter::from(stream),
            config,
            session: Arc::new(RwLock::new(session)),
        }
    }

    /// Starts from a known cursor instead of the backfill window.
    pub fn with_cursor(self, cursor: Timestamp) -> Self {
        self.session.write().cursor = Some(cursor);
        self
    }

    /// Returns the stream kind.
    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }

    /// Returns a snapshot of the session.
    pub fn session(&self) -> PollSession {
        self.session.read().clone()
    }

    /// Runs one cycle and returns the delay before the next one.
    ///
    /// Never fails: errors are logged, counted and turned into the failure delay.
    pub async fn poll_once(&self) -> Duration {
        let cursor = {
            let mut session = self.session.write();
            session.state = PollState::Polling;
            session.stats.polls += 1;
            session.cursor
        };

        match self.cycle(cursor).await {
            Ok((count, next_cursor)) => {
                let mut session = self.session.write();
                session.state = PollState::Succeeded;
                session.stats.successes += 1;
                session.stats.records_received += count as u64;
                session.stats.last_error = None;
                if let Some(next) = next_cursor {
                    session.cursor = Some(session.cursor.map_or(next, |c| c.max(next)));
                }
                debug!(stream = %self.kind, count, cursor = ?session.cursor, "poll succeeded");
                self.config.interval
            }
            Err(e) => {
                let retryable = e.is_retryable();
                if retryable {
                    warn!(stream = %self.kind, error = %e, "poll failed, backing off");
                } else {
                    error!(stream = %self.kind, error = %e, "poll failed, will not recover by itself");
                }
                let mut session = self.session.write();
                session.state = PollState::Failed;
                session.stats.failures += 1;
                if !retryable {
                    session.stats.fatal_failures += 1;
                }
                session.stats.last_error = Some(e.to_string());
                self.config.failure_interval
            }
        }
    }

    async fn cycle(&self, cursor: Option<Timestamp>) -> SyncResult<(usize, Option<Timestamp>)> {
        let fetch = self.fetcher.fetch_since(cursor, self.limit, &self.filter);
        let deadline = self.config.fetch_timeout(self.filter.watch);
        let records = tokio::time::timeout(deadline, fetch)
            .await
            .map_err(|_| SyncError::Timeout)??;

        if records.is_empty() {
            return Ok((0, None));
        }

        self.sink.apply(&self.kind, &records)?;
        let next_cursor = records.iter().map(MetricRecord::next_cursor).max();
        Ok((records.len(), next_cursor))
    }

    fn set_state(&self, state: PollState) {
        self.session.write().state = state;
    }

    /// Spawns the recurring loop on the current tokio runtime.
    ///
    /// The loop runs until `PollHandle::stop` is called or the handle is dropped.
    pub fn spawn(self) -> PollHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let session = Arc::clone(&self.session);
        let kind = self.kind.clone();
        session.write().running = true;
        info!(stream = %kind, "poller started");

        let task = tokio::spawn(async move {
            loop {
                let delay = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    delay = self.poll_once() => delay,
                };

                self.set_state(PollState::Scheduled);
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let mut session = self.session.write();
            session.running = false;
            session.state = PollState::Stopped;
            info!(stream = %self.kind, polls = session.stats.polls, "poller stopped");
        });

        PollHandle {
            kind,
            session,
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to a running poller.
pub struct PollHandle {
    kind: StreamKind,
    session: Arc<RwLock<PollSession>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Returns the stream kind.
    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }

    /// Returns a snapshot of the session.
    pub fn session(&self) -> PollSession {
        self.session.read().clone()
    }

    /// Returns true while the loop task is alive.
    pub fn is_running(&self) -> bool {
        self.session.read().running
    }

    /// Asks the loop to exit. An in-flight fetch is abandoned.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(stream = %self.kind, error = %e, "poller task ended abnormally");
        }
    }
}

impl fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollHandle")
            .field("kind", &self.kind)
            .field("session", &*self.session.read())
            .finish()
    }
}
