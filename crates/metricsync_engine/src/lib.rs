//! # Metricsync Engine
//!
//! Incremental polling sync of remote metrics into observable local state.
//!
//! This crate provides:
//! - A request primitive with typed errors and 401 notification
//! - A cursor-based fetcher for "records newer than X" pages
//! - Recurring pollers with fixed success/failure backoff
//! - A merge layer keeping bounded, newest-first buffers
//! - Observable state containers for the session and metrics sides
//!
//! ## Architecture
//!
//! ```text
//! Poller -> MetricsFetcher -> Transport -> server
//!    \-> StreamSink (merge) -> Observable<MetricState> -> subscribers
//! ```
//!
//! Each logical stream (recent records, one dashboard per source filter) has
//! its own poller with its own cursor. A poller only schedules its next fetch
//! after the previous one resolved.
//!
//! ## Key Invariants
//!
//! - Cursors never move backwards
//! - A failed poll leaves the stream's state untouched
//! - Buffers are newest first and never exceed their bound
//! - A 401 from any endpoint clears the session
//! - Subscribers are only notified of actual changes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod fetcher;
mod http;
mod merge;
mod observable;
mod poller;
mod session;
mod store;
mod transport;

pub use client::Client;
pub use config::{
    ClientConfig, PollerConfig, StreamConfig, DEFAULT_WATCH_SECS, ENV_BASE_URL,
    ENV_RECENTS_LIMIT, ENV_SOURCE, ENV_TIMEOUT_SECS, ENV_WATCH_SECS,
};
pub use error::{SyncError, SyncResult};
pub use fetcher::{
    Clock, FixedClock, MetricsFetcher, StreamFilter, SystemClock, BACKFILL_WINDOW_SECS,
    METRICS_PATH,
};
pub use http::{HttpClient, HttpRequest, HttpResponse, HttpTransport, ReqwestClient};
pub use merge::{is_ordered, merge, merge_latest, DuplicatePolicy, MergeOutcome};
pub use observable::{Listener, Observable, Subscription};
pub use poller::{PollHandle, PollSession, PollState, PollStats, Poller, StreamKind, StreamSink};
pub use session::{SessionClient, SessionState, SessionStore, LOGIN_PATH};
pub use store::{MetricState, MetricStore, StreamState};
pub use transport::{
    query_pairs, EventSink, Method, MockReply, MockTransport, RecordedRequest, RequestParams,
    Transport, TransportEvent,
};
