//! Test fixtures: records, pages and fully wired clients.

use crate::server::FakeServer;
use metricsync_engine::{Client, ClientConfig, FixedClock};
use metricsync_protocol::{MetricRecord, Timestamp};
use std::sync::Arc;

/// Fixed "now" used by fixture clients.
pub const FIXTURE_NOW: Timestamp = 1_700_000_000;

/// Username of the fixture account.
pub const ADMIN: &str = "admin";

/// Password of the fixture account.
pub const ADMIN_PASSWORD: &str = "secret";

/// Creates a record with a `cpu` value derived from its timestamp.
pub fn record(timestamp: Timestamp) -> MetricRecord {
    MetricRecord::new(timestamp).with_value("cpu", (timestamp % 100) as f64 / 100.0)
}

/// Creates `count` consecutive records starting at `start`, oldest first.
pub fn series(start: Timestamp, count: usize) -> Vec<MetricRecord> {
    (0..count as i64).map(|i| record(start + i)).collect()
}

/// Creates `count` consecutive records for one source.
pub fn source_series(source: &str, start: Timestamp, count: usize) -> Vec<MetricRecord> {
    series(start, count)
        .into_iter()
        .map(|r| r.with_source(source))
        .collect()
}

/// Returns the timestamps of a buffer.
pub fn timestamps(records: &[MetricRecord]) -> Vec<Timestamp> {
    records.iter().map(|r| r.timestamp).collect()
}

/// A server with the fixture account.
pub fn fake_server() -> FakeServer {
    FakeServer::new().with_account(1, ADMIN, ADMIN_PASSWORD)
}

/// Client configuration pointing at the fake server, with default timings.
pub fn fixture_config() -> ClientConfig {
    ClientConfig::new("http://fake.test/api")
}

/// A client wired over `server` with the clock fixed at `FIXTURE_NOW`.
pub fn fake_client(server: &FakeServer) -> Client {
    fake_client_with(server, fixture_config())
}

/// A client wired over `server` with custom configuration.
pub fn fake_client_with(server: &FakeServer, config: ClientConfig) -> Client {
    Client::with_http_client_and_clock(
        config,
        server.clone(),
        Arc::new(FixedClock::new(FIXTURE_NOW)),
    )
    .expect("fixture config is valid")
}
