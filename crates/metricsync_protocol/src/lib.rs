//! # Metricsync Protocol
//!
//! Wire types for the remote metrics API consumed by `metricsync_engine`.
//!
//! This crate provides:
//! - `MetricRecord`, one timestamped row of the metrics feed
//! - Query/response messages for `GET /metrics`
//! - Session messages for `/login`
//! - JSON encoding/decoding helpers
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ErrorBody, LoginRequest, MetricsQuery, MetricsResponse, User};
pub use record::{MetricRecord, Timestamp};
