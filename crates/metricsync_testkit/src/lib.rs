//! # Metricsync Testkit
//!
//! Test utilities for metricsync.
//!
//! This crate provides:
//! - An in-memory metrics API (`FakeServer`) that plugs in as an `HttpClient`
//! - Record and client fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metricsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_server() {
//!     let server = fake_server();
//!     server.insert(series(100, 5));
//!     let client = fake_client(&server);
//!     client.session().login(ADMIN, ADMIN_PASSWORD).await.unwrap();
//!     // ... start streams, observe state
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
