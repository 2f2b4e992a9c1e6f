//! # Kraken Testkit
//!
//! Test utilities for the Kraken live dashboard.
//!
//! This crate provides:
//! - Cluster fixtures and push frame builders
//! - An in-memory controller with failure toggles and a request log
//! - Property-based test generators using proptest
//! - A worker harness for end-to-end tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kraken_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn reaches_polling() {
//!     let mut harness = LiveHarness::start(SimulatedCluster::new(3), Transport::Poll);
//!     let snapshot = harness.mode(LiveConnectionMode::Polling).await;
//!     assert_eq!(snapshot.nodes.len(), 3);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cluster::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use kraken_live::{LiveConnectionMode, Transport};
}

pub use cluster::*;
pub use fixtures::*;
pub use generators::*;
pub use harness::*;
