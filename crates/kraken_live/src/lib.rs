//! # Kraken Live
//!
//! Live connection state machine for the Kraken cluster dashboard.
//!
//! This crate provides:
//! - Connection modes (refetch → polling | websocket, reconnect on failure)
//! - CFG and DSC node collections with validation and merging
//! - Push event decoding into the session mirrors
//! - Node power control
//! - Controller and push socket transport abstractions
//! - A worker that runs the machine on tokio and talks to its host through
//!   typed messages
//!
//! ## Architecture
//!
//! [`LiveMachine`] is a pure reducer: every input (host control, timer tick,
//! fetch result, socket event) returns the actions to perform. The engine
//! behind [`LiveWorker`] performs them and feeds the results back in, one at
//! a time.
//!
//! ## Key Invariants
//!
//! - At most one periodic timer runs, and only in `POLLING` or `RECONNECT`
//! - Results of a fetch issued before a mode change are discarded
//! - A push socket is open only in `WEBSOCKET` (and briefly in `REFETCH`)
//! - Every published snapshot differs from the previous one

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod decoder;
mod engine;
mod error;
mod http;
mod machine;
mod reconcile;
mod repository;
mod session;
mod store;
mod transport;

pub use config::{ConfigChanges, ConfigPatch, Endpoints, LiveConfig, Transport, MIN_REFRESH_SECS};
pub use decoder::{apply_batch, BatchOutcome};
pub use engine::perform_fetch;
pub use error::{LiveError, LiveResult};
pub use http::{HttpClient, HttpController, MockHttpClient};
pub use machine::{
    Action, Control, FetchOutcome, FetchRequest, FullFetch, GraphTarget, Input, LiveMachine,
    NodeWrite, PowerAction, Ticket, TimerKind,
};
pub use reconcile::{reconcile, validate, validate_collections, ValidationError};
pub use repository::{
    compare_nodes, fetch_collection, fetch_discovery_collection, merge_node, sort_collection,
    Collection,
};
pub use session::{LiveConnectionMode, SessionState, Snapshot, StateCounts};
pub use store::{LiveWorker, Outbox, WorkerEvent, WorkerRequest};
pub use transport::{
    Controller, MockConnection, MockConnector, PushConnector, PushSocket, SocketEvent,
    SocketEvents, SocketFailure,
};
