//! # Kraken Protocol
//!
//! Node model and controller wire types for the Kraken live dashboard.
//!
//! This crate provides:
//! - `Node` and its physical/run state enums
//! - Typed attribute blocks (extensions and services)
//! - `MergedNode`, the read-only CFG + DSC view
//! - Controller payloads (node lists, topology graphs, state enumerables,
//!   push socket bootstrap)
//! - Push frame decoding into a closed set of `PushEvent` variants
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod graph;
mod node;
mod push;

pub use error::{ProtocolError, ProtocolResult};
pub use graph::{Graph, SocketBootstrap, StateCategory};
pub use node::{Block, BlockKind, MergedNode, Node, NodeList, PhysState, RunState};
pub use push::{decode_frame, Channel, PushEvent, RawPushEvent, SubscribeCommand};
