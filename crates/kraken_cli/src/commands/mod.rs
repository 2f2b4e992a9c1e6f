//! CLI command implementations.

pub mod power;
pub mod watch;
