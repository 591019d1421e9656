//! Session management for paired exam participants
//!
//! This module handles:
//! - The registry of sessions keyed by identifier
//! - Role-slot assignment and stale-cleanup protection
//! - Relay and broadcast onto per-connection outbound queues
//! - The one-shot expiry timer and idle session eviction

mod connection;
mod pairing;
mod registry;
mod sweeper;

pub use connection::{run_line_writer, Connection};
pub use pairing::Session;
pub use registry::SessionRegistry;
pub use sweeper::IdleSweeper;
