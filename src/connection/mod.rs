//! Connection management for the exam client
//!
//! This module handles:
//! - Persistent TCP connection to the relay with automatic reconnection
//! - Sending the identity line first on every (re)connect
//! - Line-delimited bidirectional message streaming

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager};
