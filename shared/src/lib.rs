//! Exam Relay Shared Protocol Types
//!
//! This crate provides the wire vocabulary shared between the relay broker
//! and its clients: participant roles, server notices, the identity grammar
//! and the newline codec used by the TCP binding.

pub mod codec;
pub mod identity;
pub mod state_machine;

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

pub use identity::{Identity, IdentityError};

/// Default limits for the broker
pub mod limits {
    /// Time from full pairing until the expiry notice is broadcast
    pub const SESSION_DURATION_SECS: u64 = 60;

    /// Capacity of each connection's outbound queue
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

    /// Longest accepted line on the TCP binding, excluding the terminator
    pub const MAX_LINE_LENGTH: usize = 64 * 1024;

    /// Longest accepted session identifier
    pub const MAX_SESSION_ID_LENGTH: usize = 128;

    /// Sessions with no occupants are evicted after this much inactivity
    pub const IDLE_SESSION_TTL_SECS: u64 = 300;

    /// How often the idle sweeper runs
    pub const SWEEP_INTERVAL_SECS: u64 = 30;
}

/// The two positions a participant can take inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The proctor driving the exam
    Examiner,
    /// The student answering questions
    User,
}

impl Role {
    /// The role on the other side of the session
    pub fn peer(self) -> Role {
        match self {
            Role::Examiner => Role::User,
            Role::User => Role::Examiner,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Examiner => "examiner",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    /// `student` is accepted as an alias for `user` (WebSocket clients send it)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "examiner" => Ok(Role::Examiner),
            "user" | "student" => Ok(Role::User),
            other => Err(IdentityError::UnknownRole(other.to_string())),
        }
    }
}

/// Control notices originated by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Both slots are occupied and the clock is running
    SessionStarted,
    /// The session's time window has elapsed
    Expired,
    /// The next question for the user
    NextQuestion(String),
    /// The requested slot already has an occupant
    RoleOccupied(Role),
    /// The identity message or parameters could not be parsed
    InvalidIdentity(String),
}

impl Notice {
    /// Render the notice as an outbound payload (no line terminator)
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SessionStarted => write!(f, "Session started"),
            Notice::Expired => write!(f, "Time expired"),
            Notice::NextQuestion(question) => write!(f, "Next question: {}", question),
            Notice::RoleOccupied(Role::Examiner) => write!(f, "WARNING: Examiner exists"),
            Notice::RoleOccupied(Role::User) => write!(f, "WARNING: User exists"),
            Notice::InvalidIdentity(reason) => write!(f, "ERROR: invalid identity: {}", reason),
        }
    }
}
