//! Exam relay broker
//!
//! Pairs one examiner and one user under a shared session identifier,
//! relays their messages for the session's duration and broadcasts an
//! expiry notice when the time window closes. Two transport bindings share
//! the same core: newline-delimited TCP and WebSocket rooms.

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod question;
pub mod session;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::DispatchError;
pub use question::{PlaceholderQuestions, QuestionSource};
pub use session::{Connection, Session, SessionRegistry};
