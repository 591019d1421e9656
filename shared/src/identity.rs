//! Identity handshake grammar
//!
//! TCP clients announce themselves with a single line `<role>/<sessionId>`.
//! WebSocket clients pass the same two values as `role` and `room` query
//! parameters. The role is always explicit.

use std::str::FromStr;
use thiserror::Error;

use crate::{limits::MAX_SESSION_ID_LENGTH, Role};

/// Separator between role and session identifier in the identity line
pub const SEPARATOR: char = '/';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("empty identity message")]
    Empty,

    #[error("missing role in {0:?} (expected <role>/<session>)")]
    MissingRole(String),

    #[error("unknown role {0:?}")]
    UnknownRole(String),

    #[error("missing session identifier")]
    MissingSessionId,

    #[error("invalid session identifier {0:?}")]
    InvalidSessionId(String),
}

/// Who a connection is and which session it wants to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: Role,
    pub session_id: String,
}

impl Identity {
    pub fn new(role: Role, session_id: impl Into<String>) -> Self {
        Self {
            role,
            session_id: session_id.into(),
        }
    }

    /// Parse a TCP identity line
    pub fn parse_line(line: &str) -> Result<Self, IdentityError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(IdentityError::Empty);
        }

        let (role, session_id) = line
            .split_once(SEPARATOR)
            .ok_or_else(|| IdentityError::MissingRole(line.to_string()))?;

        Ok(Self {
            role: role.parse()?,
            session_id: validate_session_id(session_id)?,
        })
    }

    /// Build an identity from WebSocket query parameters; both are required
    pub fn from_params(role: Option<&str>, room: Option<&str>) -> Result<Self, IdentityError> {
        let role = match role.map(str::trim) {
            Some(r) if !r.is_empty() => Role::from_str(r)?,
            _ => return Err(IdentityError::MissingRole(String::new())),
        };
        let session_id = validate_session_id(room.unwrap_or_default())?;

        Ok(Self { role, session_id })
    }

    /// Render as the line a TCP client sends (without terminator)
    pub fn to_line(&self) -> String {
        format!("{}{}{}", self.role, SEPARATOR, self.session_id)
    }
}

fn validate_session_id(raw: &str) -> Result<String, IdentityError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(IdentityError::MissingSessionId);
    }
    if id.len() > MAX_SESSION_ID_LENGTH
        || id.contains(SEPARATOR)
        || id.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(IdentityError::InvalidSessionId(id.to_string()));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_examiner_line() {
        let identity = Identity::parse_line("examiner/abc123").unwrap();
        assert_eq!(identity, Identity::new(Role::Examiner, "abc123"));
    }

    #[test]
    fn test_parse_user_line_with_whitespace() {
        let identity = Identity::parse_line("  user/abc123 \r").unwrap();
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.session_id, "abc123");

        let identity = Identity::parse_line("student/xyz").unwrap();
        assert_eq!(identity.role, Role::User);
    }

    #[test]
    fn test_bare_session_id_is_rejected() {
        assert_eq!(
            Identity::parse_line("abc123"),
            Err(IdentityError::MissingRole("abc123".into()))
        );
        assert_eq!(Identity::parse_line("   "), Err(IdentityError::Empty));
    }

    #[test]
    fn test_bad_session_ids() {
        assert_eq!(
            Identity::parse_line("examiner/"),
            Err(IdentityError::MissingSessionId)
        );
        assert!(matches!(
            Identity::parse_line("examiner/a/b"),
            Err(IdentityError::InvalidSessionId(_))
        ));
        assert!(matches!(
            Identity::parse_line("user/a b"),
            Err(IdentityError::InvalidSessionId(_))
        ));
        let long = format!("user/{}", "x".repeat(MAX_SESSION_ID_LENGTH + 1));
        assert!(matches!(
            Identity::parse_line(&long),
            Err(IdentityError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn test_from_params() {
        let identity = Identity::from_params(Some("student"), Some("room-7")).unwrap();
        assert_eq!(identity, Identity::new(Role::User, "room-7"));

        assert!(matches!(
            Identity::from_params(None, Some("room-7")),
            Err(IdentityError::MissingRole(_))
        ));
        assert_eq!(
            Identity::from_params(Some("examiner"), None),
            Err(IdentityError::MissingSessionId)
        );
        assert!(matches!(
            Identity::from_params(Some("admin"), Some("room-7")),
            Err(IdentityError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_to_line_parses_back() {
        let identity = Identity::new(Role::Examiner, "abc");
        assert_eq!(identity.to_line(), "examiner/abc");
        assert_eq!(Identity::parse_line(&identity.to_line()).unwrap(), identity);
    }
}
