//! Errors local to a single connection.

use examrelay_shared::{codec::CodecError, IdentityError, Notice, Role};
use thiserror::Error;

/// Why a connection left the dispatcher loop early
///
/// None of these are fatal to the registry or to the peer connection.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("{role} slot in session {session_id} is already occupied")]
    SlotOccupied { role: Role, session_id: String },

    #[error("framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Notice to send the client before closing, if any
    pub fn notice(&self) -> Option<Notice> {
        match self {
            DispatchError::Identity(e) => Some(Notice::InvalidIdentity(e.to_string())),
            DispatchError::SlotOccupied { role, .. } => Some(Notice::RoleOccupied(*role)),
            DispatchError::Codec(_) | DispatchError::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices() {
        let err = DispatchError::SlotOccupied {
            role: Role::Examiner,
            session_id: "xyz".into(),
        };
        assert_eq!(err.notice(), Some(Notice::RoleOccupied(Role::Examiner)));
        assert_eq!(err.to_string(), "examiner slot in session xyz is already occupied");

        let err = DispatchError::from(IdentityError::MissingSessionId);
        assert_eq!(
            err.notice().unwrap().to_string(),
            "ERROR: invalid identity: missing session identifier"
        );

        let err = DispatchError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(err.notice().is_none());
    }
}
