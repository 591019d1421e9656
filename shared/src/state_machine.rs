//! Connection State Machine
//!
//! Defines the valid lifecycle of a relay connection:
//!
//! ```text
//! AwaitingIdentity -> Active -> Closed
//!        \________________________^
//! ```
//!
//! The machine guarantees that a connection which joined a session asks to
//! leave it exactly once, no matter how many close paths fire.

/// Lifecycle of a single relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the identity message or parameters
    AwaitingIdentity,
    /// Joined a session; messages are relayed by role
    Active,
    /// Terminal
    Closed,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Identity parsed and the session accepted the join
    IdentityAccepted,
    /// Identity message or parameters were malformed
    IdentityRejected,
    /// The requested role slot is already occupied
    SlotConflict,
    /// An inbound message arrived
    MessageReceived,
    /// Read error, peer close or shutdown
    TransportClosed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and the connection is in the given state
    Success(ConnectionState),
    /// The connection just closed; `leave_session` is set when it held a slot
    Closed { leave_session: bool },
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: ConnectionEvent,
    },
}

/// State machine driven by a connection dispatcher
#[derive(Debug)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Create a new state machine awaiting identity
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::AwaitingIdentity,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn is_closed(&self) -> bool {
        self.current_state == ConnectionState::Closed
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ConnectionEvent) -> TransitionResult {
        use ConnectionEvent::*;
        use ConnectionState::*;

        let from = self.current_state;
        match (from, event) {
            (AwaitingIdentity, IdentityAccepted) => {
                self.current_state = Active;
                TransitionResult::Success(Active)
            }
            (Active, MessageReceived) => TransitionResult::Success(Active),

            // Never joined, nothing to release
            (AwaitingIdentity, IdentityRejected | SlotConflict | TransportClosed) => {
                self.current_state = Closed;
                TransitionResult::Closed {
                    leave_session: false,
                }
            }
            (Active, TransportClosed) => {
                self.current_state = Closed;
                TransitionResult::Closed {
                    leave_session: true,
                }
            }

            _ => TransitionResult::Invalid { from, event },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::AwaitingIdentity);
        assert!(!fsm.is_closed());
    }

    #[test]
    fn test_normal_flow() {
        let mut fsm = ConnectionStateMachine::new();

        let result = fsm.process_event(ConnectionEvent::IdentityAccepted);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Active));

        let result = fsm.process_event(ConnectionEvent::MessageReceived);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Active));

        let result = fsm.process_event(ConnectionEvent::TransportClosed);
        assert_eq!(result, TransitionResult::Closed { leave_session: true });
        assert!(fsm.is_closed());
    }

    #[test]
    fn test_leave_requested_exactly_once() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(ConnectionEvent::IdentityAccepted);

        assert_eq!(
            fsm.process_event(ConnectionEvent::TransportClosed),
            TransitionResult::Closed { leave_session: true }
        );
        assert!(matches!(
            fsm.process_event(ConnectionEvent::TransportClosed),
            TransitionResult::Invalid { from: ConnectionState::Closed, .. }
        ));
    }

    #[test]
    fn test_rejections_close_without_leave() {
        for event in [
            ConnectionEvent::IdentityRejected,
            ConnectionEvent::SlotConflict,
            ConnectionEvent::TransportClosed,
        ] {
            let mut fsm = ConnectionStateMachine::new();
            assert_eq!(
                fsm.process_event(event),
                TransitionResult::Closed { leave_session: false }
            );
            assert_eq!(fsm.state(), ConnectionState::Closed);
        }
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = ConnectionStateMachine::new();

        // Messages are not relayed before identity is established
        let result = fsm.process_event(ConnectionEvent::MessageReceived);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::AwaitingIdentity);

        // A second identity after joining is not accepted
        fsm.process_event(ConnectionEvent::IdentityAccepted);
        let result = fsm.process_event(ConnectionEvent::IdentityAccepted);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Active);
    }
}
