//! Per-connection control loop shared by both transport bindings
//!
//! This module handles:
//! - Establishing identity and joining the addressed session
//! - Routing inbound messages strictly by the role recorded at join
//! - Leaving the session exactly once when the connection closes
//!
//! The TCP and WebSocket bindings only differ in framing and in where the
//! identity comes from.

pub mod tcp;
pub mod ws;

use crate::config::BrokerConfig;
use crate::error::DispatchError;
use crate::session::{Connection, Session, SessionRegistry};
use bytes::Bytes;
use examrelay_shared::state_machine::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine, TransitionResult,
};
use examrelay_shared::{Identity, IdentityError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Joins connections to sessions and routes their messages
pub struct ConnectionDispatcher {
    registry: Arc<SessionRegistry>,
    config: Arc<BrokerConfig>,
}

impl ConnectionDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, config: Arc<BrokerConfig>) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Join `connection` to the session named by `identity`
    ///
    /// A session evicted by the idle sweeper between lookup and join is
    /// looked up again so the participant lands in the live entry.
    pub fn establish(
        &self,
        identity: &Identity,
        connection: &Arc<Connection>,
    ) -> Result<Arc<Session>, DispatchError> {
        loop {
            let session = self.registry.lookup_or_create(&identity.session_id);
            if session.join(connection.clone()) {
                return Ok(session);
            }
            if !session.is_retired() {
                return Err(DispatchError::SlotOccupied {
                    role: identity.role,
                    session_id: identity.session_id.clone(),
                });
            }
            debug!(session_id = %identity.session_id, "session evicted during join, retrying");
        }
    }
}

struct Joined {
    session: Arc<Session>,
    connection: Arc<Connection>,
}

/// State of one live connection, driven by its reader task
///
/// Dropping the driver closes it, so `Session::leave` runs even if the
/// reader task unwinds.
pub struct ConnectionDriver {
    dispatcher: Arc<ConnectionDispatcher>,
    addr: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    fsm: ConnectionStateMachine,
    joined: Option<Joined>,
}

impl ConnectionDriver {
    pub fn new(
        dispatcher: Arc<ConnectionDispatcher>,
        addr: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            dispatcher,
            addr,
            outbound,
            fsm: ConnectionStateMachine::new(),
            joined: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.fsm.state()
    }

    /// Handle the identity message or parameters
    ///
    /// On failure the client has been sent a notice and the connection is
    /// closed; the caller must stop reading.
    pub fn identify(
        &mut self,
        identity: Result<Identity, IdentityError>,
    ) -> Result<(), DispatchError> {
        let result = identity
            .map_err(DispatchError::from)
            .and_then(|identity| self.join(identity));

        match result {
            Ok(()) => {
                self.fsm.process_event(ConnectionEvent::IdentityAccepted);
                Ok(())
            }
            Err(e) => {
                let event = match &e {
                    DispatchError::SlotOccupied { .. } => ConnectionEvent::SlotConflict,
                    _ => ConnectionEvent::IdentityRejected,
                };
                if let Some(notice) = e.notice() {
                    // Best effort, the queue is fresh so this only fails if the writer died
                    let _ = self.outbound.try_send(notice.to_bytes());
                }
                self.fsm.process_event(event);
                Err(e)
            }
        }
    }

    fn join(&mut self, identity: Identity) -> Result<(), DispatchError> {
        let connection = Arc::new(Connection::new(
            identity.role,
            self.addr,
            self.outbound.clone(),
        ));
        let session = self.dispatcher.establish(&identity, &connection)?;
        self.joined = Some(Joined {
            session,
            connection,
        });
        Ok(())
    }

    /// Route one inbound message by the role recorded at join time
    pub async fn on_message(&mut self, payload: Bytes) {
        match self.fsm.process_event(ConnectionEvent::MessageReceived) {
            TransitionResult::Success(ConnectionState::Active) => {}
            other => {
                debug!(addr = %self.addr, "message ignored: {:?}", other);
                return;
            }
        }

        if let Some(joined) = &self.joined {
            joined
                .session
                .relay(joined.connection.role(), payload)
                .await;
        }
    }

    /// Transition to closed, leaving the session if this connection joined one
    pub fn close(&mut self) {
        match self.fsm.process_event(ConnectionEvent::TransportClosed) {
            TransitionResult::Closed { leave_session } => {
                if let Some(joined) = self.joined.take() {
                    if leave_session {
                        joined.session.leave(&joined.connection);
                    }
                    let dropped = joined.connection.drop_count();
                    if dropped > 0 {
                        warn!(addr = %self.addr, dropped, "connection closed with dropped messages");
                    }
                }
                info!(addr = %self.addr, "connection closed");
            }
            // Already closed by a rejection
            _ => {
                self.joined = None;
            }
        }
    }
}

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        if !self.fsm.is_closed() {
            self.close();
        }
    }
}
