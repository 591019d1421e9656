//! A single exam session: two role slots, relay and the expiry timer

use super::connection::Connection;
use crate::config::BrokerConfig;
use crate::question::QuestionSource;
use bytes::Bytes;
use examrelay_shared::{Notice, Role};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

/// Slot and timer state, guarded by the session lock
struct SlotState {
    examiner: Option<Arc<Connection>>,
    user: Option<Arc<Connection>>,
    /// Set the first time both slots are occupied; never reset
    paired_at: Option<Instant>,
    expiry: Option<JoinHandle<()>>,
    expired: bool,
    /// Evicted from the registry; joins are refused
    retired: bool,
    /// Examiner messages seen so far
    turn: u64,
    last_activity: Instant,
}

impl SlotState {
    fn slot_mut(&mut self, role: Role) -> &mut Option<Arc<Connection>> {
        match role {
            Role::Examiner => &mut self.examiner,
            Role::User => &mut self.user,
        }
    }

    fn slot(&self, role: Role) -> Option<&Arc<Connection>> {
        match role {
            Role::Examiner => self.examiner.as_ref(),
            Role::User => self.user.as_ref(),
        }
    }

    fn occupants(&self) -> Vec<Arc<Connection>> {
        self.examiner.iter().chain(self.user.iter()).cloned().collect()
    }
}

/// Pairing of at most one examiner and one user under a shared identifier
pub struct Session {
    id: String,
    created_at: Instant,
    config: Arc<BrokerConfig>,
    questions: Arc<dyn QuestionSource>,
    state: Mutex<SlotState>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        config: Arc<BrokerConfig>,
        questions: Arc<dyn QuestionSource>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            created_at: now,
            config,
            questions,
            state: Mutex::new(SlotState {
                examiner: None,
                user: None,
                paired_at: None,
                expiry: None,
                expired: false,
                retired: false,
                turn: 0,
                last_activity: now,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Occupy the slot for `connection.role()`
    ///
    /// Returns `false` if the slot is taken (or the session was evicted).
    /// The first time both slots are filled the expiry timer is armed and
    /// both participants are told the session started. Slot, pairing time and
    /// timer handle change together under the session lock.
    pub fn join(self: &Arc<Self>, connection: Arc<Connection>) -> bool {
        let role = connection.role();
        let started = {
            let mut state = self.state.lock();
            if state.retired {
                return false;
            }
            let slot = state.slot_mut(role);
            if slot.is_some() {
                debug!(session_id = %self.id, %role, addr = %connection.addr(), "slot already occupied");
                return false;
            }
            *slot = Some(connection.clone());

            let now = Instant::now();
            state.last_activity = now;

            if state.examiner.is_some() && state.user.is_some() && state.paired_at.is_none() {
                state.paired_at = Some(now);
                // Spawning only schedules the task, it never runs inline
                state.expiry = Some(self.arm_expiry(now + self.config.session_duration()));
                Some(state.occupants())
            } else {
                None
            }
        };

        info!(session_id = %self.id, %role, addr = %connection.addr(), "participant joined");

        if let Some(occupants) = started {
            info!(session_id = %self.id, duration = ?self.config.session_duration(), "session started");
            deliver(&occupants, Notice::SessionStarted.to_bytes());
        }

        true
    }

    fn arm_expiry(self: &Arc<Self>, deadline: Instant) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            sleep_until(deadline).await;
            session.fire_expiry();
        })
    }

    fn fire_expiry(&self) {
        let occupants = {
            let mut state = self.state.lock();
            state.expired = true;
            state.occupants()
        };
        info!(session_id = %self.id, recipients = occupants.len(), "session time expired");
        deliver(&occupants, Notice::Expired.to_bytes());
    }

    /// Vacate the departing connection's slot
    ///
    /// Only clears the slot when its occupant has the same address, so a
    /// late cleanup cannot evict a newer participant. The expiry timer keeps
    /// running and the session stays registered.
    pub fn leave(&self, connection: &Connection) -> bool {
        let role = connection.role();
        let mut state = self.state.lock();
        let matches = state
            .slot(role)
            .is_some_and(|occupant| occupant.addr() == connection.addr());

        if matches {
            *state.slot_mut(role) = None;
            state.last_activity = Instant::now();
            info!(session_id = %self.id, %role, addr = %connection.addr(), "participant left");
        } else {
            debug!(session_id = %self.id, %role, addr = %connection.addr(), "stale leave ignored");
        }
        matches
    }

    /// Route a message from `from` to the other slot
    ///
    /// An examiner message asks the question source for the next question and
    /// delivers it to the user. A user message is forwarded verbatim to the
    /// examiner when user relay is enabled. Returns whether anything was
    /// enqueued; an empty peer slot is not an error.
    pub async fn relay(&self, from: Role, payload: Bytes) -> bool {
        match from {
            Role::Examiner => {
                let (user, turn) = {
                    let mut state = self.state.lock();
                    state.last_activity = Instant::now();
                    let Some(user) = state.user.clone() else {
                        debug!(session_id = %self.id, "no user to receive next question");
                        return false;
                    };
                    state.turn += 1;
                    (user, state.turn)
                };

                debug!(session_id = %self.id, turn, bytes = payload.len(), "examiner requested next question");

                match self.questions.next_question(&self.id, turn).await {
                    Ok(question) => user.send_notice(&Notice::NextQuestion(question)),
                    Err(e) => {
                        warn!(session_id = %self.id, turn, "question source failed: {:#}", e);
                        false
                    }
                }
            }
            Role::User => {
                if !self.config.relay_user_messages {
                    return false;
                }
                let examiner = {
                    let mut state = self.state.lock();
                    state.last_activity = Instant::now();
                    state.examiner.clone()
                };
                match examiner {
                    Some(examiner) => examiner.send(payload),
                    None => false,
                }
            }
        }
    }

    /// Enqueue `payload` on every occupied slot; returns how many accepted it
    pub fn broadcast(&self, payload: Bytes) -> usize {
        let occupants = self.state.lock().occupants();
        deliver(&occupants, payload)
    }

    /// Whether both slots have ever been occupied at the same time
    pub fn is_paired(&self) -> bool {
        self.state.lock().paired_at.is_some()
    }

    pub fn paired_at(&self) -> Option<Instant> {
        self.state.lock().paired_at
    }

    /// Whether the expiry notice has been sent
    pub fn is_expired(&self) -> bool {
        self.state.lock().expired
    }

    pub fn has_expiry_timer(&self) -> bool {
        self.state.lock().expiry.is_some()
    }

    /// Both slots empty
    pub fn is_vacant(&self) -> bool {
        let state = self.state.lock();
        state.examiner.is_none() && state.user.is_none()
    }

    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Address of the current occupant of `role`
    pub fn occupant(&self, role: Role) -> Option<SocketAddr> {
        self.state.lock().slot(role).map(|c| c.addr())
    }

    /// Mark the session as evicted if it is vacant and idle for at least `ttl`
    ///
    /// Called by the registry while it holds its own lock.
    pub(crate) fn retire_if_idle(&self, ttl: Duration) -> bool {
        let mut state = self.state.lock();
        let vacant = state.examiner.is_none() && state.user.is_none();
        if vacant && state.last_activity.elapsed() >= ttl {
            state.retired = true;
        }
        state.retired
    }
}

fn deliver(recipients: &[Arc<Connection>], payload: Bytes) -> usize {
    recipients
        .iter()
        .filter(|conn| conn.send(payload.clone()))
        .count()
}
