//! Session registry mapping identifiers to live sessions

use super::pairing::Session;
use crate::config::BrokerConfig;
use crate::question::QuestionSource;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Manages all sessions, created lazily on first reference
///
/// One lock guards the map; every call holds it for O(1) work and never
/// across I/O.
pub struct SessionRegistry {
    /// Map of session_id -> session
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    config: Arc<BrokerConfig>,
    questions: Arc<dyn QuestionSource>,
}

impl SessionRegistry {
    /// Create a new registry; sessions it creates share `config` and `questions`
    pub fn new(config: Arc<BrokerConfig>, questions: Arc<dyn QuestionSource>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            questions,
        }
    }

    /// Get the session for `id`, creating it if this is the first reference
    pub fn lookup_or_create(&self, id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(id) {
            return session.clone();
        }

        let session = Arc::new(Session::new(id, self.config.clone(), self.questions.clone()));
        sessions.insert(id.to_string(), session.clone());
        info!(session_id = id, "session created");
        session
    }

    /// Get a session without creating it
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Remove a session
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.lock().remove(id);
        if removed.is_some() {
            debug!(session_id = id, "session removed");
        }
        removed
    }

    /// Evict vacant sessions idle for at least `ttl` and return their IDs
    pub fn sweep_idle(&self, ttl: Duration) -> Vec<String> {
        let mut sessions = self.sessions.lock();
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.retire_if_idle(ttl))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            if let Some(session) = sessions.remove(id) {
                debug!(session_id = %id, age = ?session.created_at().elapsed(), "session evicted");
            }
        }
        idle
    }

    /// Get list of all session IDs
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Get the number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
