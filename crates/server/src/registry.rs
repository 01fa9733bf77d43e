//! Session registry
//!
//! The one piece of mutable state shared across call tasks. Exactly one
//! session exists per call id; a second `start` for a live id is
//! rejected, and eviction is idempotent.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use voicebridge_agent::CallSession;
use voicebridge_core::CallId;

use crate::ServerError;

/// Call id to live session map.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<CallId, Arc<CallSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session. Fails with `DuplicateSession` if the call
    /// id is already live; the existing session is left untouched.
    pub fn insert(&self, call_id: CallId, session: Arc<CallSession>) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write();
        match sessions.entry(call_id) {
            Entry::Occupied(entry) => Err(ServerError::DuplicateSession(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::info!(call_id = %entry.key(), "registered session");
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn get(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.sessions.read().get(call_id).cloned()
    }

    /// Evict a session. Returns `None` when the id was already gone, so
    /// double teardown is harmless.
    pub fn remove(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        let removed = self.sessions.write().remove(call_id);
        if removed.is_some() {
            tracing::info!(%call_id, "evicted session");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<CallId> {
        self.sessions.read().keys().cloned().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
