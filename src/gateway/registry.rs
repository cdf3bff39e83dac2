//! Phone → live session map.
//!
//! The lock guards single map operations only and is never held across an
//! await. Everything else about a session goes through its actor's mailbox.

use super::machine::{CreationContext, SessionState};
use super::session::SessionCommand;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use wabridge_core::error::GatewayError;

/// Cloneable reference to a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub phone: String,
    pub line_id: Option<String>,
    pub context: CreationContext,
    /// Distinguishes this instance from earlier and later sessions of the same phone.
    pub generation: u64,
    pub state: watch::Receiver<SessionState>,
    pub commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert `handle` unless its phone already has a live session.
    pub fn put(&self, handle: SessionHandle) -> Result<(), GatewayError> {
        let mut map = self.map();
        if map.contains_key(&handle.phone) {
            return Err(GatewayError::AlreadyExists(handle.phone));
        }
        map.insert(handle.phone.clone(), handle);
        Ok(())
    }

    pub fn get(&self, phone: &str) -> Option<SessionHandle> {
        self.map().get(phone).cloned()
    }

    pub fn remove(&self, phone: &str) -> Option<SessionHandle> {
        self.map().remove(phone)
    }

    /// Remove the entry only while it still belongs to `generation`.
    pub fn remove_if(&self, phone: &str, generation: u64) -> bool {
        let mut map = self.map();
        if map.get(phone).is_some_and(|h| h.generation == generation) {
            map.remove(phone);
            true
        } else {
            false
        }
    }

    pub fn is_current(&self, phone: &str, generation: u64) -> bool {
        self.map()
            .get(phone)
            .is_some_and(|h| h.generation == generation)
    }

    pub fn phones(&self) -> Vec<String> {
        let mut phones: Vec<String> = self.map().keys().cloned().collect();
        phones.sort();
        phones
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }
}
