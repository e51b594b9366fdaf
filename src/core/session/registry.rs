//! Process-wide table of active sessions keyed by call identifier.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use super::handle::{SessionHandle, SessionSummary};
use crate::errors::EndReason;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("A session is already registered for call {0}")]
    Duplicate(String),
}

/// Sharded concurrent map of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Fails if the call id is already present.
    pub fn insert(&self, handle: Arc<SessionHandle>) -> Result<(), RegistryError> {
        match self.sessions.entry(handle.call_id().to_string()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(handle.call_id().to_string())),
            Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(call_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, call_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(call_id).map(|(_, handle)| handle)
    }

    /// Remove `handle` only if it is still the registered session for its call.
    pub fn remove_if_same(&self, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .remove_if(handle.call_id(), |_, registered| Arc::ptr_eq(registered, handle))
            .is_some()
    }

    /// Deregister and tear down a session. Returns false if nothing was torn down.
    pub fn teardown(&self, call_id: &str, reason: EndReason) -> bool {
        match self.remove(call_id) {
            Some(handle) => handle.teardown(reason),
            None => false,
        }
    }

    /// Tear down every registered session. Returns how many were stopped.
    pub fn shutdown_all(&self, reason: EndReason) -> usize {
        let call_ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        call_ids
            .iter()
            .filter(|call_id| self.teardown(call_id, reason.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.sessions.contains_key(call_id)
    }

    /// Summaries of all sessions, ordered by call id.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut summaries: Vec<SessionSummary> = handles.iter().map(|h| h.summary()).collect();
        summaries.sort_by(|a, b| a.call_id.cmp(&b.call_id));
        summaries
    }
}
