//! Session Registry
//!
//! Thread-safe session table using DashMap for concurrent access. Holds no network
//! resources: each slot only carries the handles needed to reach its controller task.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use super::types::{SessionCommand, SessionEntry, SessionInfo};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session {0} is shutting down")]
    Closing(String),
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Install the entry built by `init` under `id`, terminating any session already there.
    ///
    /// `init` runs while the slot is locked, so concurrent creates for one id are ordered.
    /// Returns the new entry's generation.
    pub fn create_or_replace<F>(&self, id: &str, init: F) -> u64
    where
        F: FnOnce() -> SessionEntry,
    {
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = init();
                let generation = entry.generation;
                let old = occupied.insert(entry);
                old.terminate();
                info!(
                    "Session {} replaced (generation {} -> {})",
                    id, old.generation, generation
                );
                generation
            }
            Entry::Vacant(vacant) => {
                let entry = init();
                let generation = entry.generation;
                vacant.insert(entry);
                info!("Session {} registered (generation {})", id, generation);
                generation
            }
        }
    }

    /// Session info by id
    pub fn lookup(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|entry| SessionInfo::from(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove and terminate a session. Removing an absent id is a no-op.
    ///
    /// Returns the removed session's generation.
    pub fn remove(&self, id: &str) -> Option<u64> {
        self.sessions.remove(id).map(|(_, entry)| {
            entry.terminate();
            info!("Session {} removed from registry", id);
            entry.generation
        })
    }

    /// Remove `id` only if it still holds `generation`
    pub fn remove_if_generation(&self, id: &str, generation: u64) -> bool {
        match self
            .sessions
            .remove_if(id, |_, entry| entry.generation == generation)
        {
            Some((_, entry)) => {
                entry.terminate();
                debug!("Session {} generation {} removed", id, generation);
                true
            }
            None => false,
        }
    }

    /// Queue a command for the session's controller, in FIFO order
    pub async fn send_command(&self, id: &str, command: SessionCommand) -> Result<(), RegistryError> {
        // Clone the sender so no map guard is held across the await
        let cmd_tx = self
            .sessions
            .get(id)
            .map(|entry| entry.cmd_tx.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        cmd_tx
            .send(command)
            .await
            .map_err(|_| RegistryError::Closing(id.to_string()))
    }

    /// All sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo::from(entry.value()))
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove and terminate every session, returning `(id, generation)` pairs
    pub fn drain(&self) -> Vec<(String, u64)> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.remove(&id).map(|generation| (id, generation)))
            .collect()
    }
}
