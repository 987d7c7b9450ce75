use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    key: String,
    seq: u64,
}

impl LoadTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct KeyState {
    issued: u64,
    completed: u64,
}

/// Orders overlapping loads of the same resource so that a slow, older response never
/// overwrites the result of a newer one that already landed.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    keys: Mutex<HashMap<String, KeyState>>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: &str) -> LoadTicket {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let state = keys.entry(key.to_string()).or_default();
        state.issued += 1;
        LoadTicket {
            key: key.to_string(),
            seq: state.issued,
        }
    }

    /// Records the ticket's response. Returns `false` when a newer ticket for the same key has
    /// already completed, in which case the response must be discarded.
    pub fn complete(&self, ticket: &LoadTicket) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let state = keys.entry(ticket.key.clone()).or_default();
        if ticket.seq <= state.completed {
            info!(
                "Discarding stale response for {} (request {} < {})",
                ticket.key, ticket.seq, state.completed
            );
            return false;
        }
        state.completed = ticket.seq;
        true
    }

    /// Whether no newer request for the key has been issued since this ticket.
    pub fn is_latest(&self, ticket: &LoadTicket) -> bool {
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.get(&ticket.key)
            .is_some_and(|state| state.issued == ticket.seq)
    }
}
