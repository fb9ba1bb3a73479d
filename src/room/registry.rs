//! Single source of truth for which participants this client holds a
//! connection to.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::connection::PeerConnectionEntry;
use crate::peer::ParticipantId;

/// At most one entry per participant id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ParticipantId, PeerConnectionEntry>,
    generations: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh tag for the next entry's events.
    pub fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&PeerConnectionEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut PeerConnectionEntry> {
        self.entries.get_mut(id)
    }

    /// The entry for `id`, but only if it is the one that raised events
    /// tagged with `generation`.
    pub fn live_mut(&mut self, id: &ParticipantId, generation: u64) -> Option<&mut PeerConnectionEntry> {
        self.entries.get_mut(id).filter(|e| e.generation() == generation)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert `entry` unless its participant already has one. A rejected
    /// entry is dropped, which closes its native connection.
    pub fn put(&mut self, entry: PeerConnectionEntry) -> bool {
        if self.entries.contains_key(entry.id()) {
            debug!(peer = %entry.id(), "connection already registered, discarding duplicate");
            return false;
        }
        info!(peer = %entry.id(), role = %entry.role(), total = self.entries.len() + 1, "registered peer");
        self.entries.insert(entry.id().clone(), entry);
        true
    }

    /// Close and forget the entry for `id`. Returns whether one existed.
    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        match self.entries.remove(id) {
            Some(mut entry) => {
                entry.close();
                info!(peer = %id, remaining = self.entries.len(), "removed peer");
                true
            }
            None => false,
        }
    }

    /// Close every entry and clear the registry, returning who was removed.
    pub fn close_all(&mut self) -> Vec<ParticipantId> {
        let mut closed = Vec::with_capacity(self.entries.len());
        for (id, mut entry) in self.entries.drain() {
            entry.close();
            closed.push(id);
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "closed all peer connections");
        }
        closed
    }

    pub fn ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PeerConnectionEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
