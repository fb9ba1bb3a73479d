use std::collections::HashMap;

use crate::peer::ParticipantId;

/// Room identity plus what the roster has told us about other participants.
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    id: String,
    local_name: String,
    names: HashMap<ParticipantId, String>,
}

impl RoomState {
    pub fn new(id: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_name: local_name.into(),
            names: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Only join notifications carry a name; blank names are not recorded.
    pub fn remember(&mut self, peer: &ParticipantId, name: Option<String>) {
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            self.names.insert(peer.clone(), name);
        }
    }

    pub fn forget(&mut self, peer: &ParticipantId) {
        self.names.remove(peer);
    }

    pub fn display_name(&self, peer: &ParticipantId) -> Option<&str> {
        self.names.get(peer).map(String::as_str)
    }
}
