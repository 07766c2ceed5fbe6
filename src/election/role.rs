//! Client roles

use serde::{Deserialize, Serialize};

use crate::bus::PresenceStatus;

/// What a client is doing in the race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Joined, still looking for a host
    Unassigned,
    /// Runs the authoritative loop
    Host,
    Player,
    Spectator,
}

impl Role {
    /// Status announced on the presence channel
    pub fn presence_status(self) -> PresenceStatus {
        match self {
            Role::Unassigned => PresenceStatus::Online,
            Role::Host => PresenceStatus::Host,
            Role::Player => PresenceStatus::Player,
            Role::Spectator => PresenceStatus::Spectator,
        }
    }
}
