//! Message types carried by the race bus
//! Transport framing is left to whatever carries the bus

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One control input from a boat's owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoatInput {
    pub boat_id: Uuid,
    /// Increases with every input the client sends
    pub seq: u64,
    /// Client wall clock when the input was made
    pub client_ts_ms: u64,
    #[serde(flatten)]
    pub command: InputCommand,
}

/// What the input asks for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputCommand {
    /// Steer to a compass heading (turns VMG mode off)
    Heading { desired_heading_deg: f32 },
    /// Start a penalty spin
    Spin,
    /// Let the autopilot sail the best VMG angle on the current tack
    VmgMode { enabled: bool },
    /// Ease the sails right out
    BlowSails { enabled: bool },
}

/// Role a client announces on the presence channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Connected, role not settled yet
    Online,
    Host,
    Player,
    Spectator,
    /// Leaving; drops the retained entry
    Offline,
}

/// Retained heartbeat, last one per client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub client_id: Uuid,
    pub status: PresenceStatus,
    /// Host term the sender believes in
    pub epoch: u64,
    pub sent_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_is_tagged_and_flat() {
        let input = BoatInput {
            boat_id: Uuid::nil(),
            seq: 4,
            client_ts_ms: 100,
            command: InputCommand::Heading {
                desired_heading_deg: 42.0,
            },
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["type"], "heading");
        assert_eq!(json["desired_heading_deg"], 42.0);
        assert_eq!(json["seq"], 4);

        let back: BoatInput = serde_json::from_value(json).unwrap();
        assert_eq!(back, input);

        let spin: BoatInput = serde_json::from_str(
            r#"{"boat_id":"00000000-0000-0000-0000-000000000000","seq":5,"client_ts_ms":0,"type":"spin"}"#,
        )
        .unwrap();
        assert_eq!(spin.command, InputCommand::Spin);
    }
}
