//! Host-only race control commands

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::race::state::RacePhase;
use crate::race::wake::WakeParamsPatch;

/// Longest countdown that can be armed (seconds)
pub const MAX_COUNTDOWN_SECS: f32 = 600.0;

/// Commands applied by the host at the next tick boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Start the countdown; the gun fires `seconds` from now
    ArmCountdown { seconds: f32 },
    /// Back to prestart with every boat on its spawn slot
    ResetRace,
    JoinBoat { id: Uuid, name: String, bot: bool },
    LeaveBoat { id: Uuid },
    /// Runtime wake tuning
    SetWakeParams { patch: WakeParamsPatch },
    SetFixedWind { fixed: bool },

    // Debug
    JumpToMark { boat: Uuid, leg: usize },
    SetLap { boat: Uuid, lap: u32 },
    ForceFinish { boat: Uuid },
}

/// Why a control command was refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("this client is not the host")]
    NotHost,

    #[error("host loop is not running")]
    LoopStopped,

    #[error("unknown boat {0}")]
    UnknownBoat(Uuid),

    #[error("boat {0} has already joined")]
    DuplicateBoat(Uuid),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not allowed while the race is {0:?}")]
    WrongPhase(RacePhase),
}
