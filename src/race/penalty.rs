//! Penalty spin state machine
//!
//! A boat with an outstanding penalty may request a 360° turn. While turning
//! it has no right of way. Once the turn is complete the clearance fires at a
//! fixed tick, so nothing depends on timers that could outlive a reset.

use serde::{Deserialize, Serialize};

use super::state::BoatState;

/// Heading change needed to clear one penalty
pub const SPIN_DEGREES: f32 = 360.0;

/// Ticks between finishing the turn and the penalty clearing
pub const SPIN_SETTLE_TICKS: u64 = 10;

/// Per-boat spin state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SpinState {
    #[default]
    Idle,
    Spinning {
        /// Absolute heading change accumulated so far
        turned_deg: f32,
        /// +1 clockwise, -1 counter-clockwise
        direction: f32,
    },
    Settling {
        fires_at_tick: u64,
    },
}

impl SpinState {
    pub fn is_spinning(&self) -> bool {
        matches!(self, SpinState::Spinning { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SpinState::Idle)
    }
}

/// What changed for a boat this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinTransition {
    Started,
    TurnCompleted,
    Cleared,
}

/// Start a spin if the boat owes a penalty and is not already spinning
pub fn request_spin(boat: &mut BoatState, wind_dir_deg: f32) -> Option<SpinTransition> {
    if boat.penalties == 0 || !boat.spin.is_idle() || boat.finished {
        return None;
    }
    // Turn away from the wind first
    let direction = if boat.twa(wind_dir_deg) >= 0.0 { 1.0 } else { -1.0 };
    boat.spin = SpinState::Spinning {
        turned_deg: 0.0,
        direction,
    };
    boat.rights_suspended = true;
    Some(SpinTransition::Started)
}

/// Advance the state machine once per tick
pub fn advance(boat: &mut BoatState, tick: u64) -> Option<SpinTransition> {
    match boat.spin {
        SpinState::Idle => None,
        SpinState::Spinning { turned_deg, .. } => {
            if turned_deg >= SPIN_DEGREES {
                boat.spin = SpinState::Settling {
                    fires_at_tick: tick + SPIN_SETTLE_TICKS,
                };
                Some(SpinTransition::TurnCompleted)
            } else {
                None
            }
        }
        SpinState::Settling { fires_at_tick } => {
            if tick >= fires_at_tick {
                boat.spin = SpinState::Idle;
                boat.penalties = boat.penalties.saturating_sub(1);
                boat.rights_suspended = false;
                Some(SpinTransition::Cleared)
            } else {
                None
            }
        }
    }
}

/// Drop any spin in progress (race reset)
pub fn cancel(boat: &mut BoatState) {
    boat.spin = SpinState::Idle;
    boat.rights_suspended = false;
}
