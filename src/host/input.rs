//! Per-boat input buffer, drained once per tick

use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use crate::bus::{BoatInput, InputCommand};
use crate::race::state::BoatState;
use crate::util::geometry::normalize_deg;

/// Controls collected for one boat since the last tick.
/// Later inputs overwrite earlier ones field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingInput {
    /// Highest sequence number folded in
    pub seq: u64,
    pub desired_heading_deg: Option<f32>,
    pub spin: bool,
    pub vmg_mode: Option<bool>,
    pub blow_sails: Option<bool>,
}

impl PendingInput {
    fn merge(&mut self, seq: u64, command: InputCommand) {
        self.seq = self.seq.max(seq);
        match command {
            InputCommand::Heading {
                desired_heading_deg,
            } => {
                self.desired_heading_deg = Some(normalize_deg(desired_heading_deg));
                // Steering by hand leaves the autopilot
                self.vmg_mode = Some(false);
            }
            InputCommand::Spin => self.spin = true,
            InputCommand::VmgMode { enabled } => self.vmg_mode = Some(enabled),
            InputCommand::BlowSails { enabled } => self.blow_sails = Some(enabled),
        }
    }

    /// Write the controls into the boat. Returns whether a spin was asked for.
    /// Inputs not newer than the last one the boat saw are ignored.
    pub fn apply(&self, boat: &mut BoatState) -> bool {
        if self.seq <= boat.last_input_seq {
            return false;
        }
        boat.last_input_seq = self.seq;
        if let Some(heading) = self.desired_heading_deg {
            boat.desired_heading_deg = heading;
        }
        if let Some(vmg) = self.vmg_mode {
            boat.vmg_mode = vmg;
        }
        if let Some(blow) = self.blow_sails {
            boat.blow_sails = blow;
        }
        self.spin
    }
}

/// Last-write-wins buffer keyed by boat
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    pending: BTreeMap<Uuid, PendingInput>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an input. Returns false if it was dropped.
    pub fn submit(&mut self, input: &BoatInput) -> bool {
        if let InputCommand::Heading {
            desired_heading_deg,
        } = input.command
        {
            if !desired_heading_deg.is_finite() {
                warn!(boat_id = %input.boat_id, seq = input.seq, "Dropping non-finite heading");
                return false;
            }
        }
        let entry = self.pending.entry(input.boat_id).or_default();
        if input.seq < entry.seq {
            warn!(
                boat_id = %input.boat_id,
                seq = input.seq,
                buffered = entry.seq,
                "Dropping out-of-order input"
            );
            return false;
        }
        entry.merge(input.seq, input.command);
        true
    }

    /// Take everything buffered since the last drain
    pub fn drain(&mut self) -> BTreeMap<Uuid, PendingInput> {
        std::mem::take(&mut self.pending)
    }

    pub fn forget(&mut self, boat: &Uuid) {
        self.pending.remove(boat);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn input(boat: Uuid, seq: u64, command: InputCommand) -> BoatInput {
        BoatInput {
            boat_id: boat,
            seq,
            client_ts_ms: 0,
            command,
        }
    }

    #[test]
    fn later_inputs_win_field_by_field() {
        let boat = Uuid::new_v4();
        let mut buffer = InputBuffer::new();
        assert!(buffer.submit(&input(boat, 1, InputCommand::VmgMode { enabled: true })));
        assert!(buffer.submit(&input(
            boat,
            2,
            InputCommand::Heading {
                desired_heading_deg: -30.0
            }
        )));
        assert!(buffer.submit(&input(boat, 3, InputCommand::BlowSails { enabled: true })));
        assert!(!buffer.submit(&input(boat, 2, InputCommand::Spin)));

        let drained = buffer.drain();
        assert!(buffer.is_empty());
        let pending = &drained[&boat];
        assert_eq!(pending.seq, 3);
        assert_eq!(pending.desired_heading_deg, Some(330.0));
        assert_eq!(pending.vmg_mode, Some(false));
        assert_eq!(pending.blow_sails, Some(true));
        assert!(!pending.spin);
    }

    #[test]
    fn non_finite_heading_is_dropped() {
        let boat = Uuid::new_v4();
        let mut buffer = InputBuffer::new();
        assert!(!buffer.submit(&input(
            boat,
            1,
            InputCommand::Heading {
                desired_heading_deg: f32::NAN
            }
        )));
        assert!(buffer.is_empty());
    }

    #[test]
    fn stale_sequence_does_not_touch_the_boat() {
        let mut boat = BoatState::new(Uuid::new_v4(), "b".into(), false, Vec2::ZERO, 0.0);
        boat.last_input_seq = 10;
        let pending = PendingInput {
            seq: 9,
            desired_heading_deg: Some(90.0),
            ..Default::default()
        };
        assert!(!pending.apply(&mut boat));
        assert_eq!(boat.desired_heading_deg, 0.0);

        let pending = PendingInput {
            seq: 11,
            desired_heading_deg: Some(90.0),
            spin: true,
            ..Default::default()
        };
        assert!(pending.apply(&mut boat));
        assert_eq!(boat.desired_heading_deg, 90.0);
        assert_eq!(boat.last_input_seq, 11);
    }
}
