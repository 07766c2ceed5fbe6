//! Start line: OCS flags before the gun, start signal or general recall at it

use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::collision::Capsule;
use super::course::{Course, Leg};
use super::state::{BoatState, RacePhase, RaceState};

/// Start-line outcome for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartEvent {
    /// Boat crossed onto the course side before the gun
    Ocs { boat: Uuid },
    /// Boat returned fully below the line
    OcsCleared { boat: Uuid },
    /// Clean start: nobody over at the gun
    StartSignal,
    /// Boats still over at the gun
    GeneralRecall { boats: Vec<Uuid> },
}

/// Whether any part of the hull is over the start line on the course side.
/// `None` when the course has no start line.
pub fn over_start_line(course: &Course, boat: &BoatState) -> Option<bool> {
    let start_leg = course
        .legs
        .iter()
        .position(|leg| matches!(leg, Leg::Start { .. }))?;
    let line = course.start_line()?;
    let course_side = course
        .next_leg(start_leg, boat.lap)
        .and_then(|next| course.waypoint(next))
        .map(|p| line.side_sign(p))
        .unwrap_or(1.0);
    let hull = Capsule::of(boat);
    Some(line.is_over(course_side, &[hull.bow, hull.stern]))
}

/// OCS bookkeeping
#[derive(Debug, Clone, Default)]
pub struct StartLineTracker {
    /// Over/under on the previous tick, per boat
    was_over: BTreeMap<Uuid, bool>,
}

impl StartLineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.was_over.clear();
    }

    pub fn update(&mut self, state: &mut RaceState) -> Vec<StartEvent> {
        let mut events = Vec::new();
        let phase = state.phase;
        let course = &state.course;
        let boats = &mut state.boats;
        self.was_over.retain(|id, _| boats.contains_key(id));

        for boat in boats.values_mut() {
            // Only boats that have not started yet care about the line
            if boat.finished || !matches!(course.leg(boat.next_mark_index), Some(Leg::Start { .. })) {
                self.was_over.remove(&boat.id);
                continue;
            }
            let Some(over) = over_start_line(course, boat) else {
                continue;
            };
            let was_over = self.was_over.insert(boat.id, over).unwrap_or(false);

            if phase == RacePhase::Prestart && over && !was_over && !boat.over_early {
                boat.over_early = true;
                debug!(boat_id = %boat.id, "Boat over the line early");
                events.push(StartEvent::Ocs { boat: boat.id });
            } else if boat.over_early && !over {
                boat.over_early = false;
                debug!(boat_id = %boat.id, "OCS boat cleared");
                events.push(StartEvent::OcsCleared { boat: boat.id });
            }
        }

        if phase == RacePhase::Running && !state.start_signal_sent {
            state.start_signal_sent = true;
            let over: Vec<Uuid> = state
                .boats
                .values()
                .filter(|b| b.over_early)
                .map(|b| b.id)
                .collect();
            if over.is_empty() {
                info!(race_id = %state.race_id, "Start signal");
                events.push(StartEvent::StartSignal);
            } else {
                info!(race_id = %state.race_id, count = over.len(), "General recall");
                events.push(StartEvent::GeneralRecall { boats: over });
            }
        }
        events
    }
}
