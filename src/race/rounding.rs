//! Mark-rounding state machine
//!
//! Each leg is a sequence of stages. Mark legs use radials: half-lines from
//! the mark, ordered in the rounding direction, that the boat has to cross in
//! turn while close to the mark. Gates add a line-crossing stage that commits
//! the boat to one of the two marks. Start and finish legs are line crossings.
//!
//! If the boat slips past the radials (odd approach, big step near the mark),
//! a cumulative sweep of the bearing around the mark completes the leg
//! anyway. Radials are checked first; the sweep only runs when the leg did not
//! already complete this tick.

use glam::Vec2;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::util::geometry::{angle_diff, bearing_deg, normalize_deg, segment_intersection};

use super::course::{Course, Leg, Line, Rounding};
use super::start::over_start_line;
use super::state::{BoatState, RacePhase, RaceState};

/// Radials only count within this distance of the mark
pub const ZONE_RADIUS: f32 = 40.0;

/// Upper bound on the sweep needed for the fallback
pub const SWEEP_FALLBACK_DEG: f32 = 150.0;

/// Candidate radial offsets from the approach bearing
const RADIAL_STEPS: [f32; 3] = [90.0, 180.0, 270.0];

/// Last radial must sit at least this far before the exit bearing
const EXIT_CLEARANCE_DEG: f32 = 45.0;

/// Ephemeral per-boat progress through the current leg
#[derive(Debug, Clone, PartialEq)]
pub struct RoundingProgress {
    pub leg_index: usize,
    pub stage: usize,
    /// Rounding direction chosen at a gate
    pub gate_side: Option<Rounding>,
    /// Mark the boat is rounding (committed gate mark, or the leg's mark)
    pub active_mark_index: Option<usize>,
    /// Signed sweep around the active mark since the last stage
    pub sweep_deg: f32,
    /// Bearing from the active mark to the boat on the previous tick
    pub prev_bearing: Option<f32>,
    /// Line legs: whether the boat was over the line last tick
    line_was_over: Option<bool>,
    /// Gate fallback: mark the sweep is being measured around
    sweep_mark: Option<usize>,
}

impl RoundingProgress {
    fn new(leg_index: usize) -> Self {
        Self {
            leg_index,
            stage: 0,
            gate_side: None,
            active_mark_index: None,
            sweep_deg: 0.0,
            prev_bearing: None,
            line_was_over: None,
            sweep_mark: None,
        }
    }
}

/// Something that happened to a boat's course progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoundingEvent {
    StartCrossed { boat: Uuid },
    MarkRounded { boat: Uuid, leg: usize, by_sweep: bool },
    LapCompleted { boat: Uuid, lap: u32 },
    Finished { boat: Uuid, finish_time: f32 },
}

/// Radials and fallback threshold for one mark
#[derive(Debug, Clone, PartialEq)]
pub struct RadialPlan {
    pub mark_pos: Vec2,
    pub rounding: Rounding,
    /// Compass bearings (mark -> boat), in the order they must be crossed
    pub radials: Vec<f32>,
    pub sweep_threshold: f32,
}

impl RadialPlan {
    /// Build the plan from where the boat comes from and where it goes next
    pub fn new(mark_pos: Vec2, rounding: Rounding, approach: Option<Vec2>, exit: Option<Vec2>) -> Self {
        let sign = rounding.sweep_sign();
        let approach_deg = match (approach, exit) {
            (Some(a), _) => bearing_deg(mark_pos, a),
            (None, Some(e)) => normalize_deg(bearing_deg(mark_pos, e) + 180.0),
            (None, None) => 180.0,
        };
        let exit_deg = match exit {
            Some(e) => bearing_deg(mark_pos, e),
            None => normalize_deg(approach_deg + sign * 180.0),
        };

        let mut sweep = normalize_deg(sign * (exit_deg - approach_deg));
        if sweep < 1.0 {
            // Out and back the same way: a full turn
            sweep = 360.0;
        }

        let mut radials: Vec<f32> = RADIAL_STEPS
            .iter()
            .filter(|step| **step <= sweep - EXIT_CLEARANCE_DEG)
            .map(|step| normalize_deg(approach_deg + sign * step))
            .collect();
        if radials.is_empty() {
            radials.push(normalize_deg(approach_deg + sign * sweep * 0.5));
        }

        Self {
            mark_pos,
            rounding,
            radials,
            sweep_threshold: SWEEP_FALLBACK_DEG.min(0.8 * sweep),
        }
    }

    /// Progress past a radial, in degrees, positive once beyond it
    fn past(&self, radial: f32, bearing: f32) -> f32 {
        angle_diff(bearing, radial) * self.rounding.sweep_sign()
    }

    /// Did the move prev -> cur cross `radial` in the rounding direction
    /// while inside its sector and the zone
    pub fn crosses(&self, radial: f32, prev: Vec2, cur: Vec2) -> bool {
        if cur.distance(self.mark_pos) > ZONE_RADIUS {
            return false;
        }
        let before = self.past(radial, bearing_deg(self.mark_pos, prev));
        let after = self.past(radial, bearing_deg(self.mark_pos, cur));
        before < 0.0 && before >= -90.0 && after >= 0.0 && after <= 90.0
    }

    /// Signed sweep, positive in the rounding direction
    fn sweep_delta(&self, prev_bearing: f32, bearing: f32) -> f32 {
        angle_diff(bearing, prev_bearing) * self.rounding.sweep_sign()
    }
}

/// Per-boat rounding progress for one race. Rebuilt from scratch on reset
/// or host promotion; the durable leg index lives on the boat.
#[derive(Debug, Clone, Default)]
pub struct RoundingTracker {
    progress: BTreeMap<Uuid, RoundingProgress>,
}

impl RoundingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.progress.clear();
    }

    pub fn forget(&mut self, boat: &Uuid) {
        self.progress.remove(boat);
    }

    pub fn progress(&self, boat: &Uuid) -> Option<&RoundingProgress> {
        self.progress.get(boat)
    }

    /// Committed gate mark (or the leg mark) the boat is rounding
    pub fn committed_mark(&self, boat: &Uuid) -> Option<usize> {
        self.progress.get(boat).and_then(|p| p.active_mark_index)
    }

    /// Advance every unfinished boat and refresh targets and distances
    pub fn update(&mut self, state: &mut RaceState) -> Vec<RoundingEvent> {
        let mut events = Vec::new();
        let phase = state.phase;
        let t = state.t;
        let course = &state.course;
        let boats = &mut state.boats;

        self.progress.retain(|id, _| boats.contains_key(id));

        for boat in boats.values_mut() {
            if boat.finished {
                self.progress.remove(&boat.id);
                boat.distance_to_next_mark = 0.0;
                continue;
            }

            let entry = self
                .progress
                .entry(boat.id)
                .or_insert_with(|| RoundingProgress::new(boat.next_mark_index));
            if entry.leg_index != boat.next_mark_index {
                // Leg changed underneath us (debug jump, promotion)
                *entry = RoundingProgress::new(boat.next_mark_index);
            }

            let completed = match course.leg(boat.next_mark_index) {
                Some(Leg::Start { .. }) => step_start(entry, boat, course, phase),
                Some(Leg::Mark { mark, rounding }) => {
                    if phase == RacePhase::Running {
                        step_mark(entry, boat, course, *mark, *rounding)
                    } else {
                        None
                    }
                }
                Some(Leg::Gate {
                    port_mark,
                    starboard_mark,
                }) => {
                    if phase == RacePhase::Running {
                        step_gate(entry, boat, course, *port_mark, *starboard_mark)
                    } else {
                        None
                    }
                }
                Some(Leg::Finish { line }) => {
                    if phase == RacePhase::Running {
                        step_finish(boat, course, *line)
                    } else {
                        None
                    }
                }
                // Missing leg: no interaction
                None => None,
            };

            if let Some(by_sweep) = completed {
                complete_leg(boat, course, t, by_sweep, &mut events);
                self.progress.insert(boat.id, RoundingProgress::new(boat.next_mark_index));
            }

            // Targets refresh every tick
            let committed = self
                .progress
                .get(&boat.id)
                .and_then(|p| p.active_mark_index);
            boat.distance_to_next_mark = if boat.finished {
                0.0
            } else {
                course
                    .target_point(boat.next_mark_index, committed, boat.pos)
                    .map(|p| boat.pos.distance(p))
                    .unwrap_or(0.0)
            };
        }
        events
    }
}

fn step_start(progress: &mut RoundingProgress, boat: &BoatState, course: &Course, phase: RacePhase) -> Option<bool> {
    let over = over_start_line(course, boat)?;
    let was_over = progress.line_was_over.replace(over);

    if phase != RacePhase::Running || boat.over_early {
        return None;
    }
    match was_over {
        Some(false) if over => Some(false),
        _ => None,
    }
}

fn step_finish(boat: &BoatState, course: &Course, line: Line) -> Option<bool> {
    let approach = course
        .previous_leg(boat.next_mark_index, boat.lap)
        .and_then(|leg| course.waypoint(leg))
        .map(|p| line.side_sign(p))
        .unwrap_or(-line.side_sign(boat.pos));
    if line.side(boat.prev_pos) * approach <= 0.0 {
        return None;
    }
    segment_intersection(boat.prev_pos, boat.pos, line.pin, line.committee).map(|_| false)
}

fn plan_for(course: &Course, boat: &BoatState, leg: usize, mark: usize, rounding: Rounding, lap_after: u32) -> Option<RadialPlan> {
    let mark_pos = course.mark(mark)?.pos;
    let approach = course
        .previous_leg(leg, boat.lap)
        .and_then(|prev| course.waypoint(prev));
    let exit = course
        .next_leg(leg, lap_after)
        .and_then(|next| course.waypoint(next));
    Some(RadialPlan::new(mark_pos, rounding, approach, exit))
}

/// Cross as many radials as this move allows; then, if unfinished, run the
/// sweep fallback. Returns Some(by_sweep) when the rounding completes.
fn advance_radials(progress: &mut RoundingProgress, boat: &BoatState, plan: &RadialPlan, first_radial_stage: usize) -> Option<bool> {
    let mut advanced = false;
    loop {
        let Some(index) = progress.stage.checked_sub(first_radial_stage) else {
            break;
        };
        let Some(radial) = plan.radials.get(index) else {
            break;
        };
        if !plan.crosses(*radial, boat.prev_pos, boat.pos) {
            break;
        }
        progress.stage += 1;
        advanced = true;
        debug!(boat_id = %boat.id, stage = progress.stage, "Radial crossed");
    }

    let bearing = bearing_deg(plan.mark_pos, boat.pos);
    let prev_bearing = progress.prev_bearing.replace(bearing);
    if progress.stage >= first_radial_stage + plan.radials.len() {
        return Some(false);
    }
    if advanced {
        progress.sweep_deg = 0.0;
        return None;
    }
    if boat.pos.distance(plan.mark_pos) <= ZONE_RADIUS {
        if let Some(prev) = prev_bearing {
            progress.sweep_deg += plan.sweep_delta(prev, bearing);
        }
        if progress.sweep_deg >= plan.sweep_threshold {
            debug!(boat_id = %boat.id, sweep = progress.sweep_deg, "Rounding completed by sweep");
            return Some(true);
        }
    }
    None
}

fn step_mark(progress: &mut RoundingProgress, boat: &BoatState, course: &Course, mark: usize, rounding: Rounding) -> Option<bool> {
    let plan = plan_for(course, boat, boat.next_mark_index, mark, rounding, boat.lap)?;
    progress.active_mark_index = Some(mark);
    advance_radials(progress, boat, &plan, 0)
}

fn step_gate(
    progress: &mut RoundingProgress,
    boat: &BoatState,
    course: &Course,
    port_mark: usize,
    starboard_mark: usize,
) -> Option<bool> {
    let leg = boat.next_mark_index;
    let lap_after = boat.lap + 1;
    let port_pos = course.mark(port_mark)?.pos;
    let starboard_pos = course.mark(starboard_mark)?.pos;

    if progress.active_mark_index.is_none() {
        // Stage 0: pass between the marks from the approach side
        let gate_line = Line {
            pin: port_pos,
            committee: starboard_pos,
        };
        let approach_side = course
            .previous_leg(leg, boat.lap)
            .and_then(|prev| course.waypoint(prev))
            .map(|p| gate_line.side_sign(p));
        let from_approach = approach_side.map_or(true, |s| gate_line.side(boat.prev_pos) * s > 0.0);
        let crossing = segment_intersection(boat.prev_pos, boat.pos, port_pos, starboard_pos);

        if let (true, Some((_, u))) = (from_approach, crossing) {
            let (mark, side) = if u < 0.5 {
                (port_mark, Rounding::Port)
            } else {
                (starboard_mark, Rounding::Starboard)
            };
            debug!(boat_id = %boat.id, mark, side = ?side, "Gate committed");
            progress.active_mark_index = Some(mark);
            progress.gate_side = Some(side);
            progress.stage = 1;
            progress.sweep_deg = 0.0;
            progress.prev_bearing = None;
            progress.sweep_mark = None;
        } else {
            // Fallback around whichever gate mark is closer
            let (mark, mark_pos, rounding) = if boat.pos.distance(port_pos) <= boat.pos.distance(starboard_pos) {
                (port_mark, port_pos, Rounding::Port)
            } else {
                (starboard_mark, starboard_pos, Rounding::Starboard)
            };
            if progress.sweep_mark != Some(mark) {
                progress.sweep_mark = Some(mark);
                progress.sweep_deg = 0.0;
                progress.prev_bearing = None;
            }
            let plan = plan_for(course, boat, leg, mark, rounding, lap_after)?;
            let bearing = bearing_deg(mark_pos, boat.pos);
            let prev = progress.prev_bearing.replace(bearing);
            if boat.pos.distance(mark_pos) <= ZONE_RADIUS {
                if let Some(prev) = prev {
                    progress.sweep_deg += plan.sweep_delta(prev, bearing);
                }
                if progress.sweep_deg >= plan.sweep_threshold {
                    progress.active_mark_index = Some(mark);
                    progress.gate_side = Some(rounding);
                    debug!(boat_id = %boat.id, mark, "Gate completed by sweep");
                    return Some(true);
                }
            }
            return None;
        }
    }

    let mark = progress.active_mark_index?;
    let rounding = progress.gate_side.unwrap_or(Rounding::Port);
    let plan = plan_for(course, boat, leg, mark, rounding, lap_after)?;
    advance_radials(progress, boat, &plan, 1)
}

/// Apply a completed leg to the boat and record what happened
fn complete_leg(boat: &mut BoatState, course: &Course, t: f32, by_sweep: bool, events: &mut Vec<RoundingEvent>) {
    let leg_index = boat.next_mark_index;
    let leg = course.leg(leg_index);

    match leg {
        Some(Leg::Start { .. }) => events.push(RoundingEvent::StartCrossed { boat: boat.id }),
        Some(Leg::Mark { .. }) => events.push(RoundingEvent::MarkRounded {
            boat: boat.id,
            leg: leg_index,
            by_sweep,
        }),
        Some(Leg::Gate { .. }) => {
            events.push(RoundingEvent::MarkRounded {
                boat: boat.id,
                leg: leg_index,
                by_sweep,
            });
            boat.lap += 1;
            events.push(RoundingEvent::LapCompleted {
                boat: boat.id,
                lap: boat.lap,
            });
        }
        Some(Leg::Finish { .. }) | None => {}
    }

    match course.next_leg(leg_index, boat.lap) {
        Some(next) => boat.next_mark_index = next,
        None if boat.lap >= course.laps_to_finish => {
            boat.finished = true;
            boat.finish_time = Some(t);
            events.push(RoundingEvent::Finished {
                boat: boat.id,
                finish_time: t,
            });
        }
        None => {
            // Not allowed to finish yet
            boat.next_mark_index = course.loop_back_leg();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::state::Wind;
    use crate::util::geometry::heading_vec;

    fn race(laps: u32) -> RaceState {
        let mut s = RaceState::new(
            Uuid::new_v4(),
            1,
            Course::windward_leeward(0.0, laps, 400.0),
            Wind {
                direction_deg: 0.0,
                speed_kts: 12.0,
            },
            0.0,
        );
        s.phase = RacePhase::Running;
        s
    }

    fn add(state: &mut RaceState, pos: Vec2, leg: usize) -> Uuid {
        let id = Uuid::new_v4();
        let mut b = BoatState::new(id, "b".into(), false, pos, 0.0);
        b.next_mark_index = leg;
        state.boats.insert(id, b);
        id
    }

    fn move_to(state: &mut RaceState, id: Uuid, pos: Vec2) {
        let b = state.boats.get_mut(&id).unwrap();
        b.prev_pos = b.pos;
        b.pos = pos;
    }

    /// Walk a circle around `centre` from `from_deg` to `to_deg` (compass, mark -> boat)
    fn circle(state: &mut RaceState, tracker: &mut RoundingTracker, id: Uuid, centre: Vec2, radius: f32, from_deg: f32, to_deg: f32) -> Vec<RoundingEvent> {
        let mut events = Vec::new();
        let steps = ((to_deg - from_deg).abs() / 5.0).ceil() as i32;
        for i in 0..=steps {
            let deg = from_deg + (to_deg - from_deg) * i as f32 / steps as f32;
            move_to(state, id, centre + heading_vec(deg) * radius);
            events.extend(tracker.update(state));
        }
        events
    }

    #[test]
    fn windward_plan_has_three_radials() {
        let course = Course::windward_leeward(0.0, 2, 400.0);
        let b = BoatState::new(Uuid::nil(), "b".into(), false, Vec2::ZERO, 0.0);
        let plan = plan_for(&course, &b, 1, 0, Rounding::Port, 0).unwrap();
        assert_eq!(plan.radials.len(), 3);
        assert!((plan.radials[0] - 90.0).abs() < 1e-3);
        assert!(plan.radials[1].abs() < 1e-3 || (plan.radials[1] - 360.0).abs() < 1e-3);
        assert!((plan.radials[2] - 270.0).abs() < 1e-3);
        assert_eq!(plan.sweep_threshold, SWEEP_FALLBACK_DEG);
    }

    #[test]
    fn circling_the_windward_mark_advances_the_leg_once() {
        let mut s = race(2);
        let mark = s.course.mark(0).unwrap().pos;
        let id = add(&mut s, mark + heading_vec(150.0) * 20.0, 1);
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);

        // Port rounding: bearing from the mark decreases 150 -> -160 (= 200)
        let events = circle(&mut s, &mut tracker, id, mark, 20.0, 150.0, -160.0);
        let rounded: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, RoundingEvent::MarkRounded { .. }))
            .collect();
        assert_eq!(rounded.len(), 1);
        assert!(matches!(rounded[0], RoundingEvent::MarkRounded { by_sweep: false, .. }));
        let b = &s.boats[&id];
        assert_eq!(b.next_mark_index, 2);
        assert_eq!(b.lap, 0);
    }

    #[test]
    fn rounding_the_wrong_way_does_not_count() {
        let mut s = race(2);
        let mark = s.course.mark(0).unwrap().pos;
        let id = add(&mut s, mark + heading_vec(210.0) * 20.0, 1);
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);
        let events = circle(&mut s, &mut tracker, id, mark, 20.0, 210.0, 500.0);
        assert!(events.is_empty());
        assert_eq!(s.boats[&id].next_mark_index, 1);
    }

    #[test]
    fn sweep_fallback_completes_after_skipped_radial() {
        let mut s = race(2);
        let mark = s.course.mark(0).unwrap().pos;
        // Appear past the first radial, already inside the zone
        let id = add(&mut s, mark + heading_vec(60.0) * 20.0, 1);
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);
        let events = circle(&mut s, &mut tracker, id, mark, 20.0, 60.0, -100.0);
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundingEvent::MarkRounded { by_sweep: true, .. })));
        assert_eq!(s.boats[&id].next_mark_index, 2);
    }

    #[test]
    fn gate_completion_increments_lap_and_loops_back() {
        let mut s = race(2);
        let port_mark = s.course.mark(1).unwrap().pos;
        let id = add(&mut s, port_mark + Vec2::new(-6.0, 15.0), 2);
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);

        // Sail south through the gate close to the port mark
        move_to(&mut s, id, port_mark + Vec2::new(-6.0, -5.0));
        tracker.update(&mut s);
        assert_eq!(tracker.committed_mark(&id), Some(1));

        // Continue round the port mark, bearing decreasing
        let events = circle(&mut s, &mut tracker, id, port_mark, 8.0, 250.0, -10.0);
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundingEvent::LapCompleted { lap: 1, .. })));
        let b = &s.boats[&id];
        assert_eq!(b.lap, 1);
        assert_eq!(b.next_mark_index, 1);
        assert!(!b.finished);
    }

    #[test]
    fn final_lap_gate_leads_to_finish_line() {
        let mut s = race(1);
        let port_mark = s.course.mark(1).unwrap().pos;
        let id = add(&mut s, port_mark + Vec2::new(-6.0, 15.0), 2);
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);
        move_to(&mut s, id, port_mark + Vec2::new(-6.0, -5.0));
        let events = tracker.update(&mut s);
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundingEvent::LapCompleted { lap: 1, .. })));
        assert_eq!(s.boats[&id].next_mark_index, 3);

        // Down through the finish line
        move_to(&mut s, id, Vec2::new(0.0, 30.0));
        tracker.update(&mut s);
        s.t = 321.0;
        move_to(&mut s, id, Vec2::new(0.0, 20.0));
        let events = tracker.update(&mut s);
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundingEvent::Finished { .. })));
        let b = &s.boats[&id];
        assert!(b.finished);
        assert_eq!(b.finish_time, Some(321.0));
    }

    #[test]
    fn finish_line_crossed_upwind_does_not_count() {
        let mut s = race(1);
        let id = add(&mut s, Vec2::new(0.0, 20.0), 3);
        s.boats.get_mut(&id).unwrap().lap = 1;
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);
        move_to(&mut s, id, Vec2::new(0.0, 30.0));
        assert!(tracker.update(&mut s).is_empty());
        assert!(!s.boats[&id].finished);
    }

    #[test]
    fn start_counts_only_after_the_gun_from_below() {
        let mut s = race(1);
        s.phase = RacePhase::Prestart;
        let id = add(&mut s, Vec2::new(0.0, -10.0), 0);
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);
        s.phase = RacePhase::Running;
        move_to(&mut s, id, Vec2::new(0.0, -5.0));
        assert!(tracker.update(&mut s).is_empty());
        move_to(&mut s, id, Vec2::new(0.0, 1.0));
        let events = tracker.update(&mut s);
        assert_eq!(events, vec![RoundingEvent::StartCrossed { boat: id }]);
        assert_eq!(s.boats[&id].next_mark_index, 1);
    }

    #[test]
    fn ocs_boat_cannot_start() {
        let mut s = race(1);
        let id = add(&mut s, Vec2::new(0.0, -10.0), 0);
        s.boats.get_mut(&id).unwrap().over_early = true;
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);
        move_to(&mut s, id, Vec2::new(0.0, 5.0));
        assert!(tracker.update(&mut s).is_empty());
    }

    #[test]
    fn distance_refreshes_every_tick() {
        let mut s = race(1);
        let mark = s.course.mark(0).unwrap().pos;
        let id = add(&mut s, Vec2::new(0.0, 100.0), 1);
        let mut tracker = RoundingTracker::new();
        tracker.update(&mut s);
        assert!((s.boats[&id].distance_to_next_mark - mark.distance(Vec2::new(0.0, 100.0))).abs() < 1e-3);
        move_to(&mut s, id, Vec2::new(0.0, 200.0));
        tracker.update(&mut s);
        assert!((s.boats[&id].distance_to_next_mark - 200.0).abs() < 1e-3);
    }
}
