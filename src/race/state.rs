//! Race and boat state (the published, transport-agnostic value)

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::util::geometry::{heading_vec, normalize_deg, signed_deg};

use super::course::Course;
use super::penalty::SpinState;

/// Race phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePhase {
    /// Before the gun (countdown may or may not be armed)
    Prestart,
    /// Gun has fired
    Running,
    /// Every boat finished, or the race timed out
    Finished,
}

/// True wind. `direction_deg` is where the wind blows from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub direction_deg: f32,
    pub speed_kts: f32,
}

impl Wind {
    /// Unit vector pointing where the wind blows to
    pub fn downwind(&self) -> Vec2 {
        -heading_vec(self.direction_deg)
    }
}

/// Which side the wind comes over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tack {
    Port,
    Starboard,
}

/// Signed true wind angle of a heading. Positive means wind over the port side.
pub fn true_wind_angle(heading_deg: f32, wind_dir_deg: f32) -> f32 {
    signed_deg(heading_deg - wind_dir_deg)
}

pub fn tack_of(heading_deg: f32, wind_dir_deg: f32) -> Tack {
    if true_wind_angle(heading_deg, wind_dir_deg) >= 0.0 {
        Tack::Port
    } else {
        Tack::Starboard
    }
}

/// Authoritative per-boat state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoatState {
    pub id: Uuid,
    pub name: String,
    pub bot: bool,

    // Kinematics
    pub pos: Vec2,
    pub prev_pos: Vec2,
    pub heading_deg: f32,
    pub desired_heading_deg: f32,
    /// Knots
    pub speed: f32,
    pub stall_timer: f32,
    pub tack_timer: f32,
    pub wake_factor: f32,

    // Controls that persist between inputs
    pub vmg_mode: bool,
    pub blow_sails: bool,
    pub last_input_seq: u64,

    // Racing
    pub penalties: u32,
    pub finished: bool,
    pub finish_time: Option<f32>,
    pub lap: u32,
    /// Index of the leg being sailed
    pub next_mark_index: usize,
    pub distance_to_next_mark: f32,
    pub over_early: bool,
    pub rights_suspended: bool,
    pub spin: SpinState,
    /// At fault in a physical collision during the last tick
    pub collision_at_fault: bool,
}

impl BoatState {
    pub fn new(id: Uuid, name: String, bot: bool, pos: Vec2, heading_deg: f32) -> Self {
        let heading = normalize_deg(heading_deg);
        Self {
            id,
            name,
            bot,
            pos,
            prev_pos: pos,
            heading_deg: heading,
            desired_heading_deg: heading,
            speed: 0.0,
            stall_timer: 0.0,
            tack_timer: 0.0,
            wake_factor: 1.0,
            vmg_mode: false,
            blow_sails: false,
            last_input_seq: 0,
            penalties: 0,
            finished: false,
            finish_time: None,
            lap: 0,
            next_mark_index: 0,
            distance_to_next_mark: 0.0,
            over_early: false,
            rights_suspended: false,
            spin: SpinState::Idle,
            collision_at_fault: false,
        }
    }

    pub fn tack(&self, wind_dir_deg: f32) -> Tack {
        tack_of(self.heading_deg, wind_dir_deg)
    }

    pub fn twa(&self, wind_dir_deg: f32) -> f32 {
        true_wind_angle(self.heading_deg, wind_dir_deg)
    }

    /// Clear everything a reset wipes, keeping identity and position
    pub fn reset_racing(&mut self) {
        self.speed = 0.0;
        self.stall_timer = 0.0;
        self.tack_timer = 0.0;
        self.wake_factor = 1.0;
        self.penalties = 0;
        self.finished = false;
        self.finish_time = None;
        self.lap = 0;
        self.next_mark_index = 0;
        self.distance_to_next_mark = 0.0;
        self.over_early = false;
        self.rights_suspended = false;
        self.spin = SpinState::Idle;
        self.collision_at_fault = false;
    }

    pub fn is_finite(&self) -> bool {
        self.pos.is_finite()
            && self.prev_pos.is_finite()
            && self.heading_deg.is_finite()
            && self.desired_heading_deg.is_finite()
            && self.speed.is_finite()
            && self.stall_timer.is_finite()
            && self.tack_timer.is_finite()
            && self.wake_factor.is_finite()
            && self.distance_to_next_mark.is_finite()
    }
}

/// Root state of one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceState {
    pub race_id: Uuid,
    pub seed: u64,
    pub tick: u64,
    /// Race clock in seconds; negative during the countdown
    pub t: f32,
    /// Simulated seconds since the race was created (drives the wind)
    pub elapsed: f32,
    pub phase: RacePhase,
    pub wind: Wind,
    pub baseline_wind_deg: f32,
    pub fixed_wind: bool,
    pub boats: BTreeMap<Uuid, BoatState>,
    pub course: Course,
    pub leaderboard: Vec<Uuid>,
    pub host_id: Option<Uuid>,
    pub host_epoch: u64,
    /// Wall-clock time of the gun once a countdown is armed
    pub start_at_ms: Option<u64>,
    pub start_signal_sent: bool,
    pub next_event_id: u64,
}

impl RaceState {
    pub fn new(race_id: Uuid, seed: u64, course: Course, wind: Wind, countdown_secs: f32) -> Self {
        Self {
            race_id,
            seed,
            tick: 0,
            t: -countdown_secs.abs(),
            elapsed: 0.0,
            phase: RacePhase::Prestart,
            wind,
            baseline_wind_deg: wind.direction_deg,
            fixed_wind: false,
            boats: BTreeMap::new(),
            course,
            leaderboard: Vec::new(),
            host_id: None,
            host_epoch: 0,
            start_at_ms: None,
            start_signal_sent: false,
            next_event_id: 1,
        }
    }

    /// Spawn slot below the start line for the n-th boat
    pub fn spawn_position(&self, slot: usize) -> (Vec2, f32) {
        let centre = self
            .course
            .start_line()
            .map(|l| l.midpoint())
            .unwrap_or(Vec2::ZERO);
        let up = heading_vec(self.baseline_wind_deg);
        let right = heading_vec(self.baseline_wind_deg + 90.0);
        let row = (slot / 8) as f32;
        let col = (slot % 8) as f32;
        let pos = centre - up * (40.0 + row * 14.0) + right * (-49.0 + col * 14.0);
        // Starboard tack beam reach
        (pos, normalize_deg(self.baseline_wind_deg - 90.0))
    }

    /// Add a boat on the next free spawn slot. Returns false if it already exists.
    pub fn add_boat(&mut self, id: Uuid, name: String, bot: bool) -> bool {
        if self.boats.contains_key(&id) {
            return false;
        }
        let (pos, heading) = self.spawn_position(self.boats.len());
        self.boats.insert(id, BoatState::new(id, name, bot, pos, heading));
        self.recompute_leaderboard();
        true
    }

    pub fn remove_boat(&mut self, id: &Uuid) -> Option<BoatState> {
        let boat = self.boats.remove(id);
        self.recompute_leaderboard();
        boat
    }

    pub fn boat(&self, id: &Uuid) -> Option<&BoatState> {
        self.boats.get(id)
    }

    pub fn all_finished(&self) -> bool {
        !self.boats.is_empty() && self.boats.values().all(|b| b.finished)
    }

    /// Finished boats by finish time, then the rest by lap, leg and distance
    pub fn recompute_leaderboard(&mut self) {
        let mut order: Vec<&BoatState> = self.boats.values().collect();
        order.sort_by(|a, b| compare_standing(a, b));
        self.leaderboard = order.into_iter().map(|b| b.id).collect();
    }
}

fn compare_standing(a: &BoatState, b: &BoatState) -> Ordering {
    match (a.finished, b.finished) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (true, true) => {
            let ta = a.finish_time.unwrap_or(f32::MAX);
            let tb = b.finish_time.unwrap_or(f32::MAX);
            return ta.total_cmp(&tb).then(a.id.cmp(&b.id));
        }
        (false, false) => {}
    }
    b.lap
        .cmp(&a.lap)
        .then(b.next_mark_index.cmp(&a.next_mark_index))
        .then(a.distance_to_next_mark.total_cmp(&b.distance_to_next_mark))
        .then(a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race() -> RaceState {
        RaceState::new(
            Uuid::new_v4(),
            1,
            Course::windward_leeward(0.0, 2, 400.0),
            Wind {
                direction_deg: 0.0,
                speed_kts: 12.0,
            },
            30.0,
        )
    }

    #[test]
    fn tack_follows_wind_side() {
        // Wind from north: heading east puts the wind over the port side
        assert_eq!(tack_of(90.0, 0.0), Tack::Port);
        assert_eq!(tack_of(270.0, 0.0), Tack::Starboard);
        assert!((true_wind_angle(350.0, 10.0) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn boats_spawn_below_the_start_line_on_starboard() {
        let mut state = race();
        let id = Uuid::new_v4();
        assert!(state.add_boat(id, "one".into(), false));
        assert!(!state.add_boat(id, "dup".into(), false));
        let boat = state.boat(&id).unwrap();
        assert!(boat.pos.y < 0.0);
        assert_eq!(boat.tack(state.wind.direction_deg), Tack::Starboard);
    }

    #[test]
    fn leaderboard_orders_finishers_then_progress() {
        let mut state = race();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            state.add_boat(*id, format!("b{i}"), false);
        }
        {
            let b = state.boats.get_mut(&ids[0]).unwrap();
            b.lap = 1;
            b.distance_to_next_mark = 300.0;
        }
        {
            let b = state.boats.get_mut(&ids[1]).unwrap();
            b.finished = true;
            b.finish_time = Some(500.0);
        }
        {
            let b = state.boats.get_mut(&ids[2]).unwrap();
            b.finished = true;
            b.finish_time = Some(450.0);
        }
        {
            let b = state.boats.get_mut(&ids[3]).unwrap();
            b.lap = 1;
            b.distance_to_next_mark = 100.0;
        }
        state.recompute_leaderboard();
        assert_eq!(state.leaderboard, vec![ids[2], ids[1], ids[3], ids[0]]);
    }
}
