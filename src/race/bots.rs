//! Heuristic bot helm and the sailing observation vector

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::util::geometry::{angle_diff, bearing_deg, heading_vec, normalize_deg, signed_deg};

use super::polar::Polar;
use super::state::{BoatState, RacePhase, RaceState};

/// Column order of the observation vector
pub const FEATURE_NAMES: [&str; 19] = [
    "twaSin",
    "twaCos",
    "windSpeed",
    "boatSpeed",
    "bearingToMarkSin",
    "bearingToMarkCos",
    "distToMark",
    "legUpwind",
    "legDownwind",
    "tack",
    "raceTime",
    "stallTimer",
    "tackTimer",
    "near1Bearing",
    "near1Dist",
    "near2Bearing",
    "near2Dist",
    "near3Bearing",
    "near3Dist",
];

/// Distance reported for a neighbour slot with no boat in it
pub const MISSING_NEIGHBOUR_DIST: f32 = 1000.0;

/// What one boat sees, as used by the behavioural-cloning trainer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SailingFeatures {
    pub twa_sin: f32,
    pub twa_cos: f32,
    pub wind_speed: f32,
    pub boat_speed: f32,
    /// Bearing to the target relative to the wind
    pub bearing_to_mark_sin: f32,
    pub bearing_to_mark_cos: f32,
    pub dist_to_mark: f32,
    pub leg_upwind: f32,
    pub leg_downwind: f32,
    /// +1 port, -1 starboard
    pub tack: f32,
    pub race_time: f32,
    pub stall_timer: f32,
    pub tack_timer: f32,
    /// Bearing relative to heading (degrees)
    #[serde(rename = "near1Bearing")]
    pub near1_bearing: f32,
    #[serde(rename = "near1Dist")]
    pub near1_dist: f32,
    #[serde(rename = "near2Bearing")]
    pub near2_bearing: f32,
    #[serde(rename = "near2Dist")]
    pub near2_dist: f32,
    #[serde(rename = "near3Bearing")]
    pub near3_bearing: f32,
    #[serde(rename = "near3Dist")]
    pub near3_dist: f32,
}

impl SailingFeatures {
    pub fn observe(state: &RaceState, boat: &BoatState, target: Option<Vec2>) -> Self {
        let wind = state.wind;
        let twa = boat.twa(wind.direction_deg).to_radians();

        let (mark_rel, dist) = match target {
            Some(p) => (
                Some(signed_deg(bearing_deg(boat.pos, p) - wind.direction_deg)),
                boat.pos.distance(p),
            ),
            None => (None, 0.0),
        };
        let rel_rad = mark_rel.unwrap_or(0.0).to_radians();

        let mut near: Vec<(f32, f32)> = state
            .boats
            .values()
            .filter(|b| b.id != boat.id)
            .map(|b| {
                let d = boat.pos.distance(b.pos);
                let rel = angle_diff(bearing_deg(boat.pos, b.pos), boat.heading_deg);
                (d, rel)
            })
            .collect();
        near.sort_by(|a, b| a.0.total_cmp(&b.0));
        let slot = |i: usize| near.get(i).map(|(d, r)| (*r, *d)).unwrap_or((0.0, MISSING_NEIGHBOUR_DIST));
        let (n1b, n1d) = slot(0);
        let (n2b, n2d) = slot(1);
        let (n3b, n3d) = slot(2);

        Self {
            twa_sin: twa.sin(),
            twa_cos: twa.cos(),
            wind_speed: wind.speed_kts,
            boat_speed: boat.speed,
            bearing_to_mark_sin: rel_rad.sin(),
            bearing_to_mark_cos: rel_rad.cos(),
            dist_to_mark: dist,
            leg_upwind: if mark_rel.is_some_and(|r| r.abs() < 90.0) { 1.0 } else { 0.0 },
            leg_downwind: if mark_rel.is_some_and(|r| r.abs() >= 90.0) { 1.0 } else { 0.0 },
            tack: if boat.twa(wind.direction_deg) >= 0.0 { 1.0 } else { -1.0 },
            race_time: state.t,
            stall_timer: boat.stall_timer,
            tack_timer: boat.tack_timer,
            near1_bearing: n1b,
            near1_dist: n1d,
            near2_bearing: n2b,
            near2_dist: n2d,
            near3_bearing: n3b,
            near3_dist: n3d,
        }
    }

    /// Values in `FEATURE_NAMES` order
    pub fn to_row(&self) -> [f32; 19] {
        [
            self.twa_sin,
            self.twa_cos,
            self.wind_speed,
            self.boat_speed,
            self.bearing_to_mark_sin,
            self.bearing_to_mark_cos,
            self.dist_to_mark,
            self.leg_upwind,
            self.leg_downwind,
            self.tack,
            self.race_time,
            self.stall_timer,
            self.tack_timer,
            self.near1_bearing,
            self.near1_dist,
            self.near2_bearing,
            self.near2_dist,
            self.near3_bearing,
            self.near3_dist,
        ]
    }
}

/// Helm decision for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BotAction {
    Heading(f32),
    Vmg,
    Spin,
}

/// Deterministic layline sailor
#[derive(Debug, Clone, Copy)]
pub struct BotPilot {
    /// No other boat may be this close before a penalty spin
    pub spin_clearance: f32,
    /// Heading changes smaller than this are not re-sent
    pub heading_tolerance_deg: f32,
    /// Seconds before the gun when bots go for the line
    pub final_approach_secs: f32,
    /// Bots reach back and forth within this distance of the line centre
    pub prestart_spread: f32,
}

impl Default for BotPilot {
    fn default() -> Self {
        Self {
            spin_clearance: 20.0,
            heading_tolerance_deg: 1.0,
            final_approach_secs: 6.0,
            prestart_spread: 40.0,
        }
    }
}

impl BotPilot {
    pub fn decide(&self, state: &RaceState, boat: &BoatState, polar: &Polar, target: Option<Vec2>) -> Vec<BotAction> {
        let mut actions = Vec::new();
        if boat.finished || state.phase == RacePhase::Finished {
            return actions;
        }
        let wind_dir = state.wind.direction_deg;

        // Take penalties when nobody is close
        if boat.penalties > 0 && boat.spin.is_idle() {
            let clear = state
                .boats
                .values()
                .filter(|b| b.id != boat.id)
                .all(|b| b.pos.distance(boat.pos) > self.spin_clearance);
            if clear {
                actions.push(BotAction::Spin);
                return actions;
            }
        }
        if boat.spin.is_spinning() {
            return actions;
        }

        if state.phase == RacePhase::Prestart && state.t < -self.final_approach_secs {
            if let Some(heading) = self.prestart_heading(state, boat) {
                self.push_heading(boat, heading, &mut actions);
            }
            return actions;
        }

        let Some(target) = target else {
            return actions;
        };
        let bearing = bearing_deg(boat.pos, target);
        let rel = signed_deg(bearing - wind_dir).abs();
        if rel <= polar.best_upwind_twa() || rel >= polar.best_downwind_twa() {
            // Inside the upwind or downwind cone: sail the VMG angle on this tack
            if !boat.vmg_mode {
                actions.push(BotAction::Vmg);
            }
        } else {
            // Past the layline or reaching: steer straight at it
            self.push_heading(boat, bearing, &mut actions);
        }
        actions
    }

    fn push_heading(&self, boat: &BoatState, heading: f32, actions: &mut Vec<BotAction>) {
        let off = angle_diff(heading, boat.desired_heading_deg).abs();
        if boat.vmg_mode || off > self.heading_tolerance_deg {
            actions.push(BotAction::Heading(heading));
        }
    }

    /// Beam reach along the line, turning back at the ends
    fn prestart_heading(&self, state: &RaceState, boat: &BoatState) -> Option<f32> {
        let line = state.course.start_line()?;
        let along_dir = (line.committee - line.pin).normalize_or_zero();
        if along_dir == Vec2::ZERO {
            return None;
        }
        let along = (boat.pos - line.midpoint()).dot(along_dir);
        let wind_dir = state.wind.direction_deg;
        let port_reach = wind_dir + 90.0;
        let starboard_reach = wind_dir - 90.0;
        let heading_along = heading_vec(boat.heading_deg).dot(along_dir);
        let heading = if along > self.prestart_spread {
            if heading_vec(port_reach).dot(along_dir) < 0.0 {
                port_reach
            } else {
                starboard_reach
            }
        } else if along < -self.prestart_spread {
            if heading_vec(port_reach).dot(along_dir) > 0.0 {
                port_reach
            } else {
                starboard_reach
            }
        } else if heading_along >= 0.0 {
            if heading_vec(port_reach).dot(along_dir) >= 0.0 {
                port_reach
            } else {
                starboard_reach
            }
        } else if heading_vec(port_reach).dot(along_dir) < 0.0 {
            port_reach
        } else {
            starboard_reach
        };
        Some(normalize_deg(heading))
    }
}
