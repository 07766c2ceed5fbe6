//! Right-of-way rules engine

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

use crate::util::geometry::{heading_vec, left_of, right_of};

use super::collision::{Capsule, CollisionOutcome, HULL_RADIUS};
use super::state::{BoatState, RaceState, Tack};

/// Which rule a boat broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    /// Port tack keeps clear of starboard tack
    OppositeTack,
    /// Same tack, overlapped: windward keeps clear
    SameTackWindward,
    /// Same tack, not overlapped: the boat clear astern keeps clear
    SameTackOvertaking,
    /// A boat taking a penalty keeps clear of everyone
    TakingPenalty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RulesConfig {
    pub cooldown_secs: f32,
    /// |TWA| at or beyond which a boat counts as dead downwind
    pub deep_downwind_deg: f32,
    /// Half-angle of the cone astern in which an overtaking boat sits
    pub overtake_cone_deg: f32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 5.0,
            deep_downwind_deg: 165.0,
            overtake_cone_deg: 67.5,
        }
    }
}

/// A foul decided for one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ruling {
    pub rule: RuleId,
    pub offender: Uuid,
    pub stand_on: Uuid,
}

/// Unordered pair key, lower id first
fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Cooldown bookkeeping plus pairwise adjudication
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    config: RulesConfig,
    /// (rule, pair) -> time of last penalty
    pair_cooldowns: BTreeMap<(RuleId, Uuid, Uuid), f32>,
    /// (rule, offender) -> time of last penalty
    offender_cooldowns: BTreeMap<(RuleId, Uuid), f32>,
    /// Pairs with a penalised incident still in contact; cleared on separation
    incidents: BTreeSet<(Uuid, Uuid)>,
}

impl RulesEngine {
    pub fn new(config: RulesConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.pair_cooldowns.clear();
        self.offender_cooldowns.clear();
        self.incidents.clear();
    }

    /// Check every unordered pair of racing boats. Returns the fouls that are
    /// not suppressed by a cooldown and records them. Penalties are applied by
    /// the caller.
    pub fn evaluate(&mut self, state: &RaceState) -> Vec<Ruling> {
        let now = state.elapsed;
        let cooldown = self.config.cooldown_secs;
        self.prune(now);

        let boats: Vec<&BoatState> = state.boats.values().filter(|b| !b.finished).collect();
        let mut rulings = Vec::new();

        for i in 0..boats.len() {
            for j in (i + 1)..boats.len() {
                let (a, b) = (boats[i], boats[j]);
                let key = pair_key(a.id, b.id);

                if !Capsule::of(a).overlaps(&Capsule::of(b), 0.0) {
                    // Separation re-arms everything for this pair
                    self.incidents.remove(&key);
                    self.pair_cooldowns.retain(|(_, x, y), _| (*x, *y) != key);
                    continue;
                }

                let ruling = self.judge(a, b, state.wind.direction_deg);

                if self.incidents.contains(&key) {
                    continue;
                }
                if let Some(&at) = self.pair_cooldowns.get(&(ruling.rule, key.0, key.1)) {
                    if now - at < cooldown {
                        continue;
                    }
                }
                if let Some(&at) = self.offender_cooldowns.get(&(ruling.rule, ruling.offender)) {
                    if now - at < cooldown {
                        continue;
                    }
                }

                debug!(
                    rule = ?ruling.rule,
                    offender = %ruling.offender,
                    stand_on = %ruling.stand_on,
                    t = now,
                    "Right-of-way violation"
                );
                self.pair_cooldowns.insert((ruling.rule, key.0, key.1), now);
                self.offender_cooldowns.insert((ruling.rule, ruling.offender), now);
                self.incidents.insert(key);
                rulings.push(ruling);
            }
        }
        rulings
    }

    /// At-fault / stand-on tags for every boat in contact, plus mark pushes.
    /// No cooldowns and no side effects.
    pub fn compute_collision_outcomes(&self, state: &RaceState, margin: f32) -> BTreeMap<Uuid, CollisionOutcome> {
        let mut outcomes: BTreeMap<Uuid, CollisionOutcome> =
            state.boats.keys().map(|id| (*id, CollisionOutcome::default())).collect();
        let boats: Vec<&BoatState> = state.boats.values().collect();

        for i in 0..boats.len() {
            for j in (i + 1)..boats.len() {
                let (a, b) = (boats[i], boats[j]);
                if a.finished || b.finished {
                    continue;
                }
                if !Capsule::of(a).overlaps(&Capsule::of(b), margin) {
                    continue;
                }
                let ruling = self.judge(a, b, state.wind.direction_deg);
                if let Some(o) = outcomes.get_mut(&ruling.offender) {
                    o.at_fault = true;
                }
                if let Some(o) = outcomes.get_mut(&ruling.stand_on) {
                    o.stand_on = true;
                }
            }
        }

        for boat in state.boats.values() {
            let hull = Capsule::of(boat);
            let push: Vec2 = state.course.marks.iter().filter_map(|m| hull.mark_push(m)).sum();
            if let Some(o) = outcomes.get_mut(&boat.id) {
                o.mark_push = push;
            }
        }
        outcomes
    }

    /// Decide who keeps clear for two overlapping boats
    pub fn judge(&self, a: &BoatState, b: &BoatState, wind_dir_deg: f32) -> Ruling {
        let deep = self.config.deep_downwind_deg;
        let deep_a = a.twa(wind_dir_deg).abs() >= deep;
        let deep_b = b.twa(wind_dir_deg).abs() >= deep;
        let tack_a = a.tack(wind_dir_deg);
        let tack_b = b.tack(wind_dir_deg);

        let base = if tack_a != tack_b && !(deep_a && deep_b) {
            let (offender, stand_on) = if tack_a == Tack::Port {
                (a, b)
            } else {
                (b, a)
            };
            Ruling {
                rule: RuleId::OppositeTack,
                offender: offender.id,
                stand_on: stand_on.id,
            }
        } else if let Some((behind, ahead)) = self.overtaking(a, b) {
            Ruling {
                rule: RuleId::SameTackOvertaking,
                offender: behind.id,
                stand_on: ahead.id,
            }
        } else {
            let (windward, leeward) = windward_of(a, b, wind_dir_deg, deep_a && deep_b);
            Ruling {
                rule: RuleId::SameTackWindward,
                offender: windward.id,
                stand_on: leeward.id,
            }
        };

        // Right of way does not protect a boat that is taking a penalty
        let holder = if base.stand_on == a.id { a } else { b };
        let other = if base.offender == a.id { a } else { b };
        if holder.rights_suspended && !other.rights_suspended {
            return Ruling {
                rule: RuleId::TakingPenalty,
                offender: holder.id,
                stand_on: other.id,
            };
        }
        base
    }

    /// (overtaker, overtaken) if one bow is in the other's stern cone
    fn overtaking<'a>(&self, a: &'a BoatState, b: &'a BoatState) -> Option<(&'a BoatState, &'a BoatState)> {
        let cone = self.config.overtake_cone_deg.to_radians().cos();
        for (behind, ahead) in [(a, b), (b, a)] {
            let bow = Capsule::of(behind).bow;
            let stern = Capsule::of(ahead).stern;
            if bow.distance(stern) >= 2.0 * HULL_RADIUS {
                continue;
            }
            let astern = -heading_vec(ahead.heading_deg);
            let offset = behind.pos - ahead.pos;
            if offset.dot(astern) <= 0.0 {
                continue;
            }
            let dir = offset.normalize_or_zero();
            if dir.dot(astern) >= cone {
                return Some((behind, ahead));
            }
        }
        None
    }

    fn prune(&mut self, now: f32) {
        let window = self.config.cooldown_secs;
        self.pair_cooldowns.retain(|_, at| now - *at < window);
        self.offender_cooldowns.retain(|_, at| now - *at < window);
    }
}

/// (windward, leeward) by projecting onto the cross-wind axis of the mean
/// heading. Dead-downwind pairs use the wind axis instead.
fn windward_of<'a>(a: &'a BoatState, b: &'a BoatState, wind_dir_deg: f32, both_deep: bool) -> (&'a BoatState, &'a BoatState) {
    let upwind = heading_vec(wind_dir_deg);
    let mean = (heading_vec(a.heading_deg) + heading_vec(b.heading_deg)).normalize_or_zero();
    let mut axis = upwind;
    if !both_deep && mean != Vec2::ZERO {
        let left = left_of(mean);
        let right = right_of(mean);
        let toward_wind = if left.dot(upwind) >= right.dot(upwind) {
            left
        } else {
            right
        };
        if toward_wind.dot(upwind).abs() > 1e-4 {
            axis = toward_wind;
        }
    }
    let pa = a.pos.dot(axis);
    let pb = b.pos.dot(axis);
    if pa > pb || (pa == pb && a.id > b.id) {
        (a, b)
    } else {
        (b, a)
    }
}
