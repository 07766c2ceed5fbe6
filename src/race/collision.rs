//! Hull capsules, boat-boat repulsion and boat-mark contact

use glam::Vec2;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::util::geometry::{closest_on_segment, closest_points_between_segments, heading_vec};

use super::course::Mark;
use super::state::BoatState;

/// Hull length (metres)
pub const BOAT_LENGTH: f32 = 6.0;

/// Radius of the bow and stern circles
pub const HULL_RADIUS: f32 = 1.2;

/// Fraction of the overlap the at-fault boat absorbs
const AT_FAULT_SHARE: f32 = 0.75;

/// Extra separation after a push so contact does not persist on rounding error
const PUSH_BUFFER: f32 = 0.05;

/// Two-circle hull approximation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    pub bow: Vec2,
    pub stern: Vec2,
    pub radius: f32,
}

impl Capsule {
    pub fn of(boat: &BoatState) -> Self {
        Self::at(boat.pos, boat.heading_deg)
    }

    pub fn at(pos: Vec2, heading_deg: f32) -> Self {
        let half_span = BOAT_LENGTH * 0.5 - HULL_RADIUS;
        let dir = heading_vec(heading_deg);
        Self {
            bow: pos + dir * half_span,
            stern: pos - dir * half_span,
            radius: HULL_RADIUS,
        }
    }

    /// Surface gap to another capsule (negative when overlapping)
    pub fn gap(&self, other: &Capsule) -> f32 {
        let (a, b) = closest_points_between_segments(self.stern, self.bow, other.stern, other.bow);
        a.distance(b) - self.radius - other.radius
    }

    pub fn overlaps(&self, other: &Capsule, margin: f32) -> bool {
        self.gap(other) < margin
    }

    /// Penetration normal (from self towards other) and depth, if touching
    pub fn penetration(&self, other: &Capsule, centre_self: Vec2, centre_other: Vec2) -> Option<(Vec2, f32)> {
        let (a, b) = closest_points_between_segments(self.stern, self.bow, other.stern, other.bow);
        let dist = a.distance(b);
        let depth = self.radius + other.radius - dist;
        if depth <= 0.0 {
            return None;
        }
        let mut normal = (b - a).normalize_or_zero();
        if normal == Vec2::ZERO {
            // Spines cross; fall back to centre separation
            normal = (centre_other - centre_self).normalize_or_zero();
        }
        if normal == Vec2::ZERO {
            normal = Vec2::X;
        }
        Some((normal, depth))
    }

    /// Push needed to move this capsule clear of a mark, if touching
    pub fn mark_push(&self, mark: &Mark) -> Option<Vec2> {
        let (closest, _) = closest_on_segment(self.stern, self.bow, mark.pos);
        let offset = closest - mark.pos;
        let dist = offset.length();
        let depth = self.radius + mark.radius - dist;
        if depth <= 0.0 {
            return None;
        }
        let normal = if dist > 1e-4 {
            offset / dist
        } else {
            Vec2::X
        };
        Some(normal * (depth + PUSH_BUFFER))
    }
}

/// Per-boat collision result, computed before integration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CollisionOutcome {
    /// Responsible for at least one contact this tick
    pub at_fault: bool,
    /// Held right of way in at least one contact
    pub stand_on: bool,
    /// Correction that moves the hull off any mark it touches
    pub mark_push: Vec2,
}

/// Separate overlapping hulls. The at-fault boat of a pair takes the larger
/// share of the push; without a fault the overlap is split evenly.
pub fn resolve_boat_collisions(
    boats: &mut BTreeMap<Uuid, BoatState>,
    outcomes: &BTreeMap<Uuid, CollisionOutcome>,
) -> usize {
    let ids: Vec<Uuid> = boats.keys().copied().collect();
    let mut pushes: BTreeMap<Uuid, Vec2> = BTreeMap::new();
    let mut contacts = 0;

    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let (Some(a), Some(b)) = (boats.get(&ids[i]), boats.get(&ids[j])) else {
                continue;
            };
            let ca = Capsule::of(a);
            let cb = Capsule::of(b);
            let Some((normal, depth)) = ca.penetration(&cb, a.pos, b.pos) else {
                continue;
            };
            contacts += 1;

            let a_fault = outcomes.get(&a.id).map(|o| o.at_fault).unwrap_or(false);
            let b_fault = outcomes.get(&b.id).map(|o| o.at_fault).unwrap_or(false);
            let share_a = match (a_fault, b_fault) {
                (true, false) => AT_FAULT_SHARE,
                (false, true) => 1.0 - AT_FAULT_SHARE,
                _ => 0.5,
            };
            let push = depth + PUSH_BUFFER;
            *pushes.entry(a.id).or_insert(Vec2::ZERO) -= normal * push * share_a;
            *pushes.entry(b.id).or_insert(Vec2::ZERO) += normal * push * (1.0 - share_a);
        }
    }

    for (id, push) in pushes {
        if let Some(boat) = boats.get_mut(&id) {
            boat.pos += push;
        }
    }
    contacts
}
