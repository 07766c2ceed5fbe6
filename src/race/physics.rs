//! Boat heading, speed and position integration

use glam::Vec2;

use crate::util::geometry::{angle_diff, bearing_deg, heading_vec, lerp, normalize_deg, signed_deg};

use super::collision::CollisionOutcome;
use super::penalty::SpinState;
use super::polar::{Polar, MAX_DOWNWIND_DEG, MAX_SPEED, NO_GO_DEG};
use super::state::{BoatState, Wind};

/// Knots to metres per second
pub const KNOTS_TO_WORLD: f32 = 0.514444;

/// Boat handling constants
#[derive(Debug, Clone, Copy)]
pub struct PhysicsParams {
    /// Steering rate in degrees per second
    pub turn_rate_deg: f32,
    /// Turn rate while doing a penalty spin
    pub spin_turn_rate_deg: f32,
    /// Exponential rate towards a higher target speed
    pub accel_rate: f32,
    /// Exponential rate towards a lower target speed
    pub decel_rate: f32,
    pub stall_secs: f32,
    pub stall_speed_factor: f32,
    pub tack_secs: f32,
    pub tack_speed_factor: f32,
    /// Width of the band just outside the no-go zone where speed ramps up
    pub near_no_go_band_deg: f32,
    pub near_no_go_factor: f32,
    pub blow_sails_factor: f32,
    pub spin_speed_factor: f32,
    /// Below this speed (knots) the boat slips to leeward
    pub drift_threshold_kts: f32,
    /// Leeward slip in metres per second
    pub drift_speed: f32,
    /// Speed multiplier applied on a tick where the boat is at fault in a collision
    pub collision_speed_factor: f32,
    /// Speed multiplier applied on a tick where the hull touches a mark
    pub mark_contact_speed_factor: f32,
    pub trim: f32,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            turn_rate_deg: 60.0,
            spin_turn_rate_deg: 90.0,
            accel_rate: 0.5,
            decel_rate: 1.0,
            stall_secs: 2.0,
            stall_speed_factor: 0.35,
            tack_secs: 3.0,
            tack_speed_factor: 0.7,
            near_no_go_band_deg: 6.0,
            near_no_go_factor: 0.6,
            blow_sails_factor: 0.25,
            spin_speed_factor: 0.5,
            drift_threshold_kts: 1.0,
            drift_speed: 0.4,
            collision_speed_factor: 0.6,
            mark_contact_speed_factor: 0.6,
            trim: 1.0,
        }
    }
}

/// Everything the step reads besides the boat itself
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub polar: &'a Polar,
    pub params: &'a PhysicsParams,
    /// Global wind (same for every boat this tick)
    pub wind: Wind,
    /// Wind sampled at the boat's position
    pub local_wind: Wind,
    pub wake_factor: f32,
    pub collision: CollisionOutcome,
    /// Point the boat is sailing for, used by the VMG autopilot
    pub target: Option<Vec2>,
    pub dt: f32,
}

/// Physics system for updating boats
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance one boat by `ctx.dt`. Pure: the same boat and context always
    /// produce the same result.
    pub fn step_boat(boat: &BoatState, ctx: &StepContext<'_>) -> BoatState {
        let mut next = boat.clone();
        let p = ctx.params;
        let dt = if ctx.dt.is_finite() { ctx.dt.max(0.0) } else { 0.0 };
        let wind_dir = ctx.wind.direction_deg;
        let old_heading = boat.heading_deg;

        if let SpinState::Spinning {
            turned_deg,
            direction,
        } = boat.spin
        {
            // Spin overrides steering and the sailing envelope
            let turn = p.spin_turn_rate_deg * dt;
            next.heading_deg = normalize_deg(old_heading + direction * turn);
            next.desired_heading_deg = next.heading_deg;
            next.spin = SpinState::Spinning {
                turned_deg: turned_deg + turn,
                direction,
            };
        } else {
            // Resolve desired heading
            let mut desired = if boat.vmg_mode {
                Self::vmg_heading(boat, ctx)
            } else {
                boat.desired_heading_deg
            };
            if !desired.is_finite() {
                desired = old_heading;
            }

            // Clamp to the sailing envelope
            let twa_desired = signed_deg(desired - wind_dir);
            let side = if twa_desired > 0.0 {
                1.0
            } else if twa_desired < 0.0 {
                -1.0
            } else if boat.twa(wind_dir) >= 0.0 {
                1.0
            } else {
                -1.0
            };
            if twa_desired.abs() < NO_GO_DEG {
                desired = wind_dir + side * NO_GO_DEG;
                next.stall_timer = p.stall_secs;
            } else if twa_desired.abs() > MAX_DOWNWIND_DEG {
                desired = wind_dir + side * MAX_DOWNWIND_DEG;
            }
            let desired = normalize_deg(desired);
            next.desired_heading_deg = desired;

            // Steer towards it, snapping when within one step
            let diff = angle_diff(desired, old_heading);
            let max_turn = p.turn_rate_deg * dt;
            next.heading_deg = if diff.abs() <= max_turn {
                desired
            } else {
                normalize_deg(old_heading + diff.signum() * max_turn)
            };

            // Tacking through the wind
            let before = signed_deg(old_heading - wind_dir);
            let after = signed_deg(next.heading_deg - wind_dir);
            let crossed = (before >= 0.0) != (after >= 0.0);
            if crossed && before.abs() < 90.0 && after.abs() < 90.0 {
                next.tack_timer = p.tack_secs;
            }
        }

        // Timers
        next.stall_timer = (next.stall_timer - dt).max(0.0);
        next.tack_timer = (next.tack_timer - dt).max(0.0);

        // Target speed
        let twa = signed_deg(next.heading_deg - wind_dir).abs();
        let mut target = ctx.polar.target_speed(twa, ctx.local_wind.speed_kts, p.trim);
        if next.stall_timer > 0.0 {
            target *= p.stall_speed_factor;
        }
        if next.tack_timer > 0.0 {
            target *= p.tack_speed_factor;
        }
        if next.blow_sails {
            target *= p.blow_sails_factor;
        }
        if twa < NO_GO_DEG {
            target = 0.0;
        } else if twa < NO_GO_DEG + p.near_no_go_band_deg {
            let k = (twa - NO_GO_DEG) / p.near_no_go_band_deg.max(1e-3);
            target *= lerp(p.near_no_go_factor, 1.0, k);
        }
        if next.spin.is_spinning() {
            target *= p.spin_speed_factor;
        }
        let wake = if ctx.wake_factor.is_finite() {
            ctx.wake_factor.clamp(0.0, 1.0)
        } else {
            1.0
        };
        target *= wake;
        next.wake_factor = wake;

        // Smooth towards target
        let rate = if target > boat.speed {
            p.accel_rate
        } else {
            p.decel_rate
        };
        let alpha = 1.0 - (-rate * dt).exp();
        let speed = if boat.speed.is_finite() { boat.speed } else { 0.0 };
        next.speed = (speed + (target - speed) * alpha).clamp(0.0, MAX_SPEED);

        // Integrate
        next.prev_pos = boat.pos;
        next.pos = boat.pos + heading_vec(next.heading_deg) * next.speed * KNOTS_TO_WORLD * dt;
        if next.speed < p.drift_threshold_kts {
            next.pos += ctx.wind.downwind() * p.drift_speed * dt;
        }

        // Collision corrections
        if ctx.collision.mark_push.is_finite() && ctx.collision.mark_push != Vec2::ZERO {
            next.pos += ctx.collision.mark_push;
            next.speed = (next.speed * p.mark_contact_speed_factor).clamp(0.0, MAX_SPEED);
        }
        next.collision_at_fault = ctx.collision.at_fault;
        if ctx.collision.at_fault {
            next.speed = (next.speed * p.collision_speed_factor).clamp(0.0, MAX_SPEED);
        }

        next
    }

    /// Best VMG heading on the boat's current side of the wind
    fn vmg_heading(boat: &BoatState, ctx: &StepContext<'_>) -> f32 {
        let wind_dir = ctx.wind.direction_deg;
        let upwind = match ctx.target {
            Some(target) if target.distance_squared(boat.pos) > 1e-6 => {
                signed_deg(bearing_deg(boat.pos, target) - wind_dir).abs() < 90.0
            }
            _ => boat.twa(wind_dir).abs() < 90.0,
        };
        let side = if boat.twa(wind_dir) >= 0.0 { 1.0 } else { -1.0 };
        let angle = if upwind {
            ctx.polar.best_upwind_twa()
        } else {
            ctx.polar.best_downwind_twa()
        };
        normalize_deg(wind_dir + side * angle)
    }
}
