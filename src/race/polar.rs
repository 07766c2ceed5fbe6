//! Polar speed model

use crate::util::geometry::lerp;

/// Fastest a boat can go (knots)
pub const MAX_SPEED: f32 = 16.0;

/// Closest a boat may point to the true wind
pub const NO_GO_DEG: f32 = 38.0;

/// Deepest a boat may sail downwind
pub const MAX_DOWNWIND_DEG: f32 = 175.0;

/// |TWA| (degrees) -> boat speed / wind speed
const POLAR_TABLE: [(f32, f32); 14] = [
    (0.0, 0.0),
    (30.0, 0.0),
    (38.0, 0.42),
    (45.0, 0.56),
    (52.0, 0.64),
    (60.0, 0.70),
    (75.0, 0.77),
    (90.0, 0.80),
    (110.0, 0.79),
    (120.0, 0.76),
    (135.0, 0.70),
    (150.0, 0.62),
    (165.0, 0.55),
    (180.0, 0.50),
];

/// Resolution of the VMG search
const VMG_SEARCH_STEP_DEG: f32 = 0.5;

/// Speed ratio for a true wind angle (sign ignored)
pub fn speed_ratio(twa_deg: f32) -> f32 {
    if !twa_deg.is_finite() {
        return 0.0;
    }
    let a = twa_deg.abs().min(180.0);
    for pair in POLAR_TABLE.windows(2) {
        let (a0, r0) = pair[0];
        let (a1, r1) = pair[1];
        if a <= a1 {
            let span = a1 - a0;
            if span <= 0.0 {
                return r1;
            }
            return lerp(r0, r1, (a - a0) / span);
        }
    }
    POLAR_TABLE[POLAR_TABLE.len() - 1].1
}

/// Polar lookup plus the pre-searched VMG optima
#[derive(Debug, Clone, Copy)]
pub struct Polar {
    best_upwind_twa: f32,
    best_downwind_twa: f32,
}

impl Polar {
    pub fn new() -> Self {
        Self {
            best_upwind_twa: search_vmg(NO_GO_DEG, 90.0, 1.0),
            best_downwind_twa: search_vmg(90.0, MAX_DOWNWIND_DEG, -1.0),
        }
    }

    /// |TWA| giving the best velocity made good towards the wind
    pub fn best_upwind_twa(&self) -> f32 {
        self.best_upwind_twa
    }

    /// |TWA| giving the best velocity made good away from the wind
    pub fn best_downwind_twa(&self) -> f32 {
        self.best_downwind_twa
    }

    /// Target boat speed in knots, clamped to [0, MAX_SPEED].
    /// `trim` in [0, 1] scales the result by 0.6 + 0.4 * trim.
    pub fn target_speed(&self, twa_deg: f32, wind_speed_kts: f32, trim: f32) -> f32 {
        let wind = if wind_speed_kts.is_finite() {
            wind_speed_kts.max(0.0)
        } else {
            0.0
        };
        let trim = if trim.is_finite() { trim.clamp(0.0, 1.0) } else { 1.0 };
        let speed = speed_ratio(twa_deg) * wind * (0.6 + 0.4 * trim);
        speed.clamp(0.0, MAX_SPEED)
    }
}

impl Default for Polar {
    fn default() -> Self {
        Self::new()
    }
}

/// Angle in [from, to] maximizing ratio * cos(angle) * direction
fn search_vmg(from: f32, to: f32, direction: f32) -> f32 {
    let mut best_angle = from;
    let mut best_vmg = f32::MIN;
    let mut angle = from;
    while angle <= to {
        let vmg = speed_ratio(angle) * angle.to_radians().cos() * direction;
        if vmg > best_vmg {
            best_vmg = vmg;
            best_angle = angle;
        }
        angle += VMG_SEARCH_STEP_DEG;
    }
    best_angle
}
