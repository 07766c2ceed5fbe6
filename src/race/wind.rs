//! Seeded wind model: oscillating baseline, random shifts and gusts, moving puffs

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

use crate::util::geometry::{heading_vec, normalize_deg};
use crate::util::rng::SimRng;

use super::physics::KNOTS_TO_WORLD;
use super::state::Wind;

/// Number of puff bands laid over the course
const PUFF_BANDS: usize = 3;

/// Wind model tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindConfig {
    pub direction_deg: f32,
    pub speed_kts: f32,
    /// Amplitude of the slow baseline oscillation
    pub oscillation_deg: f32,
    pub oscillation_period_secs: f32,
    /// Bound on the random shift around the baseline
    pub shift_deg: f32,
    /// Bound on the random gust component
    pub gust_kts: f32,
    /// Peak relative speed change inside a puff band
    pub puff_strength: f32,
}

impl Default for WindConfig {
    fn default() -> Self {
        Self {
            direction_deg: 0.0,
            speed_kts: 12.0,
            oscillation_deg: 8.0,
            oscillation_period_secs: 240.0,
            shift_deg: 4.0,
            gust_kts: 1.5,
            puff_strength: 0.12,
        }
    }
}

/// Global wind for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindSample {
    pub wind: Wind,
    pub baseline_deg: f32,
}

#[derive(Debug, Clone, Copy)]
struct PuffBand {
    wavelength: f32,
    phase: f32,
    /// Band orientation relative to the wind
    skew_deg: f32,
    amplitude: f32,
}

/// Deterministic wind evolution. All randomness comes from the race stream.
#[derive(Debug, Clone)]
pub struct WindModel {
    config: WindConfig,
    oscillation_phase: f32,
    shift: f32,
    gust: f32,
    puffs: Vec<PuffBand>,
}

impl WindModel {
    pub fn new(config: WindConfig, rng: &mut SimRng) -> Self {
        let oscillation_phase = rng.range(0.0, TAU);
        let puffs = (0..PUFF_BANDS)
            .map(|_| PuffBand {
                wavelength: rng.range(120.0, 320.0),
                phase: rng.range(0.0, TAU),
                skew_deg: rng.range(-25.0, 25.0),
                amplitude: rng.range(0.4, 1.0),
            })
            .collect();
        Self {
            config,
            oscillation_phase,
            shift: 0.0,
            gust: 0.0,
            puffs,
        }
    }

    pub fn config(&self) -> &WindConfig {
        &self.config
    }

    /// Baseline direction at a point in simulated time
    pub fn baseline_at(&self, elapsed: f32) -> f32 {
        let period = self.config.oscillation_period_secs.max(1.0);
        let osc = self.config.oscillation_deg * (TAU * elapsed / period + self.oscillation_phase).sin();
        normalize_deg(self.config.direction_deg + osc)
    }

    /// Advance the global wind. With `fixed` set nothing moves: the direction
    /// stays on the previous baseline and no random draws are made.
    pub fn step(&mut self, prev_baseline_deg: f32, elapsed: f32, dt: f32, fixed: bool, rng: &mut SimRng) -> WindSample {
        if fixed {
            return WindSample {
                wind: Wind {
                    direction_deg: prev_baseline_deg,
                    speed_kts: self.config.speed_kts,
                },
                baseline_deg: prev_baseline_deg,
            };
        }

        let baseline_deg = self.baseline_at(elapsed);

        // Mean-reverting random walks
        let dt = dt.max(0.0);
        let root_dt = dt.sqrt();
        self.shift += rng.signed() * 1.5 * root_dt - self.shift * 0.05 * dt;
        self.shift = self.shift.clamp(-self.config.shift_deg, self.config.shift_deg);
        self.gust += rng.signed() * 0.6 * root_dt - self.gust * 0.1 * dt;
        self.gust = self.gust.clamp(-self.config.gust_kts, self.config.gust_kts);

        WindSample {
            wind: Wind {
                direction_deg: normalize_deg(baseline_deg + self.shift),
                speed_kts: (self.config.speed_kts + self.gust).max(0.0),
            },
            baseline_deg,
        }
    }

    /// Local wind at a position (global wind modulated by drifting puff bands)
    pub fn sample(&self, wind: Wind, pos: Vec2, elapsed: f32, fixed: bool) -> Wind {
        if fixed || self.puffs.is_empty() {
            return wind;
        }
        let drift = wind.speed_kts * KNOTS_TO_WORLD * 0.6 * elapsed;
        let mut speed_term = 0.0;
        let mut dir_term = 0.0;
        for band in &self.puffs {
            let axis = -heading_vec(wind.direction_deg + band.skew_deg);
            let along = pos.dot(axis) - drift;
            let wave = (TAU * along / band.wavelength + band.phase).sin();
            speed_term += band.amplitude * wave;
            dir_term += band.amplitude * (TAU * along / band.wavelength + band.phase).cos();
        }
        let norm = PUFF_BANDS as f32;
        let factor = (1.0 + self.config.puff_strength * speed_term / norm).clamp(0.5, 1.5);
        Wind {
            direction_deg: normalize_deg(wind.direction_deg + 3.0 * dir_term / norm),
            speed_kts: (wind.speed_kts * factor).max(0.0),
        }
    }
}
