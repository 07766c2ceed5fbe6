//! Wind shadow cast by boats onto each other
//!
//! Two strategies produce the same factor: an analytic per-pair cone, or a
//! world grid onto which pre-rendered intensity stamps (one per quantized
//! wind angle and tack) are blitted every tick.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::util::geometry::{heading_vec, normalize_deg};

use super::state::{BoatState, Tack, Wind};

/// Quantized wind directions in the stamp atlas
pub const STAMP_BINS: usize = 36;

/// Grid cell size (metres)
pub const GRID_CELL: f32 = 3.0;

/// Margin added around the course and boats when the grid is (re)built
pub const GRID_PADDING: f32 = 100.0;

/// Longest side a grid may have. A fleet spread wider than this is summed
/// analytically instead.
pub const GRID_MAX_EXTENT: f32 = 4000.0;

/// Wake tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WakeParams {
    pub length: f32,
    pub width_start: f32,
    pub width_end: f32,
    /// Exponent shaping how fast the wake widens
    pub width_curve: f32,
    pub leeward_mult: f32,
    pub windward_mult: f32,
    pub core_strength: f32,
    pub turbulent_strength: f32,
    pub core_half_angle_deg: f32,
    pub turbulent_half_angle_deg: f32,
    pub max_slowdown: f32,
}

impl Default for WakeParams {
    fn default() -> Self {
        Self {
            length: 60.0,
            width_start: 3.0,
            width_end: 18.0,
            width_curve: 0.7,
            leeward_mult: 1.2,
            windward_mult: 0.6,
            core_strength: 0.25,
            turbulent_strength: 0.1,
            core_half_angle_deg: 10.0,
            turbulent_half_angle_deg: 25.0,
            max_slowdown: 0.35,
        }
    }
}

/// Partial update from the control surface. Absent fields keep their current
/// value; unusable values (non-finite or negative) fall back to the default.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WakeParamsPatch {
    pub length: Option<f32>,
    pub width_start: Option<f32>,
    pub width_end: Option<f32>,
    pub width_curve: Option<f32>,
    pub leeward_mult: Option<f32>,
    pub windward_mult: Option<f32>,
    pub core_strength: Option<f32>,
    pub turbulent_strength: Option<f32>,
    pub core_half_angle_deg: Option<f32>,
    pub turbulent_half_angle_deg: Option<f32>,
    pub max_slowdown: Option<f32>,
}

fn pick(current: f32, patch: Option<f32>, default: f32) -> f32 {
    match patch {
        None => current,
        Some(v) if v.is_finite() && v >= 0.0 => v,
        Some(_) => default,
    }
}

impl WakeParams {
    pub fn apply(&self, patch: &WakeParamsPatch) -> WakeParams {
        let d = WakeParams::default();
        let mut out = WakeParams {
            length: pick(self.length, patch.length, d.length),
            width_start: pick(self.width_start, patch.width_start, d.width_start),
            width_end: pick(self.width_end, patch.width_end, d.width_end),
            width_curve: pick(self.width_curve, patch.width_curve, d.width_curve),
            leeward_mult: pick(self.leeward_mult, patch.leeward_mult, d.leeward_mult),
            windward_mult: pick(self.windward_mult, patch.windward_mult, d.windward_mult),
            core_strength: pick(self.core_strength, patch.core_strength, d.core_strength),
            turbulent_strength: pick(self.turbulent_strength, patch.turbulent_strength, d.turbulent_strength),
            core_half_angle_deg: pick(self.core_half_angle_deg, patch.core_half_angle_deg, d.core_half_angle_deg),
            turbulent_half_angle_deg: pick(
                self.turbulent_half_angle_deg,
                patch.turbulent_half_angle_deg,
                d.turbulent_half_angle_deg,
            ),
            max_slowdown: pick(self.max_slowdown, patch.max_slowdown, d.max_slowdown),
        };
        out.max_slowdown = out.max_slowdown.min(1.0);
        if out.length <= 0.0 {
            out.length = d.length;
        }
        out
    }

    /// Furthest a shadow reaches from its source along either axis
    pub fn reach(&self) -> f32 {
        self.length + self.width_end.max(self.width_start) * self.leeward_mult.max(self.windward_mult)
    }
}

/// Cross-wind direction of the leeward side for a tack
pub fn leeward_axis(wind_dir_deg: f32, tack: Tack) -> Vec2 {
    match tack {
        Tack::Port => heading_vec(wind_dir_deg + 90.0),
        Tack::Starboard => heading_vec(wind_dir_deg - 90.0),
    }
}

/// Shadow a source boat at `source` casts on `point`
pub fn shadow_intensity(params: &WakeParams, source: Vec2, tack: Tack, wind_dir_deg: f32, point: Vec2) -> f32 {
    let rel = point - source;
    let downwind = -heading_vec(wind_dir_deg);
    let along = rel.dot(downwind);
    if along <= 0.0 || along >= params.length {
        return 0.0;
    }
    let lateral = rel.dot(leeward_axis(wind_dir_deg, tack));

    let frac = along / params.length;
    let width = params.width_start + (params.width_end - params.width_start) * frac.powf(params.width_curve);
    let side_mult = if lateral >= 0.0 {
        params.leeward_mult
    } else {
        params.windward_mult
    };
    let half_width = 0.5 * width * side_mult;
    if half_width <= 0.0 || lateral.abs() >= half_width {
        return 0.0;
    }

    let angle = lateral.abs().atan2(along).to_degrees();
    let strength = if angle <= params.core_half_angle_deg {
        params.core_strength
    } else if angle <= params.turbulent_half_angle_deg {
        let span = (params.turbulent_half_angle_deg - params.core_half_angle_deg).max(1e-3);
        let k = (angle - params.core_half_angle_deg) / span;
        params.turbulent_strength * (1.0 - k)
    } else {
        0.0
    };

    let lateral_falloff = 1.0 - (lateral / half_width).powi(2);
    strength * (1.0 - frac) * lateral_falloff
}

/// How wake factors are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeStrategy {
    Analytic,
    Grid,
}

/// Square intensity tile centred on its source cell
#[derive(Debug, Clone)]
struct Stamp {
    half: i32,
    data: Vec<f32>,
}

impl Stamp {
    fn render(params: &WakeParams, wind_dir_deg: f32, tack: Tack) -> Self {
        let half = (params.reach() / GRID_CELL).ceil() as i32;
        let side = (2 * half + 1) as usize;
        let mut data = vec![0.0; side * side];
        for j in -half..=half {
            for i in -half..=half {
                let p = Vec2::new(i as f32, j as f32) * GRID_CELL;
                let idx = (j + half) as usize * side + (i + half) as usize;
                data[idx] = shadow_intensity(params, Vec2::ZERO, tack, wind_dir_deg, p);
            }
        }
        Self { half, data }
    }

    fn side(&self) -> i32 {
        2 * self.half + 1
    }

    fn at(&self, di: i32, dj: i32) -> f32 {
        if di.abs() > self.half || dj.abs() > self.half {
            return 0.0;
        }
        let side = self.side();
        self.data[((dj + self.half) * side + (di + self.half)) as usize]
    }
}

/// Stamps for every (wind bin, tack)
#[derive(Debug, Clone)]
struct StampAtlas {
    stamps: Vec<Stamp>,
}

impl StampAtlas {
    fn build(params: &WakeParams) -> Self {
        let mut stamps = Vec::with_capacity(STAMP_BINS * 2);
        for bin in 0..STAMP_BINS {
            let dir = bin as f32 * 360.0 / STAMP_BINS as f32;
            stamps.push(Stamp::render(params, dir, Tack::Port));
            stamps.push(Stamp::render(params, dir, Tack::Starboard));
        }
        Self { stamps }
    }

    fn get(&self, wind_dir_deg: f32, tack: Tack) -> &Stamp {
        let step = 360.0 / STAMP_BINS as f32;
        let bin = (normalize_deg(wind_dir_deg) / step).round() as usize % STAMP_BINS;
        let offset = match tack {
            Tack::Port => 0,
            Tack::Starboard => 1,
        };
        &self.stamps[bin * 2 + offset]
    }
}

/// Accumulated shadow over the course
#[derive(Debug, Clone)]
struct WakeGrid {
    origin: Vec2,
    width: i32,
    height: i32,
    data: Vec<f32>,
}

impl WakeGrid {
    fn covering(min: Vec2, max: Vec2) -> Self {
        let origin = min - Vec2::splat(GRID_PADDING);
        let extent = (max + Vec2::splat(GRID_PADDING)) - origin;
        let width = (extent.x / GRID_CELL).ceil().max(1.0) as i32;
        let height = (extent.y / GRID_CELL).ceil().max(1.0) as i32;
        Self {
            origin,
            width,
            height,
            data: vec![0.0; (width * height) as usize],
        }
    }

    fn cell_of(&self, p: Vec2) -> (i32, i32) {
        let rel = (p - self.origin) / GRID_CELL;
        (rel.x.floor() as i32, rel.y.floor() as i32)
    }

    /// True if a stamp centred on `p` fits entirely inside the grid
    fn contains_with_margin(&self, p: Vec2, margin_cells: i32) -> bool {
        let (i, j) = self.cell_of(p);
        i - margin_cells >= 0 && j - margin_cells >= 0 && i + margin_cells < self.width && j + margin_cells < self.height
    }

    fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    fn blit(&mut self, stamp: &Stamp, centre: (i32, i32)) {
        let h = stamp.half;
        for dj in -h..=h {
            let j = centre.1 + dj;
            if j < 0 || j >= self.height {
                continue;
            }
            for di in -h..=h {
                let i = centre.0 + di;
                if i < 0 || i >= self.width {
                    continue;
                }
                let v = stamp.at(di, dj);
                if v > 0.0 {
                    self.data[(j * self.width + i) as usize] += v;
                }
            }
        }
    }

    fn value(&self, cell: (i32, i32)) -> f32 {
        let (i, j) = cell;
        if i < 0 || j < 0 || i >= self.width || j >= self.height {
            return 0.0;
        }
        self.data[(j * self.width + i) as usize]
    }
}

/// Whether a grid over these bounds stays within `GRID_MAX_EXTENT`
fn fits(min: Vec2, max: Vec2) -> bool {
    let extent = max - min + Vec2::splat(2.0 * GRID_PADDING);
    extent.max_element() <= GRID_MAX_EXTENT
}

/// Host-local wake model. Owned by one simulation context and rebuilt on
/// reset or parameter change, never shared.
#[derive(Debug, Clone)]
pub struct WakeModel {
    params: WakeParams,
    strategy: WakeStrategy,
    atlas: Option<StampAtlas>,
    grid: Option<WakeGrid>,
}

impl WakeModel {
    pub fn new(params: WakeParams, strategy: WakeStrategy) -> Self {
        Self {
            params,
            strategy,
            atlas: None,
            grid: None,
        }
    }

    pub fn params(&self) -> &WakeParams {
        &self.params
    }

    pub fn strategy(&self) -> WakeStrategy {
        self.strategy
    }

    pub fn set_params(&mut self, params: WakeParams) {
        self.params = params;
        self.reset();
    }

    pub fn apply_patch(&mut self, patch: &WakeParamsPatch) {
        let next = self.params.apply(patch);
        self.set_params(next);
    }

    /// Drop the atlas and grid; both are rebuilt lazily
    pub fn reset(&mut self) {
        self.atlas = None;
        self.grid = None;
    }

    /// Wake factor in [1 - max_slowdown, 1] for every boat
    pub fn compute_factors(
        &mut self,
        boats: &BTreeMap<Uuid, BoatState>,
        wind: Wind,
        course_bounds: (Vec2, Vec2),
    ) -> BTreeMap<Uuid, f32> {
        let sums = match self.strategy {
            WakeStrategy::Analytic => self.analytic_sums(boats, wind),
            WakeStrategy::Grid => self.grid_sums(boats, wind, course_bounds),
        };
        let cap = self.params.max_slowdown.clamp(0.0, 1.0);
        sums.into_iter()
            .map(|(id, sum)| (id, 1.0 - sum.max(0.0).min(cap)))
            .collect()
    }

    fn analytic_sums(&self, boats: &BTreeMap<Uuid, BoatState>, wind: Wind) -> BTreeMap<Uuid, f32> {
        let mut sums = BTreeMap::new();
        for target in boats.values() {
            let mut sum = 0.0;
            for source in boats.values() {
                if source.id == target.id {
                    continue;
                }
                sum += shadow_intensity(
                    &self.params,
                    source.pos,
                    source.tack(wind.direction_deg),
                    wind.direction_deg,
                    target.pos,
                );
            }
            sums.insert(target.id, sum);
        }
        sums
    }

    fn grid_sums(
        &mut self,
        boats: &BTreeMap<Uuid, BoatState>,
        wind: Wind,
        course_bounds: (Vec2, Vec2),
    ) -> BTreeMap<Uuid, f32> {
        let params = self.params;
        let atlas = self.atlas.get_or_insert_with(|| StampAtlas::build(&params));
        let margin = (params.reach() / GRID_CELL).ceil() as i32;

        let reach = Vec2::splat(params.reach());
        let fleet = boats
            .values()
            .map(|b| b.pos)
            .filter(|p| p.is_finite())
            .fold(None, |acc: Option<(Vec2, Vec2)>, p| match acc {
                Some((lo, hi)) => Some((lo.min(p - reach), hi.max(p + reach))),
                None => Some((p - reach, p + reach)),
            });

        let needs_rebuild = match &self.grid {
            None => true,
            Some(grid) => boats
                .values()
                .any(|b| b.pos.is_finite() && !grid.contains_with_margin(b.pos, margin)),
        };
        if needs_rebuild {
            let (course_lo, course_hi) = course_bounds;
            // Course plus fleet, or the fleet alone once boats stray far off the course
            let bounds = match fleet {
                Some((lo, hi)) if fits(lo.min(course_lo), hi.max(course_hi)) => {
                    Some((lo.min(course_lo), hi.max(course_hi)))
                }
                Some((lo, hi)) if fits(lo, hi) => Some((lo, hi)),
                Some(_) => None,
                None => Some(course_bounds),
            };
            match bounds {
                Some((min, max)) => {
                    let grid = WakeGrid::covering(min, max);
                    debug!(width = grid.width, height = grid.height, "Wake grid rebuilt");
                    self.grid = Some(grid);
                }
                None => {
                    debug!("Fleet too spread out for the wake grid");
                    self.grid = None;
                    return self.analytic_sums(boats, wind);
                }
            }
        }
        let Some(grid) = self.grid.as_mut() else {
            return BTreeMap::new();
        };

        grid.clear();
        let mut cells = BTreeMap::new();
        for b in boats.values() {
            if !b.pos.is_finite() {
                cells.insert(b.id, None);
                continue;
            }
            let cell = grid.cell_of(b.pos);
            let tack = b.tack(wind.direction_deg);
            grid.blit(atlas.get(wind.direction_deg, tack), cell);
            cells.insert(b.id, Some((cell, tack)));
        }

        cells
            .into_iter()
            .map(|(id, slot)| {
                let sum = slot.map_or(0.0, |(cell, tack)| {
                    // Remove the boat's own contribution at its own cell
                    let own = atlas.get(wind.direction_deg, tack).at(0, 0);
                    (grid.value(cell) - own).max(0.0)
                });
                (id, sum)
            })
            .collect()
    }
}

impl Default for WakeModel {
    fn default() -> Self {
        Self::new(WakeParams::default(), WakeStrategy::Grid)
    }
}
