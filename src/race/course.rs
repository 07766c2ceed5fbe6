//! Course geometry: marks, lines and the leg sequence

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::util::geometry::{bearing_deg, closest_on_segment, heading_vec, project_param, side_of};

/// Default mark radius (metres)
pub const MARK_RADIUS: f32 = 1.5;

/// Distance from the mark centre at which boats are steered round it
pub const ROUNDING_CLEARANCE: f32 = 10.0;

/// How far ahead of the boat, in the rounding direction, the steering point sits
pub const ROUNDING_LEAD_DEG: f32 = 60.0;

/// A buoy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub name: String,
    pub pos: Vec2,
    pub radius: f32,
}

/// A start or finish line between the pin end and the committee boat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub pin: Vec2,
    pub committee: Vec2,
}

impl Line {
    pub fn midpoint(&self) -> Vec2 {
        (self.pin + self.committee) * 0.5
    }

    pub fn length(&self) -> f32 {
        self.pin.distance(self.committee)
    }

    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        closest_on_segment(self.pin, self.committee, p).0
    }

    /// Signed side of `p` relative to the pin -> committee direction
    pub fn side(&self, p: Vec2) -> f32 {
        side_of(self.pin, self.committee, p)
    }

    /// +1 or -1: the sign of `side` for points on the same side as `reference`
    pub fn side_sign(&self, reference: Vec2) -> f32 {
        if self.side(reference) >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    /// True if any of `points` lies strictly on the `side_sign` side and
    /// between the two ends. A zero-length line is never crossed.
    pub fn is_over(&self, side_sign: f32, points: &[Vec2]) -> bool {
        points.iter().any(|p| {
            self.side(*p) * side_sign > 0.0
                && project_param(self.pin, self.committee, *p).is_some_and(|u| (0.0..=1.0).contains(&u))
        })
    }
}

/// Which side the mark is left on while rounding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Mark kept to port: bearing from the mark to the boat decreases
    Port,
    /// Mark kept to starboard: bearing from the mark to the boat increases
    Starboard,
}

impl Rounding {
    /// Sign of the bearing change (mark -> boat) while rounding
    pub fn sweep_sign(self) -> f32 {
        match self {
            Rounding::Port => -1.0,
            Rounding::Starboard => 1.0,
        }
    }
}

/// One leg of the course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Leg {
    Start { line: Line },
    Mark { mark: usize, rounding: Rounding },
    /// Pass between the marks, then round one of them. `port_mark` is the mark
    /// left to port when passing through.
    Gate { port_mark: usize, starboard_mark: usize },
    Finish { line: Line },
}

/// Fixed course geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub marks: Vec<Mark>,
    pub legs: Vec<Leg>,
    pub laps_to_finish: u32,
}

impl Course {
    /// Start line, windward mark (port rounding), leeward gate, finish line.
    ///
    /// The start line centre sits at the origin; the windward mark is
    /// `beat_length` metres straight upwind.
    pub fn windward_leeward(wind_dir_deg: f32, laps: u32, beat_length: f32) -> Self {
        let up = heading_vec(wind_dir_deg);
        // Starboard-hand direction when looking upwind
        let right = heading_vec(wind_dir_deg + 90.0);

        let start = Line {
            pin: -right * 60.0,
            committee: right * 60.0,
        };
        let finish_centre = up * 25.0;
        let finish = Line {
            pin: finish_centre - right * 35.0,
            committee: finish_centre + right * 35.0,
        };
        let gate_centre = up * 70.0;

        let marks = vec![
            Mark {
                name: "windward".to_string(),
                pos: up * beat_length,
                radius: MARK_RADIUS,
            },
            // Looking downwind this one is on the left, so boats leave it to port
            Mark {
                name: "gate_left".to_string(),
                pos: gate_centre + right * 18.0,
                radius: MARK_RADIUS,
            },
            Mark {
                name: "gate_right".to_string(),
                pos: gate_centre - right * 18.0,
                radius: MARK_RADIUS,
            },
        ];

        Self {
            marks,
            legs: vec![
                Leg::Start { line: start },
                Leg::Mark {
                    mark: 0,
                    rounding: Rounding::Port,
                },
                Leg::Gate {
                    port_mark: 1,
                    starboard_mark: 2,
                },
                Leg::Finish { line: finish },
            ],
            laps_to_finish: laps.max(1),
        }
    }

    pub fn mark(&self, index: usize) -> Option<&Mark> {
        self.marks.get(index)
    }

    pub fn leg(&self, index: usize) -> Option<&Leg> {
        self.legs.get(index)
    }

    pub fn start_line(&self) -> Option<Line> {
        self.legs.iter().find_map(|leg| match leg {
            Leg::Start { line } => Some(*line),
            _ => None,
        })
    }

    pub fn finish_leg_index(&self) -> Option<usize> {
        self.legs
            .iter()
            .position(|leg| matches!(leg, Leg::Finish { .. }))
    }

    /// First leg after the start; non-final laps loop back here
    pub fn loop_back_leg(&self) -> usize {
        match self.legs.first() {
            Some(Leg::Start { .. }) if self.legs.len() > 1 => 1,
            _ => 0,
        }
    }

    /// Leg sailed immediately before `leg_index` on lap `lap`
    pub fn previous_leg(&self, leg_index: usize, lap: u32) -> Option<usize> {
        if lap > 0 && leg_index == self.loop_back_leg() {
            // Back from the leeward end of the previous lap
            return match self.finish_leg_index() {
                Some(f) if f > 0 => Some(f - 1),
                _ => self.legs.len().checked_sub(1),
            };
        }
        leg_index.checked_sub(1)
    }

    /// Reference point of a leg (mark, gate midpoint, line midpoint)
    pub fn waypoint(&self, leg_index: usize) -> Option<Vec2> {
        match self.legs.get(leg_index)? {
            Leg::Start { line } | Leg::Finish { line } => Some(line.midpoint()),
            Leg::Mark { mark, .. } => self.mark(*mark).map(|m| m.pos),
            Leg::Gate {
                port_mark,
                starboard_mark,
            } => {
                let a = self.mark(*port_mark)?;
                let b = self.mark(*starboard_mark)?;
                Some((a.pos + b.pos) * 0.5)
            }
        }
    }

    /// Point a boat at `pos` should steer for on this leg
    pub fn target_point(&self, leg_index: usize, committed_mark: Option<usize>, pos: Vec2) -> Option<Vec2> {
        match self.legs.get(leg_index)? {
            Leg::Start { line } | Leg::Finish { line } => Some(line.closest_point(pos)),
            Leg::Mark { mark, .. } => self.mark(*mark).map(|m| m.pos),
            Leg::Gate { .. } => match committed_mark.and_then(|m| self.mark(m)) {
                Some(m) => Some(m.pos),
                None => self.waypoint(leg_index),
            },
        }
    }

    /// Point to steer for on this leg. Lines and an uncommitted gate are
    /// aimed at directly; marks are passed on their rounding side via
    /// [`rounding_point`].
    pub fn steering_point(&self, leg_index: usize, committed_mark: Option<usize>, pos: Vec2) -> Option<Vec2> {
        match self.legs.get(leg_index)? {
            Leg::Start { line } | Leg::Finish { line } => Some(line.closest_point(pos)),
            Leg::Mark { mark, rounding } => self.mark(*mark).map(|m| rounding_point(m.pos, *rounding, pos)),
            Leg::Gate {
                port_mark,
                starboard_mark,
            } => match committed_mark {
                Some(m) if m == *port_mark || m == *starboard_mark => {
                    let rounding = if m == *port_mark {
                        Rounding::Port
                    } else {
                        Rounding::Starboard
                    };
                    self.mark(m).map(|mark| rounding_point(mark.pos, rounding, pos))
                }
                _ => self.waypoint(leg_index),
            },
        }
    }

    /// Leg a boat sails after completing `leg_index` on lap `lap` (already
    /// incremented for gates). `None` means the boat has finished.
    pub fn next_leg(&self, leg_index: usize, lap: u32) -> Option<usize> {
        match self.legs.get(leg_index)? {
            Leg::Finish { .. } => None,
            Leg::Gate { .. } => {
                if lap < self.laps_to_finish {
                    Some(self.loop_back_leg())
                } else {
                    self.finish_leg_index()
                }
            }
            _ => {
                let next = leg_index + 1;
                if next >= self.legs.len() {
                    None
                } else if matches!(self.legs[next], Leg::Finish { .. }) && lap < self.laps_to_finish {
                    Some(self.loop_back_leg())
                } else {
                    Some(next)
                }
            }
        }
    }

    /// Axis-aligned extent of everything on the course
    pub fn bounds(&self) -> (Vec2, Vec2) {
        let mut points: Vec<Vec2> = self.marks.iter().map(|m| m.pos).collect();
        for leg in &self.legs {
            if let Leg::Start { line } | Leg::Finish { line } = leg {
                points.push(line.pin);
                points.push(line.committee);
            }
        }
        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(f32::MIN);
        for p in points {
            min = min.min(p);
            max = max.max(p);
        }
        if min.x > max.x {
            return (Vec2::ZERO, Vec2::ZERO);
        }
        (min, max)
    }
}

/// Point on the clearance circle round `mark`, leading the boat's bearing
/// from the mark in the rounding direction. Far off it lies beside the mark
/// on the side the boat must pass; close in, chasing it circles the mark.
pub fn rounding_point(mark: Vec2, rounding: Rounding, pos: Vec2) -> Vec2 {
    let lead = bearing_deg(mark, pos) + rounding.sweep_sign() * ROUNDING_LEAD_DEG;
    mark + heading_vec(lead) * ROUNDING_CLEARANCE
}
