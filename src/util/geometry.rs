//! Angle math and segment geometry
//!
//! Headings and bearings are compass degrees: 0 = north, increasing clockwise.
//! World space is x east, y north.

use glam::Vec2;

/// Below this length a segment is treated as a point
const DEGENERATE_EPS: f32 = 1e-6;

/// Normalize an angle to [0, 360)
pub fn normalize_deg(deg: f32) -> f32 {
    let d = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if d >= 360.0 {
        0.0
    } else {
        d
    }
}

/// Normalize an angle to (-180, 180]
pub fn signed_deg(deg: f32) -> f32 {
    let d = normalize_deg(deg);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Shortest signed rotation taking `from` to `to`
pub fn angle_diff(to: f32, from: f32) -> f32 {
    signed_deg(to - from)
}

/// Unit vector for a compass heading
pub fn heading_vec(deg: f32) -> Vec2 {
    let r = deg.to_radians();
    Vec2::new(r.sin(), r.cos())
}

/// Compass bearing from `from` to `to`
pub fn bearing_deg(from: Vec2, to: Vec2) -> f32 {
    let d = to - from;
    if d.length_squared() < DEGENERATE_EPS {
        return 0.0;
    }
    normalize_deg(d.x.atan2(d.y).to_degrees())
}

/// Left-hand perpendicular of a direction (port side of a heading)
pub fn left_of(dir: Vec2) -> Vec2 {
    Vec2::new(-dir.y, dir.x)
}

/// Right-hand perpendicular of a direction (starboard side of a heading)
pub fn right_of(dir: Vec2) -> Vec2 {
    Vec2::new(dir.y, -dir.x)
}

/// Signed area test: positive when `p` lies left of the directed line a -> b
pub fn side_of(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

/// Closest point on segment [a, b] to `p`, with its parameter along the segment
pub fn closest_on_segment(a: Vec2, b: Vec2, p: Vec2) -> (Vec2, f32) {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < DEGENERATE_EPS {
        return (a, 0.0);
    }
    let u = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (a + ab * u, u)
}

/// Parameter of `p` projected onto the infinite line through a, b (unclamped)
pub fn project_param(a: Vec2, b: Vec2, p: Vec2) -> Option<f32> {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < DEGENERATE_EPS {
        return None;
    }
    Some((p - a).dot(ab) / len_sq)
}

pub fn point_segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let (c, _) = closest_on_segment(a, b, p);
    p.distance(c)
}

/// Intersection parameters (t along p, u along q) of two segments, if they cross
pub fn segment_intersection(p0: Vec2, p1: Vec2, q0: Vec2, q1: Vec2) -> Option<(f32, f32)> {
    let r = p1 - p0;
    let s = q1 - q0;
    let denom = r.perp_dot(s);
    if denom.abs() < DEGENERATE_EPS {
        return None;
    }
    let qp = q0 - p0;
    let t = qp.perp_dot(s) / denom;
    let u = qp.perp_dot(r) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some((t, u))
    } else {
        None
    }
}

/// Closest pair of points between two segments
pub fn closest_points_between_segments(p0: Vec2, p1: Vec2, q0: Vec2, q1: Vec2) -> (Vec2, Vec2) {
    if let Some((t, _)) = segment_intersection(p0, p1, q0, q1) {
        let hit = p0 + (p1 - p0) * t;
        return (hit, hit);
    }

    // Non-crossing segments in the plane are closest at an endpoint
    let candidates = [
        (p0, closest_on_segment(q0, q1, p0).0),
        (p1, closest_on_segment(q0, q1, p1).0),
        (closest_on_segment(p0, p1, q0).0, q0),
        (closest_on_segment(p0, p1, q1).0, q1),
    ];

    let mut best = candidates[0];
    let mut best_dist = best.0.distance_squared(best.1);
    for pair in candidates.iter().skip(1) {
        let d = pair.0.distance_squared(pair.1);
        if d < best_dist {
            best = *pair;
            best_dist = d;
        }
    }
    best
}

pub fn segment_distance(p0: Vec2, p1: Vec2, q0: Vec2, q1: Vec2) -> f32 {
    let (a, b) = closest_points_between_segments(p0, p1, q0, q1);
    a.distance(b)
}

/// Linear interpolation
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
