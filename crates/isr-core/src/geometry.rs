//! Planar geometry for SAM avoidance and route checks.
//!
//! Everything downstream (wrapping, the path oracle, the post-optimizer)
//! funnels through these predicates, so they are deterministic for identical
//! input and all tolerances live here as named constants.

/// Tolerance for orientation (cross product sign) tests.
pub const EPS_ORIENT: f64 = 1e-9;
/// Tolerance for point coincidence / on-boundary tests.
pub const EPS_COINCIDE: f64 = 1e-6;
/// Tolerance applied when comparing route length to a fuel budget.
pub const EPS_BUDGET: f64 = 1e-6;
/// Minimum chord length when sampling a SAM circle into polygon vertices.
pub const SAM_SAMPLE_STEP_MIN: f64 = 2.0;

/// Interior samples taken per segment when checking polygon penetration.
pub const SEGMENT_SAMPLES: usize = 20;

/// A point in mission coordinates.
pub type Point = (f64, f64);

/// A convex polygon as a CCW-ordered vertex list (not closed).
pub type Polygon = Vec<Point>;

/// Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f64 {
    (b.0 - a.0).hypot(b.1 - a.1)
}

/// Squared Euclidean distance (avoids the sqrt for comparisons).
pub fn distance_sq(a: Point, b: Point) -> f64 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    dx * dx + dy * dy
}

/// 2D cross product (OA x OB).
///
/// `> 0`: counter-clockwise, `< 0`: clockwise, `~ 0`: collinear.
pub fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Dot product of two 2D vectors.
pub fn dot(v1: Point, v2: Point) -> f64 {
    v1.0 * v2.0 + v1.1 * v2.1
}

/// Total length of a polyline.
pub fn polyline_length(path: &[Point]) -> f64 {
    path.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Check whether `q` lies on segment `p`-`r`, assuming the three points are
/// already known to be collinear.
fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.0 >= p.0.min(r.0) && q.0 <= p.0.max(r.0) && q.1 >= p.1.min(r.1) && q.1 <= p.1.max(r.1)
}

/// Check if segment `a1`-`a2` intersects segment `b1`-`b2`.
///
/// Handles proper crossings and all four collinear-touch cases.
pub fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = cross(b1, b2, a1);
    let d2 = cross(b1, b2, a2);
    let d3 = cross(a1, a2, b1);
    let d4 = cross(a1, a2, b2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    if d1.abs() < EPS_ORIENT && on_segment(b1, a1, b2) {
        return true;
    }
    if d2.abs() < EPS_ORIENT && on_segment(b1, a2, b2) {
        return true;
    }
    if d3.abs() < EPS_ORIENT && on_segment(a1, b1, a2) {
        return true;
    }
    if d4.abs() < EPS_ORIENT && on_segment(a1, b2, a2) {
        return true;
    }

    false
}

/// Check if two segments properly cross (interiors intersect, endpoints
/// excluded). Used by the 2-opt pass, where a shared route waypoint must not
/// count as a crossing.
pub fn segments_properly_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = cross(b1, b2, a1);
    let d2 = cross(b1, b2, a2);
    let d3 = cross(a1, a2, b1);
    let d4 = cross(a1, a2, b2);

    ((d1 > EPS_ORIENT && d2 < -EPS_ORIENT) || (d1 < -EPS_ORIENT && d2 > EPS_ORIENT))
        && ((d3 > EPS_ORIENT && d4 < -EPS_ORIENT) || (d3 < -EPS_ORIENT && d4 > EPS_ORIENT))
}

/// Check if a point is strictly inside a polygon using ray casting.
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    let (x, y) = p;
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Check if a point lies on the polygon boundary (on an edge or a vertex).
pub fn point_on_polygon_boundary(p: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    for i in 0..n {
        let v1 = polygon[i];
        let v2 = polygon[(i + 1) % n];

        if (p.0 - v1.0).abs() < EPS_COINCIDE && (p.1 - v1.1).abs() < EPS_COINCIDE {
            return true;
        }

        let dx = v2.0 - v1.0;
        let dy = v2.1 - v1.1;
        if dx.abs() < EPS_COINCIDE && dy.abs() < EPS_COINCIDE {
            continue; // degenerate edge
        }

        // Parameterize p = v1 + t * (v2 - v1) along the dominant axis.
        if dx.abs() > dy.abs() {
            let t = (p.0 - v1.0) / dx;
            let expected_y = v1.1 + t * dy;
            if (0.0..=1.0).contains(&t) && (p.1 - expected_y).abs() < EPS_COINCIDE {
                return true;
            }
        } else {
            let t = (p.1 - v1.1) / dy;
            let expected_x = v1.0 + t * dx;
            if (0.0..=1.0).contains(&t) && (p.0 - expected_x).abs() < EPS_COINCIDE {
                return true;
            }
        }
    }
    false
}

/// Check if segment `a`-`b` enters the interior of the polygon.
///
/// Samples interior parameters along the segment; points exactly on the
/// boundary are allowed (boundary traversal is a legal flight path).
pub fn segment_enters_polygon(a: Point, b: Point, polygon: &[Point]) -> bool {
    for i in 0..=SEGMENT_SAMPLES {
        let t = i as f64 / SEGMENT_SAMPLES as f64;
        let p = (a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1));
        if point_in_polygon(p, polygon) && !point_on_polygon_boundary(p, polygon) {
            return true;
        }
    }
    false
}

/// Perpendicular distance from a point to a segment (projection clamped to
/// the segment).
pub fn point_to_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let len_sq = distance_sq(a, b);
    if len_sq < EPS_COINCIDE * EPS_COINCIDE {
        return distance(p, a);
    }
    let t = (dot((p.0 - a.0, p.1 - a.1), (b.0 - a.0, b.1 - a.1)) / len_sq).clamp(0.0, 1.0);
    let proj = (a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1));
    distance(p, proj)
}
