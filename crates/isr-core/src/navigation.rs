//! Obstacle-avoiding path oracle.
//!
//! Plans shortest polylines around convex obstacle polygons:
//!
//! 1. Direct segment when nothing blocks it.
//! 2. Tangent-arc-tangent around a single polygon: find the silhouette
//!    vertices from the start, walk the boundary in both directions to the
//!    first vertex that sees the goal, reject arcs that reverse direction at
//!    entry or exit, keep the shortest survivor.
//! 3. Visibility graph + Dijkstra when several polygons are in play.
//!
//! Paths NEVER enter polygon interiors; boundary traversal is allowed. When
//! no valid path exists the oracle returns an explicit invalid plan (empty
//! polyline, infinite length) rather than guessing.

use crate::geometry::{
    cross, distance, dot, point_in_polygon, polyline_length, segment_enters_polygon,
    segments_intersect, Point, Polygon, EPS_COINCIDE, SEGMENT_SAMPLES,
};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Result of a path query. Valid iff the polyline is non-empty and the
/// length finite; the method tag is descriptive only.
#[derive(Debug, Clone)]
pub struct PathPlan {
    pub points: Vec<Point>,
    pub length: f64,
    pub method: String,
}

impl PathPlan {
    pub fn direct(start: Point, goal: Point, method: &str) -> Self {
        Self {
            points: vec![start, goal],
            length: distance(start, goal),
            method: method.to_string(),
        }
    }

    pub fn invalid(reason: &str) -> Self {
        Self {
            points: Vec::new(),
            length: f64::INFINITY,
            method: format!("INVALID: {reason}"),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.points.is_empty() && self.length.is_finite()
    }
}

/// Total order over f64 path costs for the Dijkstra heap.
#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Plan a path from `start` to `goal` that never enters any polygon
/// interior. Polygons must be convex and CCW (the wrapper guarantees both).
pub fn plan_path(start: Point, goal: Point, polygons: &[Polygon]) -> PathPlan {
    if polygons.is_empty() {
        return PathPlan::direct(start, goal, "direct (no obstacles)");
    }

    for (i, poly) in polygons.iter().enumerate() {
        if point_in_polygon(start, poly) && !is_polygon_vertex(start, poly) {
            return PathPlan::invalid(&format!("start inside polygon {i}"));
        }
        if point_in_polygon(goal, poly) && !is_polygon_vertex(goal, poly) {
            return PathPlan::invalid(&format!("goal inside polygon {i}"));
        }
    }

    if segment_clear_of_all(start, goal, polygons) {
        return PathPlan::direct(start, goal, "direct");
    }

    let plan = if polygons.len() == 1 {
        navigate_single_polygon(start, goal, &polygons[0])
    } else {
        navigate_visibility_graph(start, goal, polygons)
    };

    if plan.is_valid() && !validate_path(&plan.points, polygons) {
        return PathPlan::invalid("path crosses polygon");
    }
    plan
}

/// Validate that no segment of the path enters any polygon interior. Each
/// segment is sampled at `SEGMENT_SAMPLES` interior parameters; boundary
/// contact is allowed.
pub fn validate_path(path: &[Point], polygons: &[Polygon]) -> bool {
    path.windows(2).all(|w| {
        polygons
            .iter()
            .all(|poly| !segment_enters_polygon(w[0], w[1], poly))
    })
}

fn is_polygon_vertex(p: Point, polygon: &[Point]) -> bool {
    polygon
        .iter()
        .any(|v| (p.0 - v.0).abs() < EPS_COINCIDE && (p.1 - v.1).abs() < EPS_COINCIDE)
}

/// Check if segment `a`-`b` crosses through the interior of a polygon.
/// Touching the boundary at a shared vertex is not a crossing, so tangent
/// lines to polygon vertices pass this check.
fn segment_crosses_polygon(a: Point, b: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let a_is_vertex = is_polygon_vertex(a, polygon);
    let b_is_vertex = is_polygon_vertex(b, polygon);

    if !a_is_vertex && point_in_polygon(a, polygon) {
        return true;
    }
    if !b_is_vertex && point_in_polygon(b, polygon) {
        return true;
    }

    for i in 0..n {
        let p1 = polygon[i];
        let p2 = polygon[(i + 1) % n];

        // Skip edges that share a vertex with the segment endpoints.
        let endpoint_on_edge = |p: Point| {
            (p.0 - p1.0).abs() < EPS_COINCIDE && (p.1 - p1.1).abs() < EPS_COINCIDE
                || (p.0 - p2.0).abs() < EPS_COINCIDE && (p.1 - p2.1).abs() < EPS_COINCIDE
        };
        if a_is_vertex && endpoint_on_edge(a) {
            continue;
        }
        if b_is_vertex && endpoint_on_edge(b) {
            continue;
        }

        if segments_intersect(a, b, p1, p2) {
            return true;
        }
    }

    // Interior samples catch segments that clip a corner without a proper
    // edge intersection.
    for i in 1..SEGMENT_SAMPLES {
        let t = i as f64 / SEGMENT_SAMPLES as f64;
        let p = (a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1));
        if point_in_polygon(p, polygon) {
            return true;
        }
    }

    false
}

fn segment_clear_of_all(a: Point, b: Point, polygons: &[Polygon]) -> bool {
    polygons.iter().all(|poly| !segment_crosses_polygon(a, b, poly))
}

// ---------- single polygon: tangent-arc-tangent ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkDirection {
    Cw,
    Ccw,
}

impl WalkDirection {
    fn step(self, idx: usize, n: usize) -> usize {
        match self {
            // Polygon vertices are CCW, so CW walks decrement.
            Self::Cw => (idx + n - 1) % n,
            Self::Ccw => (idx + 1) % n,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Cw => "cw",
            Self::Ccw => "ccw",
        }
    }
}

/// The line from an external point to a polygon vertex is clear when it
/// crosses no polygon edge other than the two meeting at that vertex.
fn line_of_sight_clear(point: Point, polygon: &[Point], target_idx: usize) -> bool {
    let n = polygon.len();
    let target = polygon[target_idx];

    for i in 0..n {
        if i == target_idx || (i + 1) % n == target_idx {
            continue;
        }
        if segments_intersect(point, target, polygon[i], polygon[(i + 1) % n]) {
            return false;
        }
    }

    let mid = ((point.0 + target.0) / 2.0, (point.1 + target.1) / 2.0);
    !point_in_polygon(mid, polygon)
}

/// Find the two silhouette (tangent) vertices of a convex polygon as seen
/// from an external point.
///
/// A vertex is a left tangent when the point lies left of the incoming edge
/// and right of the outgoing edge; a right tangent is the mirror case.
/// Near-collinear configurations yield weak candidates; if both tangents
/// degenerate onto the same vertex, an angular sweep picks the two vertices
/// bordering the widest angular gap instead. Finally both tangents are
/// verified for line of sight and walked along the boundary to the first
/// visible vertex if blocked.
fn find_tangent_vertices(point: Point, polygon: &[Point]) -> (usize, usize) {
    let n = polygon.len();
    if n < 3 {
        return (0, 0);
    }

    let mut left_candidates: Vec<(usize, f64)> = Vec::new();
    let mut right_candidates: Vec<(usize, f64)> = Vec::new();

    for i in 0..n {
        let v_prev = polygon[(i + n - 1) % n];
        let v_curr = polygon[i];
        let v_next = polygon[(i + 1) % n];

        let cross_prev = cross(v_prev, v_curr, point);
        let cross_next = cross(v_curr, v_next, point);

        if cross_prev > 0.0 && cross_next < 0.0 {
            left_candidates.push((i, cross_prev - cross_next));
        } else if cross_prev >= 0.0 && cross_next <= 0.0 {
            left_candidates.push((i, 0.1));
        }

        if cross_prev < 0.0 && cross_next > 0.0 {
            right_candidates.push((i, cross_next - cross_prev));
        } else if cross_prev <= 0.0 && cross_next >= 0.0 {
            right_candidates.push((i, 0.1));
        }
    }

    let strongest = |candidates: &[(usize, f64)]| -> Option<usize> {
        candidates
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(i, _)| *i)
    };

    let mut left_idx = strongest(&left_candidates).unwrap_or(0);
    let mut right_idx = strongest(&right_candidates).unwrap_or(n / 2);

    // Degenerate (near-collinear) case: both tangents landed on the same
    // vertex. Use an angular sweep and take the two vertices bordering the
    // largest angular gap seen from the point.
    if left_idx == right_idx {
        let mut angles: Vec<(f64, usize)> = polygon
            .iter()
            .enumerate()
            .map(|(i, v)| ((v.1 - point.1).atan2(v.0 - point.0), i))
            .collect();
        angles.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut max_gap = -1.0;
        let mut gap_start = 0;
        for i in 0..n {
            let curr = angles[i].0;
            let next = angles[(i + 1) % n].0;
            let mut gap = next - curr;
            if gap < 0.0 {
                gap += 2.0 * std::f64::consts::PI;
            }
            if gap > max_gap {
                max_gap = gap;
                gap_start = i;
            }
        }
        right_idx = angles[gap_start].1;
        left_idx = angles[(gap_start + 1) % n].1;
    }

    // Verify visibility; walk along the boundary to the first visible vertex
    // when the candidate tangent line is blocked.
    if !line_of_sight_clear(point, polygon, left_idx) {
        for step in 1..n {
            let candidate = (left_idx + n - step) % n;
            if line_of_sight_clear(point, polygon, candidate) {
                left_idx = candidate;
                break;
            }
        }
    }
    if !line_of_sight_clear(point, polygon, right_idx) {
        for step in 1..n {
            let candidate = (right_idx + step) % n;
            if line_of_sight_clear(point, polygon, candidate) {
                right_idx = candidate;
                break;
            }
        }
    }

    (left_idx, right_idx)
}

/// Walk the boundary from `start_idx` in `direction` until the first vertex
/// that sees the goal. Returns the arc walked (inclusive), or `None` when no
/// vertex on the whole boundary sees the goal.
fn find_first_visible_exit(
    polygon: &[Point],
    start_idx: usize,
    direction: WalkDirection,
    goal: Point,
) -> Option<(usize, Vec<Point>)> {
    let n = polygon.len();
    let mut arc = vec![polygon[start_idx]];
    let mut idx = start_idx;

    for _ in 0..n {
        if !segment_crosses_polygon(polygon[idx], goal, polygon) {
            return Some((idx, arc));
        }
        idx = direction.step(idx, n);
        arc.push(polygon[idx]);
    }
    None
}

/// Entering the boundary must not reverse direction: the angle between the
/// approach segment and the first boundary step must stay within 90 degrees.
fn entry_continues_forward(start: Point, first: Point, second: Point) -> bool {
    let arrival = (first.0 - start.0, first.1 - start.1);
    let boundary = (second.0 - first.0, second.1 - first.1);
    dot(arrival, boundary) >= 0.0
}

/// Leaving the boundary must not reverse direction either.
fn exit_continues_forward(prev: Point, exit: Point, goal: Point) -> bool {
    let arrival = (exit.0 - prev.0, exit.1 - prev.1);
    let depart = (goal.0 - exit.0, goal.1 - exit.1);
    dot(arrival, depart) >= 0.0
}

/// The first tangent leg must not fly away from the goal.
fn tangent_toward_goal(start: Point, tangent: Point, goal: Point) -> bool {
    let to_tangent = (tangent.0 - start.0, tangent.1 - start.1);
    let to_goal = (goal.0 - start.0, goal.1 - start.1);
    dot(to_tangent, to_goal) > 0.0
}

fn navigate_single_polygon(start: Point, goal: Point, polygon: &[Point]) -> PathPlan {
    let n = polygon.len();
    if n < 3 {
        return PathPlan::direct(start, goal, "direct (degenerate polygon)");
    }

    let (left_idx, right_idx) = find_tangent_vertices(start, polygon);
    let only_polygon = [polygon.to_vec()];

    let mut best: Option<PathPlan> = None;
    let consider = |candidate: PathPlan, best: &mut Option<PathPlan>| {
        // Strictly-shorter replacement keeps equal-length ties on the
        // earliest candidate, making the choice deterministic.
        if best.as_ref().is_none_or(|b| candidate.length < b.length) {
            *best = Some(candidate);
        }
    };

    for strict in [true, false] {
        for (tangent_idx, tangent_name) in [(left_idx, "left"), (right_idx, "right")] {
            if strict && !tangent_toward_goal(start, polygon[tangent_idx], goal) {
                continue;
            }

            for direction in [WalkDirection::Cw, WalkDirection::Ccw] {
                let Some((exit_idx, arc)) =
                    find_first_visible_exit(polygon, tangent_idx, direction, goal)
                else {
                    continue;
                };

                if strict && arc.len() >= 2 {
                    if !entry_continues_forward(start, arc[0], arc[1]) {
                        continue;
                    }
                    if !exit_continues_forward(arc[arc.len() - 2], arc[arc.len() - 1], goal) {
                        continue;
                    }
                }

                let mut points = Vec::with_capacity(arc.len() + 2);
                points.push(start);
                points.extend(arc);
                points.push(goal);

                if !validate_path(&points, &only_polygon) {
                    continue;
                }

                let length = polyline_length(&points);
                let method = format!(
                    "{}{} via {tangent_name} tangent, exit at idx {exit_idx}",
                    if strict { "" } else { "fallback " },
                    direction.tag()
                );
                consider(
                    PathPlan {
                        points,
                        length,
                        method,
                    },
                    &mut best,
                );
            }
        }

        // The relaxed sweep only runs when the strict direction checks
        // rejected everything.
        if best.is_some() {
            break;
        }
    }

    best.unwrap_or_else(|| PathPlan::invalid("no valid path around polygon"))
}

// ---------- multiple polygons: visibility graph ----------

/// Node positions are deduplicated on a 1e-6 grid so boundary vertices
/// shared between the endpoints and a polygon collapse into one node.
fn node_key(p: Point) -> (i64, i64) {
    ((p.0 * 1e6).round() as i64, (p.1 * 1e6).round() as i64)
}

fn navigate_visibility_graph(start: Point, goal: Point, polygons: &[Polygon]) -> PathPlan {
    // Collect nodes: start, goal, every polygon vertex.
    let mut nodes: Vec<Point> = Vec::new();
    let mut index_of = std::collections::HashMap::new();
    let mut push_node = |p: Point, nodes: &mut Vec<Point>| -> usize {
        let key = node_key(p);
        if let Some(&idx) = index_of.get(&key) {
            return idx;
        }
        let idx = nodes.len();
        nodes.push(p);
        index_of.insert(key, idx);
        idx
    };

    let start_idx = push_node(start, &mut nodes);
    let goal_idx = push_node(goal, &mut nodes);
    let mut polygon_vertex_indices: Vec<Vec<usize>> = Vec::with_capacity(polygons.len());
    for poly in polygons {
        polygon_vertex_indices.push(poly.iter().map(|&v| push_node(v, &mut nodes)).collect());
    }

    let n = nodes.len();
    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let add_edge = |adjacency: &mut Vec<Vec<(usize, f64)>>, u: usize, v: usize| {
        let d = distance(nodes[u], nodes[v]);
        if !adjacency[u].iter().any(|&(w, _)| w == v) {
            adjacency[u].push((v, d));
            adjacency[v].push((u, d));
        }
    };

    // Line-of-sight edges between every node pair.
    for i in 0..n {
        for j in (i + 1)..n {
            if segment_clear_of_all(nodes[i], nodes[j], polygons) {
                add_edge(&mut adjacency, i, j);
            }
        }
    }

    // Polygon boundary edges are always traversable.
    for vertex_indices in &polygon_vertex_indices {
        let m = vertex_indices.len();
        for i in 0..m {
            add_edge(&mut adjacency, vertex_indices[i], vertex_indices[(i + 1) % m]);
        }
    }

    // Dijkstra from start to goal.
    let mut dist = vec![f64::INFINITY; n];
    let mut prev: Vec<Option<usize>> = vec![None; n];
    let mut heap: BinaryHeap<Reverse<(FloatOrd, usize)>> = BinaryHeap::new();
    dist[start_idx] = 0.0;
    heap.push(Reverse((FloatOrd(0.0), start_idx)));

    while let Some(Reverse((FloatOrd(d), u))) = heap.pop() {
        if d > dist[u] {
            continue;
        }
        if u == goal_idx {
            break;
        }
        for &(v, w) in &adjacency[u] {
            let candidate = d + w;
            if candidate < dist[v] {
                dist[v] = candidate;
                prev[v] = Some(u);
                heap.push(Reverse((FloatOrd(candidate), v)));
            }
        }
    }

    if !dist[goal_idx].is_finite() {
        return PathPlan::invalid("no path in visibility graph");
    }

    let mut path_indices = vec![goal_idx];
    let mut current = goal_idx;
    while let Some(p) = prev[current] {
        path_indices.push(p);
        current = p;
    }
    path_indices.reverse();

    let points: Vec<Point> = path_indices.into_iter().map(|i| nodes[i]).collect();
    let length = dist[goal_idx];
    PathPlan {
        method: format!("visibility-graph ({} waypoints)", points.len()),
        points,
        length,
    }
}
