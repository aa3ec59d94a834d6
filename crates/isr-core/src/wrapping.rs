//! SAM wrapping: union of overlapping exclusion disks into convex polygons.
//!
//! Overlapping SAMs are clustered with union-find, each cluster's disks are
//! sampled along their circumferences, and the pooled samples are hulled
//! with the monotone chain. The resulting polygons are the single source of
//! truth for obstacle geometry; no downstream check looks at the circles
//! again.

use crate::geometry::{cross, distance, Point, Polygon, SAM_SAMPLE_STEP_MIN};
use crate::models::Sam;

/// Smallest number of circumference samples per disk.
const MIN_CIRCLE_SAMPLES: usize = 8;
/// Sampling step angle clamp, radians.
const MIN_STEP_ANGLE: f64 = 5.0 * std::f64::consts::PI / 180.0;
const MAX_STEP_ANGLE: f64 = 30.0 * std::f64::consts::PI / 180.0;

/// Wrap SAM disks into disjoint convex obstacle polygons, one per connected
/// cluster of pairwise-overlapping disks. Output vertices are CCW.
pub fn wrap_sams(sams: &[Sam]) -> Vec<Polygon> {
    wrap_sams_with_buffer(sams, 0.0)
}

/// Same as [`wrap_sams`], with every disk radius inflated by `buffer` first.
/// The buffer is the only safety margin applied anywhere; the path oracle
/// adds none of its own.
pub fn wrap_sams_with_buffer(sams: &[Sam], buffer: f64) -> Vec<Polygon> {
    if sams.is_empty() {
        return Vec::new();
    }

    let mut polygons = Vec::new();
    for cluster in cluster_overlapping(sams) {
        let mut samples: Vec<Point> = Vec::new();
        for &idx in &cluster {
            let sam = &sams[idx];
            samples.extend(sample_circle(
                sam.center(),
                sam.range + buffer,
                SAM_SAMPLE_STEP_MIN,
            ));
        }
        if samples.is_empty() {
            continue;
        }

        let hull = convex_hull(&mut samples);
        let hull = enforce_min_edge_length(hull, SAM_SAMPLE_STEP_MIN);
        if hull.len() >= 3 {
            polygons.push(hull);
        }
    }
    polygons
}

/// Group SAM indices into clusters of transitively overlapping disks.
/// Overlap means the centers are no farther apart than the radius sum.
fn cluster_overlapping(sams: &[Sam]) -> Vec<Vec<usize>> {
    let n = sams.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        let next = parent[x];
        if next == x {
            return x;
        }
        let root = find(parent, next);
        parent[x] = root;
        root
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let overlap =
                distance(sams[i].center(), sams[j].center()) <= sams[i].range + sams[j].range;
            if overlap {
                let pi = find(&mut parent, i);
                let pj = find(&mut parent, j);
                if pi != pj {
                    parent[pi] = pj;
                }
            }
        }
    }

    // Group by root, preserving input order within and across clusters.
    let mut clusters: Vec<(usize, Vec<usize>)> = Vec::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        match clusters.iter_mut().find(|(r, _)| *r == root) {
            Some((_, members)) => members.push(i),
            None => clusters.push((root, vec![i])),
        }
    }
    clusters.into_iter().map(|(_, members)| members).collect()
}

/// Sample points around a circle so adjacent chords are roughly `min_seg`
/// long. The step angle is clamped to [5 deg, 30 deg] and every circle gets
/// at least [`MIN_CIRCLE_SAMPLES`] points.
fn sample_circle(center: Point, radius: f64, min_seg: f64) -> Vec<Point> {
    if radius <= 0.0 {
        return vec![center];
    }

    let dtheta = (min_seg / radius.max(1e-3)).clamp(MIN_STEP_ANGLE, MAX_STEP_ANGLE);
    let n_steps = ((2.0 * std::f64::consts::PI / dtheta).ceil() as usize).max(MIN_CIRCLE_SAMPLES);
    let theta_step = 2.0 * std::f64::consts::PI / n_steps as f64;

    (0..n_steps)
        .map(|i| {
            let theta = i as f64 * theta_step;
            (
                center.0 + radius * theta.cos(),
                center.1 + radius * theta.sin(),
            )
        })
        .collect()
}

/// Monotone chain convex hull. Returns vertices in CCW order without
/// repeating the first point.
fn convex_hull(points: &mut Vec<Point>) -> Polygon {
    points.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    points.dedup();
    if points.len() <= 2 {
        return points.clone();
    }

    let mut lower: Vec<Point> = Vec::new();
    for &p in points.iter() {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<Point> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    // Last point of each chain is the first point of the other.
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Merge consecutive hull vertices closer than `min_seg`, iterating to a
/// fixed point while the polygon keeps at least 3 vertices. Falls back to
/// the input polygon if merging would collapse it.
fn enforce_min_edge_length(poly: Polygon, min_seg: f64) -> Polygon {
    if poly.len() <= 2 {
        return poly;
    }

    let mut pts = poly.clone();
    let max_iterations = poly.len() + 5;
    for _ in 0..max_iterations {
        let mut changed = false;
        let mut merged: Vec<Point> = Vec::with_capacity(pts.len());
        let n = pts.len();
        let mut i = 0;
        while i < n {
            let a = pts[i];
            let b = pts[(i + 1) % n];
            if distance(a, b) < min_seg {
                merged.push(((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0));
                i += 2;
                changed = true;
            } else {
                merged.push(a);
                i += 1;
            }
        }

        if merged.len() < 3 {
            return poly;
        }
        pts = merged;
        if !changed {
            break;
        }
    }
    pts
}
