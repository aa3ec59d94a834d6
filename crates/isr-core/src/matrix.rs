//! SAM-aware distance matrix.
//!
//! All pairwise waypoint distances are computed once through the path
//! oracle and cached per environment fingerprint. Non-direct polylines are
//! stored alongside the scalar table so trajectory materialization never
//! replans an edge the matrix already solved. Targets that sit inside an
//! obstacle polygon, or that no real airport can reach, are excluded: their
//! distances stay infinite and the solver never selects them.

use crate::geometry::{point_in_polygon, Point, Polygon};
use crate::models::{Environment, MatrixSummary};
use crate::navigation::plan_path;
use crate::wrapping::wrap_sams_with_buffer;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// All-pairs SAM-aware distances for one environment.
///
/// The wrapped polygons live here and are borrowed (via the `Arc` handed out
/// by the cache) by the oracle's consumers; nothing mutates them after
/// construction.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    pub labels: Vec<String>,
    pub dist: Vec<Vec<f64>>,
    /// Polylines for label pairs whose shortest path is not the direct
    /// segment, keyed by (from, to) indices.
    paths: HashMap<(usize, usize), Vec<Point>>,
    pub excluded_targets: Vec<String>,
    pub polygons: Vec<Polygon>,
    index: HashMap<String, usize>,
    positions: Vec<Point>,
}

impl DistanceMatrix {
    /// Build the matrix for an environment. `buffer` inflates every SAM
    /// radius before wrapping; it is the only safety margin applied.
    pub fn build(env: &Environment, buffer: f64) -> Self {
        Self::build_inner(env, buffer, true)
    }

    /// Build with plain Euclidean distances. Obstacle polygons are still
    /// wrapped (exclusion and trajectory planning need them) but no
    /// avoidance detours enter the scalar table.
    pub fn build_euclidean(env: &Environment, buffer: f64) -> Self {
        Self::build_inner(env, buffer, false)
    }

    fn build_inner(env: &Environment, buffer: f64, sam_aware: bool) -> Self {
        let polygons = wrap_sams_with_buffer(&env.sams, buffer);

        // Label order: airports, then checkpoint/synthetic anchors, then
        // targets, each in input order. Deterministic for identical input.
        let mut labels: Vec<String> = Vec::new();
        let mut positions: Vec<Point> = Vec::new();
        for a in &env.airports {
            labels.push(a.id.clone());
            positions.push((a.x, a.y));
        }
        for c in &env.checkpoints {
            labels.push(c.id.clone());
            positions.push((c.x, c.y));
        }
        for (id, s) in &env.synthetic_starts {
            labels.push(id.clone());
            positions.push((s.x, s.y));
        }
        for t in &env.targets {
            labels.push(t.id.clone());
            positions.push((t.x, t.y));
        }

        let n = labels.len();
        let index: HashMap<String, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect();

        let mut dist = vec![vec![0.0_f64; n]; n];
        let mut paths: HashMap<(usize, usize), Vec<Point>> = HashMap::new();

        // The oracle is symmetric, so each unordered pair is solved once and
        // mirrored.
        for i in 0..n {
            for j in (i + 1)..n {
                if !sam_aware {
                    let d = crate::geometry::distance(positions[i], positions[j]);
                    dist[i][j] = d;
                    dist[j][i] = d;
                    continue;
                }
                let plan = plan_path(positions[i], positions[j], &polygons);
                if plan.is_valid() {
                    dist[i][j] = plan.length;
                    dist[j][i] = plan.length;
                    if plan.points.len() > 2 {
                        let mut reversed = plan.points.clone();
                        reversed.reverse();
                        paths.insert((i, j), plan.points);
                        paths.insert((j, i), reversed);
                    }
                } else {
                    dist[i][j] = f64::INFINITY;
                    dist[j][i] = f64::INFINITY;
                }
            }
        }

        // Exclude targets inside an obstacle or unreachable from every real
        // airport.
        let airport_indices: Vec<usize> = env
            .airports
            .iter()
            .filter_map(|a| index.get(&a.id).copied())
            .collect();
        let mut excluded_targets = Vec::new();
        for t in &env.targets {
            let ti = index[&t.id];
            let inside = polygons.iter().any(|poly| point_in_polygon((t.x, t.y), poly));
            let unreachable = !airport_indices.iter().any(|&ai| dist[ai][ti].is_finite());
            if inside || unreachable {
                warn!(
                    target_id = %t.id,
                    inside_obstacle = inside,
                    "target excluded from planning"
                );
                excluded_targets.push(t.id.clone());
                for k in 0..n {
                    if k != ti {
                        dist[ti][k] = f64::INFINITY;
                        dist[k][ti] = f64::INFINITY;
                    }
                }
            }
        }

        Self {
            labels,
            dist,
            paths,
            excluded_targets,
            polygons,
            index,
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn position_of(&self, label: &str) -> Option<Point> {
        self.index_of(label).map(|i| self.positions[i])
    }

    /// Distance between two labels; `None` when either label is unknown.
    pub fn distance_between(&self, from: &str, to: &str) -> Option<f64> {
        let i = self.index_of(from)?;
        let j = self.index_of(to)?;
        Some(self.dist[i][j])
    }

    /// The stored avoidance polyline for a pair, when the shortest path is
    /// not the direct segment.
    pub fn path_between(&self, from: &str, to: &str) -> Option<&[Point]> {
        let i = self.index_of(from)?;
        let j = self.index_of(to)?;
        self.paths.get(&(i, j)).map(Vec::as_slice)
    }

    pub fn is_excluded(&self, target_id: &str) -> bool {
        self.excluded_targets.iter().any(|t| t == target_id)
    }

    pub fn summary(&self) -> MatrixSummary {
        MatrixSummary {
            num_waypoints: self.labels.len(),
            num_avoidance_paths: self.paths.keys().filter(|(i, j)| i < j).count(),
            excluded_targets: self.excluded_targets.clone(),
        }
    }
}

/// Fingerprint of everything the matrix depends on. Canonical JSON of the
/// environment covers airports, targets, SAMs, checkpoints, and synthetic
/// starts; the buffer participates because it changes the wrapped geometry.
fn fingerprint(env: &Environment, buffer: f64) -> u64 {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(env)
        .unwrap_or_default()
        .hash(&mut hasher);
    buffer.to_bits().hash(&mut hasher);
    hasher.finish()
}

struct CacheEntry {
    fingerprint: u64,
    matrix: Arc<DistanceMatrix>,
}

/// Process-wide single-slot matrix cache. Writers serialize on the mutex;
/// readers share the entry through the returned `Arc`.
static MATRIX_CACHE: Mutex<Option<CacheEntry>> = Mutex::new(None);

/// Fetch the cached matrix for this environment, building and caching it on
/// a fingerprint miss.
pub fn cached_matrix(env: &Environment, buffer: f64) -> Arc<DistanceMatrix> {
    let fp = fingerprint(env, buffer);
    let mut slot = MATRIX_CACHE.lock().expect("matrix cache poisoned");
    if let Some(entry) = slot.as_ref() {
        if entry.fingerprint == fp {
            return Arc::clone(&entry.matrix);
        }
    }
    let matrix = Arc::new(DistanceMatrix::build(env, buffer));
    *slot = Some(CacheEntry {
        fingerprint: fp,
        matrix: Arc::clone(&matrix),
    });
    matrix
}

/// Drop the cached matrix. Collaborators call this when the environment is
/// edited; the core does not auto-invalidate.
pub fn clear_matrix_cache() {
    let mut slot = MATRIX_CACHE.lock().expect("matrix cache poisoned");
    *slot = None;
}

/// Summary of the currently cached matrix, if any.
pub fn matrix_cache_status() -> Option<MatrixSummary> {
    let slot = MATRIX_CACHE.lock().expect("matrix cache poisoned");
    slot.as_ref().map(|entry| entry.matrix.summary())
}
