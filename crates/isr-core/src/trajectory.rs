//! Trajectory materialization.
//!
//! Expands a symbolic route into the actual obstacle-avoiding polyline by
//! stitching per-edge oracle paths, preferring the polylines the distance
//! matrix already stored. A failed edge is a solver bug (the matrix claimed
//! finite cost, the oracle now disagrees): the trajectory is truncated at
//! that edge and flagged, never silently bridged with a straight line.

use crate::geometry::{Point, EPS_COINCIDE};
use crate::matrix::DistanceMatrix;
use crate::navigation::plan_path;
use tracing::error;

/// A materialized trajectory. `error` is set when some edge failed; the
/// polyline then stops at the last good waypoint.
#[derive(Debug, Clone)]
pub struct MaterializedTrajectory {
    pub points: Vec<Point>,
    pub error: Option<String>,
}

impl MaterializedTrajectory {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Materialize `route` into a polyline. Consecutive duplicate points at
/// edge joins are dropped; every route waypoint remains a vertex.
pub fn materialize_trajectory(route: &[String], matrix: &DistanceMatrix) -> MaterializedTrajectory {
    if route.len() < 2 {
        let points = route
            .first()
            .and_then(|id| matrix.position_of(id))
            .map(|p| vec![p])
            .unwrap_or_default();
        return MaterializedTrajectory {
            points,
            error: None,
        };
    }

    let mut full_path: Vec<Point> = Vec::new();

    for pair in route.windows(2) {
        let (from_id, to_id) = (&pair[0], &pair[1]);
        let (Some(start), Some(end)) = (matrix.position_of(from_id), matrix.position_of(to_id))
        else {
            error!(from = %from_id, to = %to_id, "route references unknown waypoint");
            return MaterializedTrajectory {
                points: full_path,
                error: Some(format!("unknown waypoint in edge {from_id}->{to_id}")),
            };
        };

        // The matrix stores the polyline only for non-direct pairs; every
        // other edge is re-asked of the oracle (which also covers matrices
        // built with Euclidean distances).
        let segment: Vec<Point> = match matrix.path_between(from_id, to_id) {
            Some(stored) => stored.to_vec(),
            None => {
                let plan = plan_path(start, end, &matrix.polygons);
                if !plan.is_valid() {
                    error!(
                        from = %from_id,
                        to = %to_id,
                        method = %plan.method,
                        "oracle disagrees with distance matrix; truncating trajectory"
                    );
                    return MaterializedTrajectory {
                        points: full_path,
                        error: Some(format!("no valid path for edge {from_id}->{to_id}")),
                    };
                }
                plan.points
            }
        };

        if full_path.is_empty() {
            full_path.extend(segment);
        } else {
            // Drop the shared endpoint at the join.
            full_path.extend(segment.into_iter().skip(1));
        }
    }

    // Degenerate edges (e.g. a trivial A1 -> A1 route) can still leave
    // coincident neighbors behind.
    full_path.dedup_by(|a, b| (a.0 - b.0).abs() < EPS_COINCIDE && (a.1 - b.1).abs() < EPS_COINCIDE);

    MaterializedTrajectory {
        points: full_path,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{point_in_polygon, point_on_polygon_boundary};
    use crate::models::{Airport, Environment, Sam, Target, TargetType};

    fn env(sams: Vec<Sam>) -> Environment {
        Environment {
            airports: vec![Airport {
                id: "A1".into(),
                x: 10.0,
                y: 10.0,
            }],
            targets: vec![Target {
                id: "T1".into(),
                x: 50.0,
                y: 50.0,
                priority: 5,
                target_type: TargetType::A,
            }],
            sams,
            ..Default::default()
        }
    }

    #[test]
    fn test_straight_route_concatenates() {
        let matrix = DistanceMatrix::build(&env(vec![]), 0.0);
        let route = vec!["A1".to_string(), "T1".to_string(), "A1".to_string()];
        let traj = materialize_trajectory(&route, &matrix);
        assert!(traj.is_complete());
        assert_eq!(traj.points, vec![(10.0, 10.0), (50.0, 50.0), (10.0, 10.0)]);
    }

    #[test]
    fn test_route_waypoints_appear_in_order() {
        let matrix = DistanceMatrix::build(
            &env(vec![Sam {
                x: 30.0,
                y: 30.0,
                range: 12.0,
            }]),
            0.0,
        );
        let route = vec!["A1".to_string(), "T1".to_string(), "A1".to_string()];
        let traj = materialize_trajectory(&route, &matrix);
        assert!(traj.is_complete());
        // Detour inserted vertices between the waypoints.
        assert!(traj.points.len() > 3);
        // Waypoint coordinates appear as vertices, in route order.
        let a1 = traj.points.iter().position(|&p| p == (10.0, 10.0)).unwrap();
        let t1 = traj.points.iter().position(|&p| p == (50.0, 50.0)).unwrap();
        assert!(a1 < t1);
        assert_eq!(*traj.points.last().unwrap(), (10.0, 10.0));
    }

    #[test]
    fn test_no_duplicate_join_points() {
        let matrix = DistanceMatrix::build(&env(vec![]), 0.0);
        let route = vec!["A1".to_string(), "T1".to_string(), "A1".to_string()];
        let traj = materialize_trajectory(&route, &matrix);
        for w in traj.points.windows(2) {
            assert_ne!(w[0], w[1], "consecutive duplicate at a join");
        }
    }

    #[test]
    fn test_trajectory_avoids_polygon_interior() {
        let matrix = DistanceMatrix::build(
            &env(vec![Sam {
                x: 30.0,
                y: 30.0,
                range: 12.0,
            }]),
            0.0,
        );
        let route = vec!["A1".to_string(), "T1".to_string()];
        let traj = materialize_trajectory(&route, &matrix);
        for w in traj.points.windows(2) {
            for step in 0..=20 {
                let t = step as f64 / 20.0;
                let p = (
                    w[0].0 + t * (w[1].0 - w[0].0),
                    w[0].1 + t * (w[1].1 - w[0].1),
                );
                for poly in &matrix.polygons {
                    assert!(
                        !point_in_polygon(p, poly) || point_on_polygon_boundary(p, poly),
                        "trajectory sample {p:?} inside obstacle"
                    );
                }
            }
        }
    }

    #[test]
    fn test_unknown_waypoint_flags_error() {
        let matrix = DistanceMatrix::build(&env(vec![]), 0.0);
        let route = vec!["A1".to_string(), "T9".to_string()];
        let traj = materialize_trajectory(&route, &matrix);
        assert!(!traj.is_complete());
        assert!(traj.points.is_empty());
    }
}
