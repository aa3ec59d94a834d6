//! Planner facade: the operation surface collaborators consume.
//!
//! `solve` runs the whole pipeline: geometry wrap -> distance matrix ->
//! allocation -> per-drone orienteering -> trajectory materialization ->
//! post-optimization. The companion operations (`prepare_matrix`,
//! `matrix_status`, `clear_matrix`, `apply_sequence`, `coverage_stats`) are
//! thin, synchronous entry points over the same machinery.

use crate::allocator::allocate_targets;
use crate::error::{PlanError, PlanResult};
use crate::geometry::{polyline_length, EPS_BUDGET};
use crate::matrix::{
    cached_matrix, clear_matrix_cache, matrix_cache_status, DistanceMatrix,
};
use crate::models::{
    drone_order_key, AllocationStrategy, CoverageStats, DroneConfig, DroneRoute, Environment,
    MatrixSummary, SequenceReport, Solution, SolveOptions,
};
use crate::orienteering::{solve_orienteering, RouteSolution};
use crate::postopt::post_optimize;
use crate::trajectory::materialize_trajectory;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The orienteering DP is exponential in the target count; allocations are
/// truncated to this many highest-priority targets per drone.
const MAX_TARGETS_PER_DRONE: usize = 12;

/// Resolved per-drone contract: where the drone starts, and which end
/// anchors the solver may choose from.
#[derive(Debug, Clone)]
struct DroneContract {
    start_id: String,
    end_candidates: Vec<String>,
}

fn derive_contract(
    drone_id: &str,
    cfg: &DroneConfig,
    env: &Environment,
) -> PlanResult<DroneContract> {
    let start_known =
        env.airport(&cfg.start_id).is_some() || env.synthetic_anchor(&cfg.start_id).is_some();
    if !start_known {
        return Err(PlanError::InfeasibleContract {
            drone_id: drone_id.to_string(),
            reason: format!("unknown start anchor {}", cfg.start_id),
        });
    }

    let end_candidates: Vec<String> = if cfg.end_is_any() {
        env.airports.iter().map(|a| a.id.clone()).collect()
    } else if env.airport(&cfg.end_id).is_some() {
        vec![cfg.end_id.clone()]
    } else {
        return Err(PlanError::InfeasibleContract {
            drone_id: drone_id.to_string(),
            reason: format!("unknown end airport {}", cfg.end_id),
        });
    };
    if end_candidates.is_empty() {
        return Err(PlanError::InfeasibleContract {
            drone_id: drone_id.to_string(),
            reason: "no candidate end airport".to_string(),
        });
    }

    Ok(DroneContract {
        start_id: cfg.start_id.clone(),
        end_candidates,
    })
}

/// Solve the multi-drone mission. Pure function of its inputs: identical
/// inputs yield identical solutions.
pub fn solve(
    env: &Environment,
    drone_configs: &BTreeMap<String, DroneConfig>,
    strategy: AllocationStrategy,
    options: &SolveOptions,
) -> PlanResult<Solution> {
    let validation = env.validate();
    if !validation.is_empty() {
        return Err(PlanError::InvalidEnvironment(validation.join("; ")));
    }

    // Checkpoint replans pass the already-visited targets; they drop out of
    // planning entirely.
    let filtered_env;
    let env = if options.visited_targets.is_empty() {
        env
    } else {
        filtered_env = Environment {
            targets: env
                .targets
                .iter()
                .filter(|t| !options.visited_targets.contains(&t.id))
                .cloned()
                .collect(),
            ..env.clone()
        };
        &filtered_env
    };

    // Resolve every contract before doing any work.
    let mut contracts: BTreeMap<String, DroneContract> = BTreeMap::new();
    for (drone_id, cfg) in drone_configs {
        if cfg.enabled {
            contracts.insert(drone_id.clone(), derive_contract(drone_id, cfg, env)?);
        }
    }

    let matrix: Arc<DistanceMatrix> = if options.use_sam_aware_distances {
        cached_matrix(env, 0.0)
    } else {
        Arc::new(DistanceMatrix::build_euclidean(env, 0.0))
    };

    let allocations = allocate_targets(env, &matrix, drone_configs, strategy);

    let mut drone_ids: Vec<String> = drone_configs.keys().cloned().collect();
    drone_ids.sort_by_key(|id| drone_order_key(id));

    let mut solution = Solution {
        wrapped_polygons: matrix.polygons.clone(),
        excluded_targets: matrix.excluded_targets.clone(),
        ..Default::default()
    };

    for drone_id in &drone_ids {
        let cfg = &drone_configs[drone_id];
        if !cfg.enabled {
            solution.routes.insert(
                drone_id.clone(),
                DroneRoute {
                    fuel_budget: cfg.fuel_budget,
                    ..Default::default()
                },
            );
            continue;
        }
        let contract = &contracts[drone_id];

        // Cap the DP input at the highest-priority targets.
        let mut assigned: Vec<String> = allocations.get(drone_id).cloned().unwrap_or_default();
        if assigned.len() > MAX_TARGETS_PER_DRONE {
            assigned.sort_by(|a, b| {
                let pa = env.target(a).map_or(0, |t| t.priority);
                let pb = env.target(b).map_or(0, |t| t.priority);
                pb.cmp(&pa).then_with(|| a.cmp(b))
            });
            debug!(
                drone_id = %drone_id,
                allocated = assigned.len(),
                kept = MAX_TARGETS_PER_DRONE,
                "truncating allocation for DP"
            );
            assigned.truncate(MAX_TARGETS_PER_DRONE);
        }

        // Free-end contracts solve once per candidate end airport; a
        // candidate replaces the incumbent only on strictly better prize,
        // or equal prize and strictly shorter length.
        let mut best: Option<RouteSolution> = None;
        for end_id in &contract.end_candidates {
            let sol = solve_orienteering(
                &matrix,
                env,
                &contract.start_id,
                end_id,
                &assigned,
                cfg.fuel_budget,
            );
            let better = match &best {
                None => true,
                Some(b) => sol.prize > b.prize || (sol.prize == b.prize && sol.length < b.length),
            };
            if better {
                best = Some(sol);
            }
        }
        let route_solution = best.expect("at least one end candidate");

        let traj = materialize_trajectory(&route_solution.route, &matrix);
        info!(
            drone_id = %drone_id,
            waypoints = route_solution.route.len(),
            prize = route_solution.prize,
            length = route_solution.length,
            "drone route solved"
        );

        solution.routes.insert(
            drone_id.clone(),
            DroneRoute {
                sequence: route_solution.route.join(","),
                route: route_solution.route,
                prize: route_solution.prize,
                length: route_solution.length,
                fuel_budget: cfg.fuel_budget,
                trajectory: traj.points,
                trajectory_error: traj.error,
            },
        );
    }

    if options.post_optimize {
        post_optimize(
            &mut solution,
            env,
            drone_configs,
            &matrix,
            options.swap_iterations_max,
        );
    }

    finalize_totals(&mut solution, env);
    Ok(solution)
}

/// Recompute allocations and fleet totals from the final routes, so the
/// reported view always matches what the drones actually fly.
fn finalize_totals(solution: &mut Solution, env: &Environment) {
    solution.allocations = solution
        .routes
        .iter()
        .map(|(drone_id, entry)| {
            let targets: Vec<String> = entry
                .route
                .iter()
                .filter(|id| env.target(id).is_some())
                .cloned()
                .collect();
            (drone_id.clone(), targets)
        })
        .collect();
    solution.total_prize = solution.routes.values().map(|r| r.prize).sum();
    solution.total_length = solution
        .routes
        .values()
        .map(|r| if r.length.is_finite() { r.length } else { 0.0 })
        .sum();
}

/// Pre-compute the SAM-aware distance matrix so later solves hit the cache.
/// `buffer` inflates SAM radii before wrapping.
pub fn prepare_matrix(env: &Environment, buffer: f64) -> PlanResult<MatrixSummary> {
    let validation = env.validate();
    if !validation.is_empty() {
        return Err(PlanError::InvalidEnvironment(validation.join("; ")));
    }
    Ok(cached_matrix(env, buffer).summary())
}

/// Summary of the cached matrix, if one is present.
pub fn matrix_status() -> Option<MatrixSummary> {
    matrix_cache_status()
}

/// Drop the cached matrix. Call after editing the environment.
pub fn clear_matrix() {
    clear_matrix_cache();
}

/// Validate a hand-edited comma-separated sequence for one drone and
/// materialize its trajectory.
pub fn apply_sequence(
    drone_id: &str,
    sequence: &str,
    env: &Environment,
    fuel_budget: f64,
) -> SequenceReport {
    let route: Vec<String> = sequence
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if route.is_empty() {
        return SequenceReport {
            ok: false,
            route,
            length: 0.0,
            prize: 0,
            trajectory: Vec::new(),
            error: Some("empty sequence".to_string()),
        };
    }

    let positions = env.waypoint_positions();
    for id in &route {
        if !positions.contains_key(id) {
            return SequenceReport {
                ok: false,
                route: route.clone(),
                length: 0.0,
                prize: 0,
                trajectory: Vec::new(),
                error: Some(format!("unknown waypoint: {id}")),
            };
        }
    }

    // A fresh matrix (not the shared cache) keeps sequence editing free of
    // cache side effects.
    let matrix = DistanceMatrix::build(env, 0.0);
    let traj = materialize_trajectory(&route, &matrix);
    if let Some(reason) = traj.error {
        return SequenceReport {
            ok: false,
            route,
            length: 0.0,
            prize: 0,
            trajectory: traj.points,
            error: Some(reason),
        };
    }

    let length = polyline_length(&traj.points);
    let prize = route
        .iter()
        .filter_map(|id| env.target(id))
        .map(|t| t.priority)
        .sum();

    debug!(drone_id = %drone_id, length, prize, "sequence applied");

    if length > fuel_budget + EPS_BUDGET {
        return SequenceReport {
            ok: false,
            route,
            length,
            prize,
            trajectory: traj.points,
            error: Some(format!(
                "sequence length {length:.1} exceeds fuel budget {fuel_budget:.1}"
            )),
        };
    }

    SequenceReport {
        ok: true,
        route,
        length,
        prize,
        trajectory: traj.points,
        error: None,
    }
}

/// Coverage metrics for a solution against its environment.
pub fn coverage_stats(solution: &Solution, env: &Environment) -> CoverageStats {
    let visited: Vec<&str> = solution
        .routes
        .values()
        .flat_map(|r| r.route.iter())
        .filter(|id| env.target(id).is_some())
        .map(String::as_str)
        .collect();

    let targets_total = env.targets.len();
    let targets_visited = visited.len();
    let prize_collected: u32 = solution.routes.values().map(|r| r.prize).sum();
    let prize_possible: u32 = env.targets.iter().map(|t| t.priority).sum();
    let total_length: f64 = solution
        .routes
        .values()
        .map(|r| if r.length.is_finite() { r.length } else { 0.0 })
        .sum();

    let mut unvisited: Vec<String> = env
        .targets
        .iter()
        .filter(|t| !visited.contains(&t.id.as_str()))
        .map(|t| t.id.clone())
        .collect();
    unvisited.sort();

    let percent = |part: f64, whole: f64| if whole > 0.0 { 100.0 * part / whole } else { 0.0 };

    CoverageStats {
        targets_visited,
        targets_total,
        coverage_percent: percent(targets_visited as f64, targets_total as f64),
        prize_collected,
        prize_possible,
        prize_percent: percent(f64::from(prize_collected), f64::from(prize_possible)),
        total_length,
        unvisited_targets: unvisited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Airport, Target, TargetType};

    fn basic_env() -> Environment {
        Environment {
            airports: vec![
                Airport {
                    id: "A1".into(),
                    x: 10.0,
                    y: 10.0,
                },
                Airport {
                    id: "A2".into(),
                    x: 90.0,
                    y: 10.0,
                },
            ],
            targets: vec![Target {
                id: "T1".into(),
                x: 50.0,
                y: 50.0,
                priority: 5,
                target_type: TargetType::A,
            }],
            ..Default::default()
        }
    }

    fn config(start: &str, end: &str, budget: f64) -> DroneConfig {
        DroneConfig {
            enabled: true,
            fuel_budget: budget,
            start_id: start.into(),
            end_id: end.into(),
            accessible_types: Vec::new(),
        }
    }

    #[test]
    fn test_contract_rejects_unknown_start() {
        let env = basic_env();
        let configs = BTreeMap::from([("1".to_string(), config("A9", "A1", 200.0))]);
        let err = solve(
            &env,
            &configs,
            AllocationStrategy::Greedy,
            &SolveOptions::default(),
        );
        assert!(matches!(err, Err(PlanError::InfeasibleContract { .. })));
    }

    #[test]
    fn test_contract_rejects_unknown_end() {
        let env = basic_env();
        let configs = BTreeMap::from([("1".to_string(), config("A1", "A9", 200.0))]);
        let err = solve(
            &env,
            &configs,
            AllocationStrategy::Greedy,
            &SolveOptions::default(),
        );
        assert!(matches!(err, Err(PlanError::InfeasibleContract { .. })));
    }

    #[test]
    fn test_solve_euclidean_mode_round_trip() {
        let env = basic_env();
        let configs = BTreeMap::from([("1".to_string(), config("A1", "A1", 200.0))]);
        let options = SolveOptions {
            use_sam_aware_distances: false,
            ..Default::default()
        };
        let solution = solve(&env, &configs, AllocationStrategy::Greedy, &options).unwrap();
        assert_eq!(solution.routes["1"].route, vec!["A1", "T1", "A1"]);
        assert_eq!(solution.total_prize, 5);
    }

    #[test]
    fn test_free_end_picks_shorter_airport() {
        // T1 sits near A2: visiting it and landing there beats returning.
        let mut env = basic_env();
        env.targets[0].x = 80.0;
        env.targets[0].y = 40.0;
        let configs = BTreeMap::from([("1".to_string(), config("A1", "ANY", 400.0))]);
        let options = SolveOptions {
            use_sam_aware_distances: false,
            post_optimize: false,
            ..Default::default()
        };
        let solution = solve(&env, &configs, AllocationStrategy::Greedy, &options).unwrap();
        assert_eq!(solution.routes["1"].route, vec!["A1", "T1", "A2"]);
    }

    #[test]
    fn test_disabled_drone_gets_empty_route() {
        let env = basic_env();
        let mut off = config("A1", "A1", 200.0);
        off.enabled = false;
        let configs = BTreeMap::from([
            ("1".to_string(), config("A1", "A1", 200.0)),
            ("2".to_string(), off),
        ]);
        let options = SolveOptions {
            use_sam_aware_distances: false,
            ..Default::default()
        };
        let solution = solve(&env, &configs, AllocationStrategy::Greedy, &options).unwrap();
        assert!(solution.routes["2"].route.is_empty());
        assert_eq!(solution.routes["2"].prize, 0);
    }

    #[test]
    fn test_apply_sequence_reports() {
        let env = basic_env();
        let report = apply_sequence("1", "A1, T1, A1", &env, 200.0);
        assert!(report.ok, "error: {:?}", report.error);
        assert_eq!(report.route, vec!["A1", "T1", "A1"]);
        assert_eq!(report.prize, 5);
        assert!((report.length - 2.0 * (40.0_f64 * 40.0 + 40.0 * 40.0).sqrt()).abs() < 1e-6);

        let report = apply_sequence("1", "A1,T7,A1", &env, 200.0);
        assert!(!report.ok);
        assert!(report.error.unwrap().contains("unknown waypoint"));

        let report = apply_sequence("1", "A1,T1,A1", &env, 10.0);
        assert!(!report.ok);
        assert!(report.error.unwrap().contains("exceeds fuel budget"));
    }

    #[test]
    fn test_coverage_stats() {
        let env = basic_env();
        let configs = BTreeMap::from([("1".to_string(), config("A1", "A1", 200.0))]);
        let options = SolveOptions {
            use_sam_aware_distances: false,
            ..Default::default()
        };
        let solution = solve(&env, &configs, AllocationStrategy::Greedy, &options).unwrap();
        let stats = coverage_stats(&solution, &env);
        assert_eq!(stats.targets_visited, 1);
        assert_eq!(stats.targets_total, 1);
        assert_eq!(stats.prize_collected, 5);
        assert!(stats.unvisited_targets.is_empty());
        assert!((stats.coverage_percent - 100.0).abs() < 1e-9);
    }
}
