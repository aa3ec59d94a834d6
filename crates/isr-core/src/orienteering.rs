//! Budget-constrained maximum-prize routing for a single drone.
//!
//! Classic Held-Karp bitmask DP over the drone's assigned targets. Because
//! the prize of a state is fully determined by its visited-set bitmask, the
//! table stores the minimum length per (mask, last target); the best final
//! state is chosen by prize descending, then total length ascending, with
//! remaining ties falling to the earlier state in scan order. States whose
//! length already exceeds the budget are pruned as they appear.

use crate::geometry::EPS_BUDGET;
use crate::matrix::DistanceMatrix;
use crate::models::Environment;

/// Hard ceiling on DP size; the facade truncates allocations well below
/// this, the assert is a backstop against quadratic-memory mistakes.
const MAX_DP_TARGETS: usize = 20;

/// Optimal route for one drone.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSolution {
    /// start anchor, visited targets in order, end anchor.
    pub route: Vec<String>,
    /// The visited targets only, in visit order.
    pub visited: Vec<String>,
    pub length: f64,
    pub prize: u32,
}

/// Solve the orienteering problem from `start` to `end` over `target_ids`
/// within `fuel_budget`.
///
/// Targets with no finite distance from the start never enter the table, so
/// excluded targets are unselectable by construction. When no target fits
/// the budget the result is the trivial `start -> end` route with prize 0.
pub fn solve_orienteering(
    matrix: &DistanceMatrix,
    env: &Environment,
    start: &str,
    end: &str,
    target_ids: &[String],
    fuel_budget: f64,
) -> RouteSolution {
    // Sorted target order keeps tie-breaking stable across callers.
    let mut ids: Vec<&String> = target_ids.iter().collect();
    ids.sort();
    assert!(
        ids.len() <= MAX_DP_TARGETS,
        "orienteering DP limited to {MAX_DP_TARGETS} targets, got {}",
        ids.len()
    );

    let k = ids.len();
    let prizes: Vec<u32> = ids
        .iter()
        .map(|id| env.target(id).map_or(0, |t| t.priority))
        .collect();
    let d_start: Vec<f64> = ids
        .iter()
        .map(|id| matrix.distance_between(start, id).unwrap_or(f64::INFINITY))
        .collect();
    let d_end: Vec<f64> = ids
        .iter()
        .map(|id| matrix.distance_between(id, end).unwrap_or(f64::INFINITY))
        .collect();
    let d_pair: Vec<Vec<f64>> = ids
        .iter()
        .map(|a| {
            ids.iter()
                .map(|b| matrix.distance_between(a, b).unwrap_or(f64::INFINITY))
                .collect()
        })
        .collect();

    let trivial_length = matrix
        .distance_between(start, end)
        .unwrap_or(f64::INFINITY);
    let mut best = RouteSolution {
        route: vec![start.to_string(), end.to_string()],
        visited: Vec::new(),
        length: trivial_length,
        prize: 0,
    };
    if k == 0 {
        return best;
    }

    let num_masks = 1usize << k;
    // dp[mask][last] = min length reaching `last` having visited `mask`.
    let mut dp = vec![vec![f64::INFINITY; k]; num_masks];
    let mut parent = vec![vec![usize::MAX; k]; num_masks];

    for t in 0..k {
        if d_start[t].is_finite() && d_start[t] <= fuel_budget + EPS_BUDGET {
            dp[1 << t][t] = d_start[t];
        }
    }

    let mask_prize = |mask: usize| -> u32 {
        (0..k)
            .filter(|t| mask & (1 << t) != 0)
            .map(|t| prizes[t])
            .sum()
    };

    let mut best_prize = 0u32;
    let mut best_total = trivial_length;

    for mask in 1..num_masks {
        for last in 0..k {
            let length = dp[mask][last];
            if !length.is_finite() {
                continue;
            }

            // Terminal step: append the end anchor.
            let total = length + d_end[last];
            if total.is_finite() && total <= fuel_budget + EPS_BUDGET {
                let prize = mask_prize(mask);
                if prize > best_prize || (prize == best_prize && total < best_total) {
                    best_prize = prize;
                    best_total = total;
                    best = RouteSolution {
                        route: reconstruct(&parent, &ids, mask, last, start, end),
                        visited: reconstruct_visited(&parent, &ids, mask, last),
                        length: total,
                        prize,
                    };
                }
            }

            // Extend with an unvisited target.
            for next in 0..k {
                if mask & (1 << next) != 0 {
                    continue;
                }
                let step = d_pair[last][next];
                if !step.is_finite() {
                    continue;
                }
                let candidate = length + step;
                if candidate > fuel_budget + EPS_BUDGET {
                    continue;
                }
                let next_mask = mask | (1 << next);
                if candidate < dp[next_mask][next] {
                    dp[next_mask][next] = candidate;
                    parent[next_mask][next] = last;
                }
            }
        }
    }

    best
}

fn reconstruct_visited(
    parent: &[Vec<usize>],
    ids: &[&String],
    mut mask: usize,
    mut last: usize,
) -> Vec<String> {
    let mut order = Vec::new();
    loop {
        order.push(ids[last].clone());
        let prev = parent[mask][last];
        mask &= !(1 << last);
        if prev == usize::MAX {
            break;
        }
        last = prev;
    }
    order.reverse();
    order
}

fn reconstruct(
    parent: &[Vec<usize>],
    ids: &[&String],
    mask: usize,
    last: usize,
    start: &str,
    end: &str,
) -> Vec<String> {
    let mut route = vec![start.to_string()];
    route.extend(reconstruct_visited(parent, ids, mask, last));
    route.push(end.to_string());
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DistanceMatrix;
    use crate::models::{Airport, Environment, Target, TargetType};

    fn env_with_targets(targets: Vec<(&str, f64, f64, u32)>) -> Environment {
        Environment {
            airports: vec![
                Airport {
                    id: "A1".into(),
                    x: 0.0,
                    y: 0.0,
                },
                Airport {
                    id: "A2".into(),
                    x: 100.0,
                    y: 0.0,
                },
            ],
            targets: targets
                .into_iter()
                .map(|(id, x, y, priority)| Target {
                    id: id.into(),
                    x,
                    y,
                    priority,
                    target_type: TargetType::A,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_target_round_trip() {
        let env = env_with_targets(vec![("T1", 50.0, 50.0, 5)]);
        let matrix = DistanceMatrix::build(&env, 0.0);
        let sol = solve_orienteering(&matrix, &env, "A1", "A1", &ids(&["T1"]), 200.0);
        assert_eq!(sol.route, vec!["A1", "T1", "A1"]);
        assert_eq!(sol.prize, 5);
        // 2 * sqrt(50^2 + 50^2) = 141.42; within a 200 budget.
        assert!((sol.length - 141.42).abs() < 0.01);
    }

    #[test]
    fn test_budget_excludes_far_target() {
        let env = env_with_targets(vec![("T1", 10.0, 0.0, 3), ("T2", 500.0, 0.0, 10)]);
        let matrix = DistanceMatrix::build(&env, 0.0);
        let sol = solve_orienteering(&matrix, &env, "A1", "A1", &ids(&["T1", "T2"]), 100.0);
        assert_eq!(sol.visited, vec!["T1"]);
        assert_eq!(sol.prize, 3);
        assert!(sol.length <= 100.0 + EPS_BUDGET);
    }

    #[test]
    fn test_empty_route_when_nothing_fits() {
        let env = env_with_targets(vec![("T1", 500.0, 0.0, 10)]);
        let matrix = DistanceMatrix::build(&env, 0.0);
        let sol = solve_orienteering(&matrix, &env, "A1", "A2", &ids(&["T1"]), 150.0);
        assert_eq!(sol.route, vec!["A1", "A2"]);
        assert_eq!(sol.prize, 0);
        assert!((sol.length - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_prefers_higher_prize_over_shorter_tour() {
        // T1 is close but cheap; T2 is farther but worth more, and the
        // budget only allows one of them.
        let env = env_with_targets(vec![("T1", -20.0, 0.0, 2), ("T2", 40.0, 0.0, 9)]);
        let matrix = DistanceMatrix::build(&env, 0.0);
        let sol = solve_orienteering(&matrix, &env, "A1", "A1", &ids(&["T1", "T2"]), 90.0);
        assert_eq!(sol.visited, vec!["T2"]);
        assert_eq!(sol.prize, 9);
    }

    #[test]
    fn test_orders_targets_for_min_length() {
        // Both orders collect everything; the DP must pick the shorter
        // sweep A1 -> T1 -> T2 -> A2.
        let env = env_with_targets(vec![("T1", 30.0, 0.0, 5), ("T2", 70.0, 0.0, 5)]);
        let matrix = DistanceMatrix::build(&env, 0.0);
        let sol = solve_orienteering(&matrix, &env, "A1", "A2", &ids(&["T2", "T1"]), 500.0);
        assert_eq!(sol.route, vec!["A1", "T1", "T2", "A2"]);
        assert!((sol.length - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_visits_all_within_budget() {
        let env = env_with_targets(vec![
            ("T1", 20.0, 20.0, 5),
            ("T2", 50.0, 30.0, 5),
            ("T3", 80.0, 20.0, 5),
        ]);
        let matrix = DistanceMatrix::build(&env, 0.0);
        let sol = solve_orienteering(
            &matrix,
            &env,
            "A1",
            "A2",
            &ids(&["T1", "T2", "T3"]),
            400.0,
        );
        assert_eq!(sol.prize, 15);
        assert_eq!(sol.visited.len(), 3);
    }
}
