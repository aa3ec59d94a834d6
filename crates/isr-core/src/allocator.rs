//! Target allocation across the drone fleet.
//!
//! Partitions the eligible targets among enabled drones before the per-drone
//! orienteering solve, honoring type access and skipping excluded targets.
//! Five strategies; each is deterministic for identical input (iteration is
//! always over priority-sorted targets and id-sorted drones, and ties fall
//! to the first drone in id order).

use crate::geometry::distance;
use crate::matrix::DistanceMatrix;
use crate::models::{drone_order_key, AllocationStrategy, DroneConfig, Environment, Target};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Division-by-zero guard for efficiency scores, matching the pen-tip case
/// where a drone sits exactly on a target.
const MIN_SCORE_DISTANCE: f64 = 0.1;

/// Allocate targets to drones using the given strategy.
///
/// Every drone id in `configs` gets an entry; disabled drones always get an
/// empty list. Excluded targets are never assigned.
pub fn allocate_targets(
    env: &Environment,
    matrix: &DistanceMatrix,
    configs: &BTreeMap<String, DroneConfig>,
    strategy: AllocationStrategy,
) -> BTreeMap<String, Vec<String>> {
    let mut assignments: BTreeMap<String, Vec<String>> = configs
        .keys()
        .map(|id| (id.clone(), Vec::new()))
        .collect();

    // Enabled drones in stable id order.
    let mut drone_ids: Vec<&String> = configs
        .iter()
        .filter(|(_, cfg)| cfg.enabled)
        .map(|(id, _)| id)
        .collect();
    drone_ids.sort_by_key(|id| drone_order_key(id));

    // Eligible targets sorted by priority desc, id asc.
    let mut targets: Vec<&Target> = env
        .targets
        .iter()
        .filter(|t| !matrix.is_excluded(&t.id))
        .collect();
    targets.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

    if drone_ids.is_empty() || targets.is_empty() {
        return assignments;
    }

    let mut ctx = AllocationContext {
        env,
        matrix,
        configs,
        drone_ids: &drone_ids,
        pen_tips: drone_ids
            .iter()
            .map(|id| ((*id).clone(), configs[*id].start_id.clone()))
            .collect(),
    };

    match strategy {
        AllocationStrategy::Greedy => greedy(&mut ctx, &targets, &mut assignments),
        AllocationStrategy::Balanced => balanced(&mut ctx, &targets, &mut assignments),
        AllocationStrategy::Efficient => efficient(&mut ctx, &targets, &mut assignments),
        AllocationStrategy::Geographic => geographic(&mut ctx, &targets, &mut assignments),
        AllocationStrategy::Exclusive => exclusive_first(&mut ctx, &targets, &mut assignments),
    }

    let total: usize = assignments.values().map(Vec::len).sum();
    info!(
        strategy = ?strategy,
        assigned = total,
        eligible = targets.len(),
        "target allocation complete"
    );
    for t in &targets {
        if !assignments.values().any(|ids| ids.contains(&t.id)) {
            debug!(target_id = %t.id, "target not assigned by allocator");
        }
    }

    assignments
}

struct AllocationContext<'a> {
    env: &'a Environment,
    matrix: &'a DistanceMatrix,
    configs: &'a BTreeMap<String, DroneConfig>,
    drone_ids: &'a [&'a String],
    /// Last assigned position per drone, initially the start anchor.
    pen_tips: BTreeMap<String, String>,
}

impl AllocationContext<'_> {
    fn can_access(&self, drone_id: &str, target: &Target) -> bool {
        self.configs[drone_id].can_access(target.target_type)
    }

    /// Matrix distance between two labels, with a Euclidean fallback when a
    /// label is missing from the matrix.
    fn dist(&self, from: &str, to: &str) -> f64 {
        if let Some(d) = self.matrix.distance_between(from, to) {
            return d;
        }
        let positions = self.env.waypoint_positions();
        match (positions.get(from), positions.get(to)) {
            (Some(&a), Some(&b)) => distance(a, b),
            _ => f64::INFINITY,
        }
    }

    fn pen_tip_distance(&self, drone_id: &str, target: &Target) -> f64 {
        self.dist(&self.pen_tips[drone_id], &target.id)
    }

    fn assign(
        &mut self,
        drone_id: &str,
        target: &Target,
        assignments: &mut BTreeMap<String, Vec<String>>,
    ) {
        assignments
            .get_mut(drone_id)
            .expect("assignments hold every drone id")
            .push(target.id.clone());
        self.pen_tips
            .insert(drone_id.to_string(), target.id.clone());
    }
}

/// Highest priority first; each target goes to the eligible drone whose pen
/// tip is closest.
fn greedy(
    ctx: &mut AllocationContext,
    targets: &[&Target],
    assignments: &mut BTreeMap<String, Vec<String>>,
) {
    for target in targets {
        let mut best: Option<(&String, f64)> = None;
        for &drone_id in ctx.drone_ids {
            if !ctx.can_access(drone_id, target) {
                continue;
            }
            let d = ctx.pen_tip_distance(drone_id, target);
            if !d.is_finite() {
                continue;
            }
            if best.is_none_or(|(_, bd)| d < bd) {
                best = Some((drone_id, d));
            }
        }
        if let Some((drone_id, _)) = best {
            ctx.assign(&drone_id.clone(), target, assignments);
        }
    }
}

/// Even counts under a per-drone quota of ceil(T/D) or floor(T/D); the
/// remainder goes to the lowest-indexed drones.
fn balanced(
    ctx: &mut AllocationContext,
    targets: &[&Target],
    assignments: &mut BTreeMap<String, Vec<String>>,
) {
    let num_drones = ctx.drone_ids.len();
    let base_quota = targets.len() / num_drones;
    let remainder = targets.len() % num_drones;
    let quotas: BTreeMap<&String, usize> = ctx
        .drone_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, base_quota + usize::from(i < remainder)))
        .collect();

    for target in targets {
        let mut best: Option<(&String, usize, f64)> = None;
        for &drone_id in ctx.drone_ids {
            if !ctx.can_access(drone_id, target) {
                continue;
            }
            let count = assignments[drone_id].len();
            if count >= quotas[drone_id] {
                continue;
            }
            let d = ctx.pen_tip_distance(drone_id, target);
            if !d.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, bc, bd)) => count < bc || (count == bc && d < bd),
            };
            if better {
                best = Some((drone_id, count, d));
            }
        }
        if let Some((drone_id, _, _)) = best {
            ctx.assign(&drone_id.clone(), target, assignments);
        }
    }
}

/// Auction on priority per unit distance from the pen tip.
fn efficient(
    ctx: &mut AllocationContext,
    targets: &[&Target],
    assignments: &mut BTreeMap<String, Vec<String>>,
) {
    for target in targets {
        if let Some(drone_id) = best_by_efficiency(ctx, target) {
            ctx.assign(&drone_id, target, assignments);
        }
    }
}

fn best_by_efficiency(ctx: &AllocationContext, target: &Target) -> Option<String> {
    let mut best: Option<(&String, f64)> = None;
    for &drone_id in ctx.drone_ids {
        if !ctx.can_access(drone_id, target) {
            continue;
        }
        let d = ctx.pen_tip_distance(drone_id, target);
        if !d.is_finite() {
            continue;
        }
        let score = f64::from(target.priority) / d.max(MIN_SCORE_DISTANCE);
        if best.is_none_or(|(_, bs)| score > bs) {
            best = Some((drone_id, score));
        }
    }
    best.map(|(id, _)| id.clone())
}

/// Angular sectors around the target centroid, one per drone in id order.
/// Targets whose sector drone lacks access fall to the nearest eligible
/// sector.
fn geographic(
    ctx: &mut AllocationContext,
    targets: &[&Target],
    assignments: &mut BTreeMap<String, Vec<String>>,
) {
    let center_x = targets.iter().map(|t| t.x).sum::<f64>() / targets.len() as f64;
    let center_y = targets.iter().map(|t| t.y).sum::<f64>() / targets.len() as f64;

    let num_drones = ctx.drone_ids.len();
    let sector_size = 2.0 * std::f64::consts::PI / num_drones as f64;
    let sector_start = |i: usize| i as f64 * sector_size - std::f64::consts::PI;

    for target in targets {
        let angle = (target.y - center_y).atan2(target.x - center_x);

        let mut chosen: Option<&String> = None;
        for (i, &drone_id) in ctx.drone_ids.iter().enumerate() {
            let start = sector_start(i);
            let mut test = angle;
            if test < start {
                test += 2.0 * std::f64::consts::PI;
            }
            if test >= start && test < start + sector_size && ctx.can_access(drone_id, target) {
                chosen = Some(drone_id);
                break;
            }
        }

        // Out-of-sector fallback: nearest eligible sector by angular
        // distance to its midline.
        if chosen.is_none() {
            let mut best: Option<(&String, f64)> = None;
            for (i, &drone_id) in ctx.drone_ids.iter().enumerate() {
                if !ctx.can_access(drone_id, target) {
                    continue;
                }
                let mid = sector_start(i) + sector_size / 2.0;
                let mut gap = (angle - mid).abs();
                if gap > std::f64::consts::PI {
                    gap = 2.0 * std::f64::consts::PI - gap;
                }
                if best.is_none_or(|(_, bg)| gap < bg) {
                    best = Some((drone_id, gap));
                }
            }
            chosen = best.map(|(id, _)| id);
        }

        if let Some(drone_id) = chosen {
            ctx.assign(&drone_id.clone(), target, assignments);
        }
    }
}

/// Two passes: targets only one enabled drone can access go there first,
/// then the remainder runs through the efficiency auction.
fn exclusive_first(
    ctx: &mut AllocationContext,
    targets: &[&Target],
    assignments: &mut BTreeMap<String, Vec<String>>,
) {
    let mut remaining: Vec<&Target> = Vec::new();

    for target in targets {
        let capable: Vec<&String> = ctx
            .drone_ids
            .iter()
            .copied()
            .filter(|id| ctx.can_access(id, target))
            .collect();
        if capable.len() == 1 {
            ctx.assign(&capable[0].clone(), target, assignments);
        } else {
            remaining.push(target);
        }
    }

    for target in remaining {
        if let Some(drone_id) = best_by_efficiency(ctx, target) {
            ctx.assign(&drone_id, target, assignments);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Airport, Target, TargetType};

    fn airport(id: &str, x: f64, y: f64) -> Airport {
        Airport {
            id: id.into(),
            x,
            y,
        }
    }

    fn target(id: &str, x: f64, y: f64, priority: u32, t: TargetType) -> Target {
        Target {
            id: id.into(),
            x,
            y,
            priority,
            target_type: t,
        }
    }

    fn config(start: &str, types: &[TargetType]) -> DroneConfig {
        DroneConfig {
            enabled: true,
            fuel_budget: 300.0,
            start_id: start.into(),
            end_id: start.into(),
            accessible_types: types.to_vec(),
        }
    }

    fn two_drone_env() -> (Environment, BTreeMap<String, DroneConfig>) {
        let env = Environment {
            airports: vec![airport("A1", 0.0, 0.0), airport("A2", 100.0, 0.0)],
            targets: vec![
                target("T1", 20.0, 40.0, 5, TargetType::A),
                target("T2", 80.0, 40.0, 5, TargetType::A),
                target("T3", 20.0, 60.0, 5, TargetType::A),
                target("T4", 80.0, 60.0, 5, TargetType::A),
            ],
            ..Default::default()
        };
        let configs = BTreeMap::from([
            ("1".to_string(), config("A1", &[])),
            ("2".to_string(), config("A2", &[])),
        ]);
        (env, configs)
    }

    #[test]
    fn test_balanced_splits_by_proximity() {
        let (env, configs) = two_drone_env();
        let matrix = DistanceMatrix::build(&env, 0.0);
        let alloc = allocate_targets(&env, &matrix, &configs, AllocationStrategy::Balanced);
        assert_eq!(alloc["1"].len(), 2);
        assert_eq!(alloc["2"].len(), 2);
        assert!(alloc["1"].contains(&"T1".to_string()));
        assert!(alloc["1"].contains(&"T3".to_string()));
        assert!(alloc["2"].contains(&"T2".to_string()));
        assert!(alloc["2"].contains(&"T4".to_string()));
    }

    #[test]
    fn test_greedy_assigns_all_targets() {
        let (env, configs) = two_drone_env();
        let matrix = DistanceMatrix::build(&env, 0.0);
        let alloc = allocate_targets(&env, &matrix, &configs, AllocationStrategy::Greedy);
        let total: usize = alloc.values().map(Vec::len).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_disabled_drone_gets_nothing() {
        let (env, mut configs) = two_drone_env();
        configs.get_mut("2").unwrap().enabled = false;
        let matrix = DistanceMatrix::build(&env, 0.0);
        let alloc = allocate_targets(&env, &matrix, &configs, AllocationStrategy::Efficient);
        assert!(alloc["2"].is_empty());
        assert_eq!(alloc["1"].len(), 4);
    }

    #[test]
    fn test_type_access_respected() {
        let (mut env, mut configs) = two_drone_env();
        env.targets[0].target_type = TargetType::B; // T1 becomes type b
        configs.get_mut("1").unwrap().accessible_types = vec![TargetType::A];
        let matrix = DistanceMatrix::build(&env, 0.0);
        for strategy in [
            AllocationStrategy::Greedy,
            AllocationStrategy::Balanced,
            AllocationStrategy::Efficient,
            AllocationStrategy::Geographic,
            AllocationStrategy::Exclusive,
        ] {
            let alloc = allocate_targets(&env, &matrix, &configs, strategy);
            assert!(
                !alloc["1"].contains(&"T1".to_string()),
                "{strategy:?} assigned an inaccessible target"
            );
        }
    }

    #[test]
    fn test_exclusive_first_pass() {
        let (mut env, mut configs) = two_drone_env();
        // T2 is type b and only drone 2 can take it.
        env.targets[1].target_type = TargetType::B;
        configs.get_mut("1").unwrap().accessible_types = vec![TargetType::A];
        let matrix = DistanceMatrix::build(&env, 0.0);
        let alloc = allocate_targets(&env, &matrix, &configs, AllocationStrategy::Exclusive);
        assert!(alloc["2"].contains(&"T2".to_string()));
    }

    #[test]
    fn test_excluded_targets_never_assigned() {
        let (mut env, configs) = two_drone_env();
        env.sams = vec![crate::models::Sam {
            x: 20.0,
            y: 40.0,
            range: 8.0,
        }];
        let matrix = DistanceMatrix::build(&env, 0.0);
        assert!(matrix.is_excluded("T1"));
        for strategy in [
            AllocationStrategy::Greedy,
            AllocationStrategy::Balanced,
            AllocationStrategy::Efficient,
            AllocationStrategy::Geographic,
            AllocationStrategy::Exclusive,
        ] {
            let alloc = allocate_targets(&env, &matrix, &configs, strategy);
            assert!(
                !alloc.values().any(|ids| ids.contains(&"T1".to_string())),
                "{strategy:?} assigned an excluded target"
            );
        }
    }

    #[test]
    fn test_determinism_across_calls() {
        let (env, configs) = two_drone_env();
        let matrix = DistanceMatrix::build(&env, 0.0);
        let a = allocate_targets(&env, &matrix, &configs, AllocationStrategy::Efficient);
        let b = allocate_targets(&env, &matrix, &configs, AllocationStrategy::Efficient);
        assert_eq!(a, b);
    }
}
