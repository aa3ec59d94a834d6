//! Randomized mission scenario generation.
//!
//! Produces reproducible environments (seeded) for exercising the planner:
//! airports spread across the map, typed prioritized targets, and SAM fields
//! that never swallow an airport.

use isr_core::models::{Airport, Sam};
use isr_core::{DroneConfig, Environment, Target, TargetType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

const TARGET_TYPES: [TargetType; 5] = [
    TargetType::A,
    TargetType::B,
    TargetType::C,
    TargetType::D,
    TargetType::E,
];

/// Knobs for scenario generation.
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub num_airports: usize,
    pub num_targets: usize,
    pub num_sams: usize,
    pub num_drones: usize,
    /// Map side length; everything is placed in [0, size] x [0, size].
    pub size: f64,
    pub fuel_budget: f64,
    pub seed: u64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            num_airports: 2,
            num_targets: 10,
            num_sams: 3,
            num_drones: 2,
            size: 100.0,
            fuel_budget: 300.0,
            seed: 42,
        }
    }
}

/// Generate an environment and matching drone configs.
///
/// SAM placement keeps a margin to every airport so no start anchor ends up
/// inside an exclusion zone; targets may land inside (the planner excludes
/// them, which is a useful case to exercise).
pub fn generate(params: &ScenarioParams) -> (Environment, BTreeMap<String, DroneConfig>) {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let margin = params.size * 0.05;
    let span = margin..(params.size - margin);

    let airports: Vec<Airport> = (1..=params.num_airports)
        .map(|i| Airport {
            id: format!("A{i}"),
            x: rng.random_range(span.clone()),
            y: rng.random_range(span.clone()),
        })
        .collect();

    let targets: Vec<Target> = (1..=params.num_targets)
        .map(|i| Target {
            id: format!("T{i}"),
            x: rng.random_range(span.clone()),
            y: rng.random_range(span.clone()),
            priority: rng.random_range(1..=10),
            target_type: TARGET_TYPES[rng.random_range(0..TARGET_TYPES.len())],
        })
        .collect();

    let mut sams: Vec<Sam> = Vec::new();
    let mut attempts = 0;
    while sams.len() < params.num_sams && attempts < params.num_sams * 50 {
        attempts += 1;
        let candidate = Sam {
            x: rng.random_range(span.clone()),
            y: rng.random_range(span.clone()),
            range: rng.random_range(params.size * 0.05..params.size * 0.15),
        };
        let clears_airports = airports.iter().all(|a| {
            let d = (a.x - candidate.x).hypot(a.y - candidate.y);
            d > candidate.range + margin
        });
        if clears_airports {
            sams.push(candidate);
        }
    }

    let drone_configs: BTreeMap<String, DroneConfig> = (1..=params.num_drones)
        .map(|i| {
            let home = &airports[(i - 1) % airports.len()];
            (
                i.to_string(),
                DroneConfig {
                    enabled: true,
                    fuel_budget: params.fuel_budget,
                    start_id: home.id.clone(),
                    end_id: home.id.clone(),
                    accessible_types: Vec::new(),
                },
            )
        })
        .collect();

    let env = Environment {
        airports,
        targets,
        sams,
        ..Default::default()
    };
    (env, drone_configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_reproducible() {
        let params = ScenarioParams::default();
        let (env_a, configs_a) = generate(&params);
        let (env_b, configs_b) = generate(&params);
        assert_eq!(
            serde_json::to_string(&env_a).unwrap(),
            serde_json::to_string(&env_b).unwrap()
        );
        assert_eq!(configs_a.len(), configs_b.len());
    }

    #[test]
    fn test_generated_environment_is_valid() {
        let params = ScenarioParams {
            num_airports: 3,
            num_targets: 20,
            num_sams: 5,
            num_drones: 3,
            seed: 7,
            ..Default::default()
        };
        let (env, configs) = generate(&params);
        assert!(env.validate().is_empty());
        assert_eq!(env.airports.len(), 3);
        assert_eq!(env.targets.len(), 20);
        assert_eq!(configs.len(), 3);
    }

    #[test]
    fn test_airports_clear_of_sams() {
        let (env, _) = generate(&ScenarioParams {
            num_sams: 6,
            seed: 99,
            ..Default::default()
        });
        for sam in &env.sams {
            for a in &env.airports {
                let d = (a.x - sam.x).hypot(a.y - sam.y);
                assert!(d > sam.range, "airport {} inside SAM range", a.id);
            }
        }
    }
}
