//! Solve an ISR mission from the command line.
//!
//! Reads an environment file (editor export format) and a drone config
//! file, runs the full planning pipeline, and prints per-drone routes plus
//! coverage statistics.
//!
//! Usage:
//!   cargo run -p isr-cli --bin solve_mission -- --env env.json --drones drones.json

use anyhow::{Context, Result};
use clap::Parser;
use isr_core::{
    coverage_stats, prepare_matrix, solve, AllocationStrategy, DroneConfig, Environment,
    SolveOptions,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Solve a multi-drone ISR mission")]
struct Args {
    /// Environment JSON (airports, targets, sams)
    #[arg(long)]
    env: PathBuf,

    /// Drone configs JSON: { "1": { "fuel_budget": 300, "start_id": "A1", ... }, ... }
    #[arg(long)]
    drones: PathBuf,

    /// Allocation strategy: greedy | balanced | efficient | geographic | exclusive
    #[arg(long, default_value = "efficient")]
    strategy: String,

    /// Safety buffer added to every SAM radius before wrapping
    #[arg(long, default_value_t = 0.0)]
    buffer: f64,

    /// Skip the post-optimization passes
    #[arg(long)]
    no_post_optimize: bool,

    /// Use plain Euclidean distances (SAM avoidance still applies to trajectories)
    #[arg(long)]
    euclidean: bool,

    /// Write the full solution JSON here
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let env_json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&args.env)
            .with_context(|| format!("reading {}", args.env.display()))?,
    )
    .context("environment file is not valid JSON")?;
    let env = Environment::from_json(&env_json)?;

    let drone_configs: BTreeMap<String, DroneConfig> = serde_json::from_str(
        &std::fs::read_to_string(&args.drones)
            .with_context(|| format!("reading {}", args.drones.display()))?,
    )
    .context("drone config file is not valid JSON")?;

    let strategy = AllocationStrategy::from_str(&args.strategy)?;
    let options = SolveOptions {
        post_optimize: !args.no_post_optimize,
        use_sam_aware_distances: !args.euclidean,
        ..Default::default()
    };

    if !args.euclidean {
        let summary = prepare_matrix(&env, args.buffer)?;
        println!(
            "matrix: {} waypoints, {} avoidance paths, {} excluded",
            summary.num_waypoints,
            summary.num_avoidance_paths,
            summary.excluded_targets.len()
        );
    }

    let solution = solve(&env, &drone_configs, strategy, &options)?;

    for (drone_id, route) in &solution.routes {
        if route.route.is_empty() {
            println!("drone {drone_id}: disabled");
            continue;
        }
        println!(
            "drone {drone_id}: {}  prize={} length={:.1}/{:.0}{}",
            route.sequence,
            route.prize,
            route.length,
            route.fuel_budget,
            route
                .trajectory_error
                .as_deref()
                .map(|e| format!("  TRAJECTORY ERROR: {e}"))
                .unwrap_or_default()
        );
    }

    let stats = coverage_stats(&solution, &env);
    println!(
        "coverage: {}/{} targets ({:.0}%), prize {}/{} ({:.0}%), total length {:.1}",
        stats.targets_visited,
        stats.targets_total,
        stats.coverage_percent,
        stats.prize_collected,
        stats.prize_possible,
        stats.prize_percent,
        stats.total_length
    );
    if !stats.unvisited_targets.is_empty() {
        println!("unvisited: {}", stats.unvisited_targets.join(", "));
    }

    if let Some(path) = args.output {
        std::fs::write(&path, serde_json::to_string_pretty(&solution)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("solution written to {}", path.display());
    }

    Ok(())
}
