//! Generate a randomized ISR mission scenario.
//!
//! Emits an environment file and a drone config file in the format
//! `solve_mission` consumes. The same seed always produces the same
//! scenario.
//!
//! Usage:
//!   cargo run -p isr-cli --bin gen_scenario -- --seed 7 --env-out env.json --drones-out drones.json

use anyhow::{Context, Result};
use clap::Parser;
use isr_cli::scenario::{generate, ScenarioParams};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate a randomized ISR scenario")]
struct Args {
    #[arg(long, default_value_t = 2)]
    airports: usize,

    #[arg(long, default_value_t = 10)]
    targets: usize,

    #[arg(long, default_value_t = 3)]
    sams: usize,

    #[arg(long, default_value_t = 2)]
    drones: usize,

    /// Map side length
    #[arg(long, default_value_t = 100.0)]
    size: f64,

    #[arg(long, default_value_t = 300.0)]
    fuel_budget: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Where to write the environment JSON (stdout when omitted)
    #[arg(long)]
    env_out: Option<PathBuf>,

    /// Where to write the drone configs JSON
    #[arg(long)]
    drones_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let params = ScenarioParams {
        num_airports: args.airports,
        num_targets: args.targets,
        num_sams: args.sams,
        num_drones: args.drones,
        size: args.size,
        fuel_budget: args.fuel_budget,
        seed: args.seed,
    };
    let (env, drone_configs) = generate(&params);

    let env_json = serde_json::to_string_pretty(&env)?;
    match &args.env_out {
        Some(path) => {
            std::fs::write(path, env_json).with_context(|| format!("writing {}", path.display()))?;
            println!("environment written to {}", path.display());
        }
        None => println!("{env_json}"),
    }

    let drones_json = serde_json::to_string_pretty(&drone_configs)?;
    match &args.drones_out {
        Some(path) => {
            std::fs::write(path, drones_json)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("drone configs written to {}", path.display());
        }
        None => println!("{drones_json}"),
    }

    Ok(())
}
