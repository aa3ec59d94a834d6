//! ISR CLI - Command line tools for the ISR mission planner.
//!
//! This crate provides the planner binaries:
//! - solve_mission: run the full planning pipeline on an environment file
//! - gen_scenario: generate a randomized mission environment

pub mod scenario;
