//! Error types for the planning core.
//!
//! Only malformed input crosses the public boundary as an `Err`; geometry
//! infeasibility, budget infeasibility, and oracle disagreements are all
//! reported through structured `Solution` fields instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    /// The environment failed parsing or validation. Nothing was planned and
    /// the matrix cache is untouched.
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    /// A drone contract references an unknown start or end anchor.
    #[error("infeasible contract for drone {drone_id}: {reason}")]
    InfeasibleContract { drone_id: String, reason: String },

    /// The allocator could not run (e.g. no enabled drones).
    #[error("allocation failed: {0}")]
    Allocation(String),
}

pub type PlanResult<T> = Result<T, PlanError>;
