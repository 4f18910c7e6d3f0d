//! Allocation: soft-constrained mean-variance with transaction costs.
//!
//! The adapter turns forecasts and a risk snapshot into an
//! [`AllocationProblem`], hands it to a [`ConvexSolver`], validates the
//! answer, and falls back to the previous weights when anything goes wrong.

pub mod adapter;
pub mod problem;
pub mod solver;

pub use adapter::{
    AllocationAdapter, AllocationOutcome, DegradedAllocation, PenaltySchedule, StaticPenalties,
};
pub use problem::{AllocationProblem, Violations};
pub use solver::{
    ConvexSolver, ProjectedGradientSolver, SignalProportionalSolver, Solution, SolveStatus,
    SolverFailure,
};
