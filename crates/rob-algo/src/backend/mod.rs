//! Deterministic solver backends.
//!
//! Counterpart models and cutting-plane masters are plain deterministic
//! models; this module hides which solver runs them behind a small trait so
//! the meta-solvers select a backend by name.

pub mod clarabel;

use crate::error::SolverError;
use rob_core::Model;
use serde::Serialize;

/// How a deterministic solve terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationCondition {
    Optimal,
    Infeasible,
    Unbounded,
    MaxIterations,
    MaxTimeLimit,
    Error,
}

/// Results of a single deterministic solve.
#[derive(Debug, Clone, Serialize)]
pub struct SolverResults {
    pub termination: TerminationCondition,
    /// Objective value in the model's own sense; `None` unless optimal.
    pub objective_value: Option<f64>,
    /// Solver-reported time in seconds, when the backend exposes one.
    pub cpu_time: Option<f64>,
    pub iterations: usize,
}

/// A deterministic optimization backend.
///
/// `solve` writes the optimal point back into the model's variable values
/// when it terminates optimally; otherwise the values are left untouched.
pub trait DeterministicSolver {
    fn name(&self) -> &'static str;

    fn solve(
        &self,
        model: &mut Model,
        tee: bool,
        timelimit: Option<f64>,
    ) -> Result<SolverResults, SolverError>;
}

/// Look up a backend by its registered name.
pub fn solver_for(name: &str) -> Result<Box<dyn DeterministicSolver>, SolverError> {
    match name {
        "clarabel" => Ok(Box::new(clarabel::ClarabelSolver::default())),
        other => Err(SolverError::UnknownSolver(other.to_string())),
    }
}
