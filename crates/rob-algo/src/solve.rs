//! Robust meta-solvers.
//!
//! `RobustSolver` turns a model with uncertain parameters into something a
//! deterministic backend can handle, then runs the backend:
//!
//! * `Strategy::Reformulation` builds ellipsoidal counterparts, then
//!   polyhedral counterparts, and solves the resulting model once.
//!   Components over unclassified regions fall back to cutting planes when
//!   `ignore_unknown` is set and raise an error otherwise.
//! * `Strategy::CuttingPlane` enforces every uncertain component lazily,
//!   alternating master solves with exact separation until no component is
//!   violated at its worst case.

use crate::backend::{solver_for, SolverResults, TerminationCondition};
use crate::cuts::{CutGenerator, Separation};
use crate::error::RobustError;
use crate::reformulate::{self, collect_targets};
use rob_core::{Model, Statistics};
use serde::Serialize;
use web_time::Instant;

/// How uncertain components are made deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    Reformulation,
    CuttingPlane,
}

/// Tuning knobs shared by both strategies.
#[derive(Debug, Clone)]
pub struct RobustSolverOptions {
    /// Registered name of the deterministic backend.
    pub solver: String,
    /// Per-solve time limit in seconds, passed through to the backend.
    pub timelimit: Option<f64>,
    /// Stream backend output.
    pub tee: bool,
    /// Route components over unclassified regions to the cutting-plane
    /// loop instead of raising `UnreformulableGeometry`.
    pub ignore_unknown: bool,
    /// Emit exact (nonconvex) padding equalities instead of the conic
    /// relaxation-free inequality form.
    pub root: bool,
    /// Cutting-plane round limit before giving up with `MaxIterations`.
    pub max_cut_rounds: usize,
    /// Worst-case violation tolerance for separation.
    pub tolerance: f64,
}

impl Default for RobustSolverOptions {
    fn default() -> Self {
        Self {
            solver: "clarabel".to_string(),
            timelimit: None,
            tee: false,
            ignore_unknown: false,
            root: false,
            max_cut_rounds: 50,
            tolerance: 1e-6,
        }
    }
}

/// Report of one robust solve.
#[derive(Debug, Clone, Serialize)]
pub struct SolveReport {
    pub solver_name: String,
    pub strategy: Strategy,
    pub termination: TerminationCondition,
    /// Objective value of the robust problem; `None` unless optimal.
    pub objective_value: Option<f64>,
    /// Wall-clock seconds for the whole robust solve.
    pub wall_time: f64,
    /// Backend-reported seconds summed over master solves and separation
    /// subproblems; `None` when no solve reported a time.
    pub cpu_time: Option<f64>,
    pub master_solves: usize,
    pub cuts_added: usize,
    pub statistics: Statistics,
}

/// Meta-solver for models with uncertain parameters.
///
/// Clarabel is the sole built-in deterministic backend; `with_solver`
/// accepts any name registered in [`solver_for`](crate::backend::solver_for).
#[derive(Debug, Clone, Default)]
pub struct RobustSolver {
    strategy: Option<Strategy>,
    options: RobustSolverOptions,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Reformulation
    }
}

impl RobustSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_solver(mut self, solver: impl Into<String>) -> Self {
        self.options.solver = solver.into();
        self
    }

    pub fn with_timelimit(mut self, seconds: f64) -> Self {
        self.options.timelimit = Some(seconds);
        self
    }

    pub fn with_tee(mut self, tee: bool) -> Self {
        self.options.tee = tee;
        self
    }

    pub fn with_ignore_unknown(mut self, ignore: bool) -> Self {
        self.options.ignore_unknown = ignore;
        self
    }

    pub fn with_root(mut self, root: bool) -> Self {
        self.options.root = root;
        self
    }

    pub fn with_max_cut_rounds(mut self, rounds: usize) -> Self {
        self.options.max_cut_rounds = rounds;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.options.tolerance = tolerance;
        self
    }

    pub fn options(&self) -> &RobustSolverOptions {
        &self.options
    }

    /// Solve the robust problem in place. The model is left in its
    /// transformed state: counterparts and cuts stay discoverable, and
    /// variable values hold the final solution.
    pub fn solve(&self, model: &mut Model) -> Result<SolveReport, RobustError> {
        let start = Instant::now();
        let strategy = self.strategy.unwrap_or_default();
        let backend = solver_for(&self.options.solver)?;

        if model.active_objective().is_none() {
            return Err(RobustError::NoActiveObjective);
        }
        self.validate(model)?;

        // Decide which components go through counterparts and which are
        // enforced lazily.
        let mut generators: Vec<CutGenerator> = Vec::new();
        match strategy {
            Strategy::Reformulation => {
                reformulate::ellipsoidal::reformulate(
                    model,
                    self.options.root,
                    self.options.ignore_unknown,
                )?;
                reformulate::polyhedral::reformulate(model, self.options.ignore_unknown)?;
                for target in collect_targets(model) {
                    // Leftovers are unclassified regions admitted by
                    // `ignore_unknown`.
                    generators.push(CutGenerator::from_target(
                        model,
                        target,
                        self.options.tolerance,
                    )?);
                }
            }
            Strategy::CuttingPlane => {
                for target in collect_targets(model) {
                    generators.push(CutGenerator::from_target(
                        model,
                        target,
                        self.options.tolerance,
                    )?);
                }
            }
        }

        let mut master_solves = 0usize;
        let mut cpu_times: Vec<f64> = Vec::new();
        let mut final_results: SolverResults;

        loop {
            let results = backend.solve(model, self.options.tee, self.options.timelimit)?;
            master_solves += 1;
            if let Some(t) = results.cpu_time {
                cpu_times.push(t);
            }

            if results.termination != TerminationCondition::Optimal || generators.is_empty() {
                final_results = results;
                break;
            }

            let mut all_feasible = true;
            for generator in &mut generators {
                let outcome = generator.separate(
                    model,
                    backend.as_ref(),
                    self.options.tee,
                    self.options.timelimit,
                )?;
                if matches!(outcome, Separation::CutAdded { .. }) {
                    all_feasible = false;
                }
            }
            if all_feasible {
                final_results = results;
                break;
            }
            if master_solves >= self.options.max_cut_rounds {
                tracing::warn!(
                    rounds = master_solves,
                    "cutting-plane loop hit the round limit before convergence"
                );
                final_results = results;
                final_results.termination = TerminationCondition::MaxIterations;
                final_results.objective_value = None;
                break;
            }
        }

        for generator in &generators {
            if let Some(t) = generator.oracle_time() {
                cpu_times.push(t);
            }
        }
        let cuts_added = generators.iter().map(CutGenerator::cuts_added).sum();
        let report = SolveReport {
            solver_name: backend.name().to_string(),
            strategy,
            termination: final_results.termination,
            objective_value: final_results.objective_value,
            wall_time: start.elapsed().as_secs_f64(),
            cpu_time: if cpu_times.is_empty() {
                None
            } else {
                Some(cpu_times.iter().sum())
            },
            master_solves,
            cuts_added,
            statistics: model.statistics(),
        };
        tracing::info!(
            solver = %report.solver_name,
            strategy = ?report.strategy,
            termination = ?report.termination,
            master_solves = report.master_solves,
            cuts = report.cuts_added,
            "robust solve finished"
        );
        Ok(report)
    }

    /// Check that every uncertain parameter in use has a non-empty region
    /// before any transformation mutates the model.
    fn validate(&self, model: &Model) -> Result<(), RobustError> {
        for target in collect_targets(model) {
            for param in target.expr().unc_params() {
                let unc = model.unc(param);
                let region = unc.region.ok_or_else(|| RobustError::MissingRegion {
                    param: unc.name.clone(),
                })?;
                if model.region(region).is_empty() {
                    return Err(RobustError::EmptyUncertaintySet {
                        region: model.region(region).name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
