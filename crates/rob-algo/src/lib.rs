//! Robust optimization: reformulation and cutting-plane algorithms.
//!
//! Models built with [`rob_core`] may contain uncertain parameters attached
//! to uncertainty regions. This crate turns such models into deterministic
//! ones a conic backend can solve, two ways:
//!
//! * **Reformulation** — polyhedral regions dualize into linear
//!   counterparts, ellipsoidal regions into second-order cone counterparts.
//!   One deterministic solve, exact worst case.
//! * **Cutting planes** — uncertain components are enforced lazily by an
//!   exact separation oracle. Works for any region the oracle can optimize
//!   over, at the cost of iterating.
//!
//! # Quick start
//!
//! ```
//! use rob_core::{Expr, Model, Sense};
//! use rob_algo::RobustSolver;
//!
//! let mut model = Model::new("production");
//! let region = model.add_region("demand_box");
//! let w = model.add_unc_in("w", 1.0, region);
//! model
//!     .region_mut(region)
//!     .add_constraint("w_range", Expr::Unc(w), Some(0.5), Some(1.5));
//!
//! let x = model.add_var("x", 0.0, 10.0);
//! model.add_constraint("meet_demand", Expr::Unc(w) * Expr::Var(x), Some(2.0), None);
//! model.add_objective("cost", Expr::Var(x), Sense::Minimize);
//!
//! let report = RobustSolver::new().solve(&mut model)?;
//! // Feasible for every w in [0.5, 1.5], so x covers the worst case w = 0.5.
//! assert!((model.var_value(x) - 4.0).abs() < 1e-4);
//! # let _ = report;
//! # Ok::<(), rob_algo::RobustError>(())
//! ```

pub mod backend;
pub mod cuts;
pub mod error;
pub mod geometry;
mod linalg;
pub mod reformulate;
pub mod solve;
pub mod structure;

pub use backend::{
    solver_for, DeterministicSolver, SolverResults, TerminationCondition,
};
pub use cuts::{CutGenerator, Separation};
pub use error::{RobustError, SolverError};
pub use geometry::{classify, Ellipsoid, Polyhedron, RegionGeometry};
pub use solve::{RobustSolver, RobustSolverOptions, SolveReport, Strategy};
pub use structure::{classify_structure, decompose, UncDecomp, UncStructure};
