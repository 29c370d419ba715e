//! # rob-core: Robust Optimization Modeling Core
//!
//! Provides the model representation consumed by the robust reformulation
//! engine in `rob-algo`:
//!
//! - Tagged-variant [`Expr`] trees over decision variables and uncertain
//!   parameters, with operator overloading and constant folding
//! - [`Model`]: variables, uncertain parameters, uncertainty regions,
//!   constraints, and objectives, with type-safe newtype ids
//! - [`Region`]: defining constraints or a pre-declared [`LibraryShape`],
//!   with a lazily cached geometry tag
//! - Counterpart bookkeeping so that every reformulated constraint or
//!   objective can be traced to its deterministic replacements
//!
//! ## Quick Start
//!
//! ```rust
//! use rob_core::{Expr, Model, Sense};
//!
//! let mut m = Model::new("example");
//!
//! // Decision variables
//! let x0 = m.add_var("x0", 0.0, 10.0);
//! let x1 = m.add_var("x1", 0.0, 10.0);
//!
//! // A box uncertainty region and two uncertain parameters living in it
//! let region = m.add_region("P");
//! let w0 = m.add_unc_in("w0", 1.0, region);
//! let w1 = m.add_unc_in("w1", 2.0, region);
//! m.region_mut(region)
//!     .add_constraint("w0_range", Expr::Unc(w0), Some(0.5), Some(1.5));
//! m.region_mut(region)
//!     .add_constraint("w1_range", Expr::Unc(w1), Some(1.5), Some(2.5));
//!
//! // An uncertain constraint and a deterministic objective
//! let lhs = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
//! m.add_constraint("cons", lhs, Some(2.0), None);
//! m.add_objective("obj", Expr::Var(x0), Sense::Minimize);
//! ```

pub mod expr;
pub mod ids;
pub mod model;
pub mod region;

pub use expr::{Expr, UnaryOp};
pub use ids::{ConsId, ObjId, RegionId, UncId, VarId};
pub use model::{
    ComponentState, Constraint, CounterpartRecord, CounterpartSource, Model, Objective, Sense,
    Statistics, UncParam, VarKind, Variable,
};
pub use region::{GeometryTag, LibraryShape, Region, RegionConstraint};
