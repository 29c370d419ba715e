//! Robust counterpart builders.
//!
//! Each builder walks the active uncertain constraints and objectives,
//! replaces the ones whose region matches its geometry with deterministic
//! counterparts, deactivates the originals, and records the mapping on the
//! model. Components whose region belongs to the other geometry are left
//! untouched for the other builder; regions with unknown geometry either
//! stay active (for the cutting-plane fallback) or raise a typed error.

pub mod ellipsoidal;
pub mod polyhedral;

use crate::error::RobustError;
use rob_core::{ConsId, Expr, Model, ObjId, RegionId, Sense};

/// Snapshot of an uncertain component, taken before the model is mutated.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Constraint {
        id: ConsId,
        name: String,
        expr: Expr,
        lower: Option<f64>,
        upper: Option<f64>,
    },
    Objective {
        id: ObjId,
        name: String,
        expr: Expr,
        sense: Sense,
    },
}

impl Target {
    pub(crate) fn name(&self) -> &str {
        match self {
            Target::Constraint { name, .. } | Target::Objective { name, .. } => name,
        }
    }

    pub(crate) fn expr(&self) -> &Expr {
        match self {
            Target::Constraint { expr, .. } | Target::Objective { expr, .. } => expr,
        }
    }
}

/// Active constraints and objectives that reference uncertain parameters.
pub(crate) fn collect_targets(model: &Model) -> Vec<Target> {
    let mut targets = Vec::new();
    for cons in model.constraints() {
        if cons.is_active() && cons.expr.contains_unc() {
            targets.push(Target::Constraint {
                id: cons.id,
                name: cons.name.clone(),
                expr: cons.expr.clone(),
                lower: cons.lower,
                upper: cons.upper,
            });
        }
    }
    for obj in model.objectives() {
        if obj.is_active() && obj.expr.contains_unc() {
            targets.push(Target::Objective {
                id: obj.id,
                name: obj.name.clone(),
                expr: obj.expr.clone(),
                sense: obj.sense,
            });
        }
    }
    targets
}

/// The single region all uncertain parameters of an expression belong to.
pub(crate) fn region_of(model: &Model, name: &str, expr: &Expr) -> Result<RegionId, RobustError> {
    let mut region = None;
    for param in expr.unc_params() {
        let unc = model.unc(param);
        let attached = unc.region.ok_or_else(|| RobustError::MissingRegion {
            param: unc.name.clone(),
        })?;
        match region {
            None => region = Some(attached),
            Some(r) if r == attached => {}
            Some(_) => {
                return Err(RobustError::MixedRegions {
                    constraint: name.to_string(),
                })
            }
        }
    }
    // Targets always contain at least one uncertain parameter.
    region.ok_or_else(|| RobustError::UnsupportedDependence {
        constraint: name.to_string(),
    })
}
