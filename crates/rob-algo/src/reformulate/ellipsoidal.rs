//! Ellipsoidal robust counterparts.
//!
//! Over an ellipsoid with center `w0` and scaled shape matrix `sigma`, the
//! worst case of `c(x) + sum_i a_i(x) w_i` is
//! `c(x) + a(x)'w0 + sqrt(a(x)' sigma a(x))`. The square root is modeled
//! with a nonnegative padding variable `p` satisfying `p^2 >= a' sigma a`,
//! which lowers to a second-order cone. A second epigraph variable carries
//! the squared padding value for inspection.
//!
//! With `root` set, the padding constraints are written as equalities
//! instead. That is the exact nonconvex form; the conic backend refuses it,
//! so it is only useful when the counterpart model is consumed elsewhere.

use super::{collect_targets, region_of, Target};
use crate::error::RobustError;
use crate::geometry::{classify, Ellipsoid, RegionGeometry};
use crate::structure::{decompose, UncDecomp};
use rob_core::{CounterpartRecord, CounterpartSource, Expr, Model, Sense};

/// Replace every active ellipsoidal-region component with its deterministic
/// counterpart. Returns the number of components reformulated.
pub fn reformulate(model: &mut Model, root: bool, ignore_unknown: bool) -> Result<usize, RobustError> {
    let mut reformulated = 0;

    for target in collect_targets(model) {
        let region = region_of(model, target.name(), target.expr())?;
        let ell = match classify(model, region)? {
            RegionGeometry::Ellipsoidal(e) => e,
            RegionGeometry::Polyhedral(_) => continue,
            RegionGeometry::Unclassified => {
                if ignore_unknown {
                    tracing::debug!(
                        component = target.name(),
                        "skipping component over unclassified region"
                    );
                    continue;
                }
                return Err(RobustError::UnreformulableGeometry {
                    region: model.region(region).name.clone(),
                });
            }
        };

        let decomp = decompose(target.expr())
            .filter(UncDecomp::is_affine)
            .ok_or_else(|| RobustError::UnsupportedDependence {
                constraint: target.name().to_string(),
            })?;

        let name = target.name().to_string();
        let coefs: Vec<Expr> = ell
            .params
            .iter()
            .map(|p| decomp.coefficient(*p))
            .collect();

        let mut constraints = Vec::new();
        let mut variables = Vec::new();

        // Parameters the ellipsoid does not span have an unbounded worst
        // case; their coefficients are pinned to zero.
        let mut fixed = 0usize;
        for param in decomp.linear.keys() {
            if !ell.params.contains(param) {
                let coef = decomp.coefficient(*param);
                constraints.push(model.add_constraint(
                    format!("{name}_fixed_{fixed}"),
                    coef,
                    Some(0.0),
                    Some(0.0),
                ));
                fixed += 1;
            }
        }

        let nominal = nominal_expr(&decomp, &ell, &coefs);
        let quadform = quadratic_form(&ell, &coefs);

        let padding = model.add_var(format!("{name}_padding"), 0.0, f64::INFINITY);
        let det = model.add_var(format!("{name}_det"), 0.0, f64::INFINITY);
        variables.push(padding);
        variables.push(det);

        if root {
            constraints.push(model.add_constraint(
                format!("{name}_det_cons"),
                quadform.clone() - Expr::Var(det),
                Some(0.0),
                Some(0.0),
            ));
            constraints.push(model.add_constraint(
                format!("{name}_padding_cons"),
                Expr::Var(padding).pow(2) - Expr::Var(det),
                Some(0.0),
                Some(0.0),
            ));
        } else {
            constraints.push(model.add_constraint(
                format!("{name}_padding_cons"),
                quadform.clone() - Expr::Var(padding).pow(2),
                None,
                Some(0.0),
            ));
            constraints.push(model.add_constraint(
                format!("{name}_det_cons"),
                quadform - Expr::Var(det),
                None,
                Some(0.0),
            ));
        }

        match target {
            Target::Constraint {
                id, lower, upper, ..
            } => {
                if let Some(ub) = upper {
                    constraints.push(model.add_constraint(
                        format!("{name}_counterpart_upper"),
                        nominal.clone() + Expr::Var(padding),
                        None,
                        Some(ub),
                    ));
                }
                if let Some(lb) = lower {
                    constraints.push(model.add_constraint(
                        format!("{name}_counterpart_lower"),
                        nominal.clone() - Expr::Var(padding),
                        Some(lb),
                        None,
                    ));
                }
                model.deactivate_constraint(id);
                model.record_counterpart(CounterpartRecord {
                    original: CounterpartSource::Constraint(id),
                    constraints,
                    variables,
                    objective: None,
                });
            }
            Target::Objective { id, sense, .. } => {
                let expr = match sense {
                    Sense::Minimize => nominal + Expr::Var(padding),
                    Sense::Maximize => nominal - Expr::Var(padding),
                };
                let objective =
                    model.add_objective(format!("{name}_counterpart"), expr, sense);
                model.deactivate_objective(id);
                model.record_counterpart(CounterpartRecord {
                    original: CounterpartSource::Objective(id),
                    constraints,
                    variables,
                    objective: Some(objective),
                });
            }
        }

        reformulated += 1;
    }

    if reformulated > 0 {
        tracing::debug!(count = reformulated, "built ellipsoidal counterparts");
    }
    Ok(reformulated)
}

/// `c(x) + a(x)'w0`: the expression at the ellipsoid center.
fn nominal_expr(decomp: &UncDecomp, ell: &Ellipsoid, coefs: &[Expr]) -> Expr {
    let mut expr = decomp.constant.clone();
    for (i, coef) in coefs.iter().enumerate() {
        expr = expr + coef.clone() * Expr::Const(ell.center[i]);
    }
    expr
}

/// `a(x)' sigma a(x)` as an expression over the decision variables.
fn quadratic_form(ell: &Ellipsoid, coefs: &[Expr]) -> Expr {
    let n = coefs.len();
    let mut expr = Expr::zero();
    for i in 0..n {
        if coefs[i].is_zero() {
            continue;
        }
        let diag = ell.sigma[i][i];
        if diag != 0.0 {
            expr = expr + Expr::Const(diag) * coefs[i].clone().pow(2);
        }
        for j in i + 1..n {
            if coefs[j].is_zero() {
                continue;
            }
            let cross = ell.sigma[i][j] + ell.sigma[j][i];
            if cross != 0.0 {
                expr = expr + Expr::Const(cross) * (coefs[i].clone() * coefs[j].clone());
            }
        }
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;
    use rob_core::LibraryShape;

    fn ellipsoid_model() -> (Model, rob_core::RegionId, rob_core::UncId) {
        let mut m = Model::new("ell");
        let region = m.add_region("E");
        let w = m.add_unc_in("w", 1.0, region);
        m.region_mut(region).set_library(LibraryShape::Ellipsoid {
            params: vec![w],
            center: vec![1.0],
            covariance: vec![vec![0.04]],
        });
        (m, region, w)
    }

    #[test]
    fn constraint_counterpart_uses_padding() {
        let (mut m, _, w) = ellipsoid_model();
        let x = m.add_var("x", 0.0, 10.0);
        let cons = m.add_constraint("cap", Expr::Unc(w) * Expr::Var(x), None, Some(2.0));

        assert_eq!(reformulate(&mut m, false, false).unwrap(), 1);
        assert!(!m.constraint(cons).is_active());
        assert!(m.variable_by_name("cap_padding").is_some());
        assert!(m.variable_by_name("cap_det").is_some());

        let counterpart = m.constraint_by_name("cap_counterpart_upper").unwrap();
        assert_eq!(counterpart.upper, Some(2.0));
        let padding_cons = m.constraint_by_name("cap_padding_cons").unwrap();
        assert!(!padding_cons.is_equality());
    }

    #[test]
    fn root_mode_emits_equalities() {
        let (mut m, _, w) = ellipsoid_model();
        let x = m.add_var("x", 0.0, 10.0);
        m.add_constraint("cap", Expr::Unc(w) * Expr::Var(x), None, Some(2.0));

        reformulate(&mut m, true, false).unwrap();
        assert!(m.constraint_by_name("cap_padding_cons").unwrap().is_equality());
        assert!(m.constraint_by_name("cap_det_cons").unwrap().is_equality());
    }

    #[test]
    fn objective_counterpart_preserves_sense() {
        let (mut m, _, w) = ellipsoid_model();
        let x = m.add_var("x", 0.0, 10.0);
        let obj = m.add_objective("profit", Expr::Unc(w) * Expr::Var(x), Sense::Maximize);

        reformulate(&mut m, false, false).unwrap();
        assert!(!m.objective(obj).is_active());
        let new_obj = m.objective_by_name("profit_counterpart").unwrap();
        assert_eq!(new_obj.sense, Sense::Maximize);
        assert!(m.variable_by_name("profit_padding").is_some());
    }

    #[test]
    fn polyhedral_regions_are_left_alone() {
        let mut m = Model::new("mixed");
        let region = m.add_region("P");
        let w = m.add_unc_in("w", 1.0, region);
        m.region_mut(region)
            .add_constraint("w_range", Expr::Unc(w), Some(0.5), Some(1.5));
        let x = m.add_var("x", 0.0, 10.0);
        let cons = m.add_constraint("cap", Expr::Unc(w) * Expr::Var(x), None, Some(2.0));

        assert_eq!(reformulate(&mut m, false, false).unwrap(), 0);
        assert!(m.constraint(cons).is_active());
    }
}
