//! Polyhedral robust counterparts via linear-programming duality.
//!
//! Over a polyhedral region `{w : Aw <= b}`, the worst case of an affine
//! expression `c(x) + sum_i a_i(x) w_i` equals
//! `c(x) + min { b'y : A'y = a(x), y >= 0 }` by LP duality. The robust
//! upper bound therefore becomes a joint linear constraint over the
//! original variables and the fresh dual variables; lower bounds dualize
//! the negated coefficient vector.

use super::{collect_targets, region_of, Target};
use crate::error::RobustError;
use crate::geometry::{classify, RegionGeometry};
use crate::structure::{decompose, UncDecomp};
use rob_core::{
    ConsId, CounterpartRecord, CounterpartSource, Expr, Model, Sense, UncId, VarId,
};

/// Replace every active polyhedral-region component with its deterministic
/// counterpart. Returns the number of components reformulated.
pub fn reformulate(model: &mut Model, ignore_unknown: bool) -> Result<usize, RobustError> {
    let mut reformulated = 0;

    for target in collect_targets(model) {
        let region = region_of(model, target.name(), target.expr())?;
        let poly = match classify(model, region)? {
            RegionGeometry::Polyhedral(p) => p,
            RegionGeometry::Ellipsoidal(_) => continue,
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

        // Columns of A, indexed like `params`. Parameters the region never
        // constrains still get a coupling row, which forces their
        // coefficient to zero (the dual of an unbounded direction).
        let mut params = poly.params.clone();
        for param in decomp.linear.keys() {
            if !params.contains(param) {
                params.push(*param);
            }
        }
        let mut col_terms: Vec<Vec<(usize, f64)>> = vec![Vec::new(); params.len()];
        for (r, row) in poly.a.outer_iterator().enumerate() {
            for (i, &val) in row.iter() {
                col_terms[i].push((r, val));
            }
        }

        match target {
            Target::Constraint {
                id,
                name,
                lower,
                upper,
                ..
            } => {
                let mut constraints = Vec::new();
                let mut variables = Vec::new();

                if let Some(ub) = upper {
                    let (duals, coupling, value) = dual_block(
                        model,
                        &name,
                        Some("upper"),
                        &col_terms,
                        &poly.b,
                        &params,
                        &decomp,
                        false,
                    );
                    let counterpart = model.add_constraint(
                        format!("{name}_counterpart_upper"),
                        decomp.constant.clone() + value,
                        None,
                        Some(ub),
                    );
                    variables.extend(duals);
                    constraints.extend(coupling);
                    constraints.push(counterpart);
                }
                if let Some(lb) = lower {
                    let (duals, coupling, value) = dual_block(
                        model,
                        &name,
                        Some("lower"),
                        &col_terms,
                        &poly.b,
                        &params,
                        &decomp,
                        true,
                    );
                    let counterpart = model.add_constraint(
                        format!("{name}_counterpart_lower"),
                        decomp.constant.clone() - value,
                        Some(lb),
                        None,
                    );
                    variables.extend(duals);
                    constraints.extend(coupling);
                    constraints.push(counterpart);
                }

                model.deactivate_constraint(id);
                model.record_counterpart(CounterpartRecord {
                    original: CounterpartSource::Constraint(id),
                    constraints,
                    variables,
                    objective: None,
                });
            }
            Target::Objective {
                id, name, sense, ..
            } => {
                let negate = sense == Sense::Maximize;
                let (duals, coupling, value) = dual_block(
                    model,
                    &name,
                    None,
                    &col_terms,
                    &poly.b,
                    &params,
                    &decomp,
                    negate,
                );
                let expr = if negate {
                    decomp.constant.clone() - value
                } else {
                    decomp.constant.clone() + value
                };
                let objective = model.add_objective(format!("{name}_new"), expr, sense);

                model.deactivate_objective(id);
                model.record_counterpart(CounterpartRecord {
                    original: CounterpartSource::Objective(id),
                    constraints: coupling,
                    variables: duals,
                    objective: Some(objective),
                });
            }
        }

        reformulated += 1;
    }

    if reformulated > 0 {
        tracing::debug!(count = reformulated, "built polyhedral counterparts");
    }
    Ok(reformulated)
}

/// Add one dual-variable block: nonnegative duals, the coupling equalities
/// `A'y = a(x)` (or `A'y = -a(x)` when `negate_a`), and the dual objective
/// value `b'y`.
#[allow(clippy::too_many_arguments)]
fn dual_block(
    model: &mut Model,
    base: &str,
    side: Option<&str>,
    col_terms: &[Vec<(usize, f64)>],
    b: &[f64],
    params: &[UncId],
    decomp: &UncDecomp,
    negate_a: bool,
) -> (Vec<VarId>, Vec<ConsId>, Expr) {
    let duals: Vec<VarId> = (0..b.len())
        .map(|r| {
            let name = match side {
                Some(s) => format!("{base}_dual_{s}_{r}"),
                None => format!("{base}_dual_{r}"),
            };
            model.add_var(name, 0.0, f64::INFINITY)
        })
        .collect();

    let mut coupling = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let mut expr = Expr::zero();
        for &(r, val) in &col_terms[i] {
            expr = expr + Expr::Const(val) * Expr::Var(duals[r]);
        }
        let coef = decomp.coefficient(*param);
        expr = if negate_a { expr + coef } else { expr - coef };
        let name = match side {
            Some(s) => format!("{base}_dual_cons_{s}_{i}"),
            None => format!("{base}_counterpart_{i}"),
        };
        coupling.push(model.add_constraint(name, expr, Some(0.0), Some(0.0)));
    }

    let value = Expr::sum(
        b.iter()
            .zip(&duals)
            .map(|(&bi, &y)| Expr::Const(bi) * Expr::Var(y)),
    );
    (duals, coupling, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rob_core::ComponentState;

    #[test]
    fn upper_bound_constraint_gets_dual_counterpart() {
        let mut m = Model::new("poly");
        let region = m.add_region("P");
        let w = m.add_unc_in("w", 1.0, region);
        m.region_mut(region)
            .add_constraint("w_range", Expr::Unc(w), Some(0.5), Some(1.5));
        let x = m.add_var("x", 0.0, 10.0);
        let cons = m.add_constraint("cap", Expr::Unc(w) * Expr::Var(x), None, Some(2.0));

        let count = reformulate(&mut m, false).unwrap();
        assert_eq!(count, 1);
        assert_eq!(m.constraint(cons).state, ComponentState::Reformulated);

        let counterpart = m.constraint_by_name("cap_counterpart_upper").unwrap();
        assert_eq!(counterpart.upper, Some(2.0));
        // Two region rows (upper and lower bound on w) give two duals.
        assert!(m.variable_by_name("cap_dual_upper_0").is_some());
        assert!(m.variable_by_name("cap_dual_upper_1").is_some());
        assert!(m.variable_by_name("cap_dual_upper_2").is_none());
        assert!(m.constraint_by_name("cap_dual_cons_upper_0").is_some());

        let record = m
            .counterpart_of(CounterpartSource::Constraint(cons))
            .unwrap();
        assert_eq!(record.variables.len(), 2);
        assert_eq!(record.constraints.len(), 2);
    }

    #[test]
    fn objective_is_replaced_in_same_sense() {
        let mut m = Model::new("poly_obj");
        let region = m.add_region("P");
        let w = m.add_unc_in("w", 1.0, region);
        m.region_mut(region)
            .add_constraint("w_range", Expr::Unc(w), Some(0.5), Some(1.5));
        let x = m.add_var("x", 0.0, 10.0);
        let obj = m.add_objective("profit", Expr::Unc(w) * Expr::Var(x), Sense::Maximize);

        reformulate(&mut m, false).unwrap();
        assert!(!m.objective(obj).is_active());
        let new_obj = m.objective_by_name("profit_new").unwrap();
        assert_eq!(new_obj.sense, Sense::Maximize);
        assert!(new_obj.is_active());
    }

    #[test]
    fn unknown_geometry_errors_unless_ignored() {
        let mut m = Model::new("poly_unknown");
        let region = m.add_region("Uodd");
        let w = m.add_unc_in("w", 1.0, region);
        m.region_mut(region)
            .add_constraint("quartic", Expr::Unc(w).pow(4), None, Some(1.0));
        let x = m.add_var("x", 0.0, 10.0);
        m.add_constraint("cap", Expr::Unc(w) * Expr::Var(x), None, Some(2.0));

        match reformulate(&mut m, false) {
            Err(RobustError::UnreformulableGeometry { region }) => {
                assert_eq!(region, "Uodd");
            }
            other => panic!("expected UnreformulableGeometry, got {:?}", other),
        }
        assert_eq!(reformulate(&mut m, true).unwrap(), 0);
    }
}
