//! End-to-end ellipsoidal reformulation: second-order cone counterparts
//! with padding variables, checked against closed-form worst cases.

use anyhow::Result;
use rob_algo::{RobustError, RobustSolver, SolverError, TerminationCondition};
use rob_core::{Expr, LibraryShape, Model, Sense, UncId, VarId};

/// Axis-aligned ellipsoid (w0 - 1)^2 + (w1 - 2)^2 <= 0.25, inferred from a
/// single quadratic region constraint. sigma = 0.25 * I.
fn ball_model() -> (Model, [UncId; 2], [VarId; 2]) {
    let mut m = Model::new("ball");
    let region = m.add_region("E");
    let w0 = m.add_unc_in("w0", 1.0, region);
    let w1 = m.add_unc_in("w1", 2.0, region);
    let shape = (Expr::Unc(w0) - Expr::Const(1.0)).pow(2)
        + (Expr::Unc(w1) - Expr::Const(2.0)).pow(2);
    m.region_mut(region)
        .add_constraint("shape", shape, None, Some(0.25));
    let x0 = m.add_var("x0", 0.0, 10.0);
    let x1 = m.add_var("x1", 0.0, 10.0);
    (m, [w0, w1], [x0, x1])
}

#[test]
fn maximize_pays_the_norm_penalty() -> Result<()> {
    let (mut m, [w0, w1], [x0, x1]) = ball_model();
    let profit = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
    m.add_objective("profit", profit, Sense::Maximize);
    m.add_constraint("budget", Expr::Var(x0) + Expr::Var(x1), None, Some(4.0));

    let report = RobustSolver::new().solve(&mut m)?;
    assert_eq!(report.termination, TerminationCondition::Optimal);

    // Guaranteed profit of x is center'x - 0.5 ||x||; x1 = 4 gives
    // 8 - 0.5 * 4 = 6.
    let objective = report.objective_value.expect("optimal value");
    assert!((objective - 6.0).abs() < 1e-3, "got {objective}");
    assert!((m.var_value(x1) - 4.0).abs() < 1e-3);

    // The padding variable carries sqrt(x' sigma x) = 2.
    let padding = m.variable_by_name("profit_padding").expect("padding var");
    assert!((padding.value - 2.0).abs() < 1e-3, "got {}", padding.value);

    let new_obj = m.objective_by_name("profit_counterpart").expect("obj");
    assert_eq!(new_obj.sense, Sense::Maximize);
    Ok(())
}

#[test]
fn constraint_counterpart_binds_at_worst_case() -> Result<()> {
    let (mut m, [w0, w1], [x0, x1]) = ball_model();
    let lhs = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
    let cons = m.add_constraint("supply", lhs.clone(), Some(2.0), None);
    m.add_objective("cost", Expr::Var(x0) + Expr::Var(x1), Sense::Minimize);

    let report = RobustSolver::new().solve(&mut m)?;
    assert_eq!(report.termination, TerminationCondition::Optimal);
    assert!(!m.constraint(cons).is_active());
    assert!(m.constraint_by_name("supply_counterpart_lower").is_some());

    // The worst case of w'x over the ball is center'x - 0.5 ||x||; at the
    // optimum it binds at the lower bound.
    let x = [m.var_value(x0), m.var_value(x1)];
    let nominal = x[0] + 2.0 * x[1];
    let norm = (x[0] * x[0] + x[1] * x[1]).sqrt();
    let worst = nominal - 0.5 * norm;
    assert!((worst - 2.0).abs() < 1e-3, "worst case {worst}");
    Ok(())
}

#[test]
fn library_shape_matches_inferred_region() -> Result<()> {
    let mut m = Model::new("ball_lib");
    let region = m.add_region("E");
    let w0 = m.add_unc_in("w0", 1.0, region);
    let w1 = m.add_unc_in("w1", 2.0, region);
    m.region_mut(region).set_library(LibraryShape::Ellipsoid {
        params: vec![w0, w1],
        center: vec![1.0, 2.0],
        covariance: vec![vec![0.25, 0.0], vec![0.0, 0.25]],
    });
    let x0 = m.add_var("x0", 0.0, 10.0);
    let x1 = m.add_var("x1", 0.0, 10.0);
    let profit = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
    m.add_objective("profit", profit, Sense::Maximize);
    m.add_constraint("budget", Expr::Var(x0) + Expr::Var(x1), None, Some(4.0));

    let report = RobustSolver::new().solve(&mut m)?;
    let objective = report.objective_value.expect("optimal value");
    assert!((objective - 6.0).abs() < 1e-3, "got {objective}");
    Ok(())
}

#[test]
fn correlated_ellipsoid_center_shifts_the_nominal() -> Result<()> {
    // Cross terms in the region constraint still complete the square.
    let mut m = Model::new("tilted");
    let region = m.add_region("E");
    let w0 = m.add_unc_in("w0", 1.0, region);
    let w1 = m.add_unc_in("w1", 2.0, region);
    let d0 = Expr::Unc(w0) - Expr::Const(1.0);
    let d1 = Expr::Unc(w1) - Expr::Const(2.0);
    let shape = d0.clone().pow(2) + 0.1 * (d0 * d1.clone()) + d1.pow(2);
    m.region_mut(region)
        .add_constraint("shape", shape, None, Some(0.1));
    let x1 = m.add_var("x1", 0.0, 4.0);
    m.add_objective("profit", Expr::Unc(w1) * Expr::Var(x1), Sense::Maximize);

    let report = RobustSolver::new().solve(&mut m)?;
    // sigma_11 = 0.1 / (1 - 0.05^2); worst profit at x1 = 4 is
    // 8 - sqrt(16 * sigma_11).
    let sigma_11: f64 = 0.1 / (1.0 - 0.05 * 0.05);
    let expected = 8.0 - (16.0 * sigma_11).sqrt();
    let objective = report.objective_value.expect("optimal value");
    assert!((objective - expected).abs() < 1e-3, "got {objective}");
    Ok(())
}

#[test]
fn root_mode_is_rejected_by_the_conic_backend() {
    let (mut m, [w0, _], [x0, _]) = ball_model();
    m.add_constraint("cap", Expr::Unc(w0) * Expr::Var(x0), None, Some(2.0));
    m.add_objective("push", Expr::Var(x0), Sense::Maximize);

    match RobustSolver::new().with_root(true).solve(&mut m) {
        Err(RobustError::Solver(SolverError::NonconvexConstraint(name))) => {
            assert!(name.contains("padding_cons") || name.contains("det_cons"), "{name}");
        }
        other => panic!("expected NonconvexConstraint, got {:?}", other.map(|r| r.termination)),
    }
}
