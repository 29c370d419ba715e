//! Cutting-plane meta-solver: lazy enforcement with an exact separation
//! oracle, and the unclassified-region fallback from the reformulation
//! strategy.

use anyhow::Result;
use rob_algo::{RobustSolver, Strategy, TerminationCondition};
use rob_core::{Expr, Model, Sense, UncId, VarId};

fn box_model() -> (Model, [UncId; 2], [VarId; 2]) {
    let mut m = Model::new("demand");
    let region = m.add_region("P");
    let w0 = m.add_unc_in("w0", 1.0, region);
    let w1 = m.add_unc_in("w1", 2.0, region);
    m.region_mut(region)
        .add_constraint("w0_range", Expr::Unc(w0), Some(0.5), Some(1.5));
    m.region_mut(region)
        .add_constraint("w1_range", Expr::Unc(w1), Some(1.5), Some(2.5));
    let x0 = m.add_var("x0", 0.0, 10.0);
    let x1 = m.add_var("x1", 0.0, 10.0);
    (m, [w0, w1], [x0, x1])
}

#[test]
fn cuts_converge_to_the_reformulation_optimum() -> Result<()> {
    let (mut m, [w0, w1], [x0, x1]) = box_model();
    let lhs = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
    let cons = m.add_constraint("supply", lhs.clone(), Some(2.0), None);
    m.add_objective("cost", Expr::Var(x0) + Expr::Var(x1), Sense::Minimize);

    let report = RobustSolver::new()
        .with_strategy(Strategy::CuttingPlane)
        .solve(&mut m)?;
    assert_eq!(report.termination, TerminationCondition::Optimal);
    assert!(report.cuts_added >= 1);
    assert!(report.master_solves >= 2);

    // Same optimum as the dual reformulation: x1 = 4/3 against w = (·, 1.5).
    let objective = report.objective_value.expect("optimal value");
    assert!((objective - 4.0 / 3.0).abs() < 1e-4, "got {objective}");

    // The nominal seed and at least one separation cut are in the model.
    assert!(!m.constraint(cons).is_active());
    assert!(m.constraint_by_name("supply_nominal").is_some());
    assert!(m.constraint_by_name("supply_cut_0").is_some());

    // Robust on a grid over the region.
    for i in 0..=4 {
        for j in 0..=4 {
            let w = [0.5 + 0.25 * i as f64, 1.5 + 0.25 * j as f64];
            let value = lhs.eval(&|v| m.var_value(v), &|u| {
                if u == w0 {
                    w[0]
                } else {
                    w[1]
                }
            });
            assert!(value >= 2.0 - 1e-4, "violated at w = {w:?}: {value}");
        }
    }
    Ok(())
}

#[test]
fn uncertain_objective_goes_through_the_epigraph() -> Result<()> {
    let (mut m, [w0, w1], [x0, x1]) = box_model();
    let profit = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
    m.add_objective("profit", profit, Sense::Maximize);
    m.add_constraint("budget", Expr::Var(x0) + Expr::Var(x1), None, Some(4.0));

    let report = RobustSolver::new()
        .with_strategy(Strategy::CuttingPlane)
        .solve(&mut m)?;
    assert_eq!(report.termination, TerminationCondition::Optimal);

    // Worst-case profit matches the polyhedral counterpart: 6 at x1 = 4.
    let objective = report.objective_value.expect("optimal value");
    assert!((objective - 6.0).abs() < 1e-4, "got {objective}");
    assert!(m.variable_by_name("profit_epigraph").is_some());
    assert!(report.cuts_added >= 1);
    Ok(())
}

#[test]
fn unclassified_region_falls_back_to_cuts_when_ignored() -> Result<()> {
    // A quadratic plus an affine region constraint is neither polyhedral
    // nor ellipsoidal for the classifier, but the oracle optimizes over it.
    let mut m = Model::new("mixed_region");
    let region = m.add_region("U");
    let w = m.add_unc_in("w", 1.0, region);
    let shape = (Expr::Unc(w) - Expr::Const(1.0)).pow(2);
    m.region_mut(region)
        .add_constraint("ball", shape, None, Some(0.04));
    m.region_mut(region)
        .add_constraint("floor", Expr::Unc(w), Some(0.85), None);

    let x = m.add_var("x", 0.0, 10.0);
    m.add_constraint("supply", Expr::Unc(w) * Expr::Var(x), Some(2.0), None);
    m.add_objective("cost", Expr::Var(x), Sense::Minimize);

    let report = RobustSolver::new()
        .with_ignore_unknown(true)
        .solve(&mut m)?;
    assert_eq!(report.strategy, Strategy::Reformulation);
    assert_eq!(report.termination, TerminationCondition::Optimal);
    assert!(report.cuts_added >= 1);

    // Worst case is w = 0.85 (the floor cuts into the ball's [0.8, 1.2]).
    let objective = report.objective_value.expect("optimal value");
    assert!((objective - 2.0 / 0.85).abs() < 1e-3, "got {objective}");
    Ok(())
}

#[test]
fn round_limit_reports_max_iterations() -> Result<()> {
    let (mut m, [w0, w1], [x0, x1]) = box_model();
    let lhs = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
    m.add_constraint("supply", lhs, Some(2.0), None);
    m.add_objective("cost", Expr::Var(x0) + Expr::Var(x1), Sense::Minimize);

    let report = RobustSolver::new()
        .with_strategy(Strategy::CuttingPlane)
        .with_max_cut_rounds(1)
        .solve(&mut m)?;
    assert_eq!(report.termination, TerminationCondition::MaxIterations);
    assert!(report.objective_value.is_none());
    assert_eq!(report.master_solves, 1);
    Ok(())
}

#[test]
fn report_counts_time_and_sizes() -> Result<()> {
    let (mut m, [w0, w1], [x0, x1]) = box_model();
    let lhs = Expr::Unc(w0) * Expr::Var(x0) + Expr::Unc(w1) * Expr::Var(x1);
    m.add_constraint("supply", lhs, Some(2.0), None);
    m.add_objective("cost", Expr::Var(x0) + Expr::Var(x1), Sense::Minimize);

    let report = RobustSolver::new()
        .with_strategy(Strategy::CuttingPlane)
        .solve(&mut m)?;
    assert_eq!(report.solver_name, "clarabel");
    assert!(report.wall_time >= 0.0);

    // cpu_time sums master and separation-subproblem solves alike, so with
    // cuts in play it must cover more solves than the masters alone.
    assert!(report.cuts_added >= 1);
    let cpu_time = report.cpu_time.expect("backend reports solve times");
    assert!(cpu_time > 0.0);
    assert!(cpu_time <= report.wall_time);

    assert_eq!(report.statistics.number_of_uncertain_parameters, 2);
    assert!(report.statistics.number_of_constraints > 1);
    Ok(())
}
