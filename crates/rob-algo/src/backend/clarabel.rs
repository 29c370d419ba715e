//! Conic backend built on Clarabel.
//!
//! Clarabel solves `min (1/2) x'Px + q'x  s.t.  Ax + s = b, s in K`. The
//! lowering here accepts linear constraints directly and convex quadratic
//! inequalities via a second-order cone rewrite:
//!
//! * `z'Qz + a'x <= ub` with `Q = L L'` becomes
//!   `1 + t >= ||(2 L'z, 1 - t)||` with `t = ub - k - a'x`.
//! * `f(z) <= c p^2` with `p >= 0` (the padding epigraph shape) becomes
//!   `sqrt(c) p >= ||(L'z + v, sqrt(rho))||` after completing the square
//!   of the convex quadratic `f`.
//!
//! Quadratic equalities and indefinite forms are refused as nonconvex.
//! Integer and binary variables are relaxed to their continuous bounds.

use super::{DeterministicSolver, SolverResults, TerminationCondition};
use crate::error::SolverError;
use crate::linalg;
use clarabel::{
    algebra::CscMatrix,
    solver::{DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT},
};
use rob_core::{Expr, Model, Sense, VarId, VarKind};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct ClarabelSolver;

/// An expression lowered to a polynomial of degree at most two in the
/// decision variables, with numeric coefficients. Uncertain parameters
/// evaluate at their nominal value.
#[derive(Debug, Clone, Default)]
struct VarForm {
    constant: f64,
    linear: BTreeMap<VarId, f64>,
    quadratic: BTreeMap<(VarId, VarId), f64>,
}

impl VarForm {
    fn constant(value: f64) -> Self {
        Self {
            constant: value,
            ..Self::default()
        }
    }

    fn add_linear(&mut self, var: VarId, coef: f64) {
        let entry = self.linear.entry(var).or_insert(0.0);
        *entry += coef;
        if *entry == 0.0 {
            self.linear.remove(&var);
        }
    }

    fn add_quadratic(&mut self, key: (VarId, VarId), coef: f64) {
        let key = if key.0 <= key.1 { key } else { (key.1, key.0) };
        let entry = self.quadratic.entry(key).or_insert(0.0);
        *entry += coef;
        if *entry == 0.0 {
            self.quadratic.remove(&key);
        }
    }

    fn merge(&mut self, other: VarForm) {
        self.constant += other.constant;
        for (var, coef) in other.linear {
            self.add_linear(var, coef);
        }
        for (key, coef) in other.quadratic {
            self.add_quadratic(key, coef);
        }
    }

    fn negate(mut self) -> Self {
        self.constant = -self.constant;
        for coef in self.linear.values_mut() {
            *coef = -*coef;
        }
        for coef in self.quadratic.values_mut() {
            *coef = -*coef;
        }
        self
    }
}

fn var_form(model: &Model, expr: &Expr) -> Option<VarForm> {
    match expr {
        Expr::Const(c) => Some(VarForm::constant(*c)),
        Expr::Unc(u) => Some(VarForm::constant(model.unc(*u).nominal)),
        Expr::Var(v) => {
            let mut form = VarForm::default();
            form.linear.insert(*v, 1.0);
            Some(form)
        }
        Expr::Sum(terms) => {
            let mut acc = VarForm::default();
            for term in terms {
                acc.merge(var_form(model, term)?);
            }
            Some(acc)
        }
        Expr::Prod(a, b) => multiply(var_form(model, a)?, var_form(model, b)?),
        Expr::Pow(base, k) => {
            if !base.contains_var() {
                return Some(VarForm::constant(model.eval(expr)));
            }
            match k {
                0 => Some(VarForm::constant(1.0)),
                1 => var_form(model, base),
                2 => {
                    let form = var_form(model, base)?;
                    multiply(form.clone(), form)
                }
                _ => None,
            }
        }
        Expr::Unary(_, inner) => {
            if inner.contains_var() {
                None
            } else {
                Some(VarForm::constant(model.eval(expr)))
            }
        }
    }
}

fn multiply(a: VarForm, b: VarForm) -> Option<VarForm> {
    if (!a.quadratic.is_empty() && !(b.linear.is_empty() && b.quadratic.is_empty()))
        || (!b.quadratic.is_empty() && !(a.linear.is_empty() && a.quadratic.is_empty()))
    {
        return None;
    }

    let mut out = VarForm::constant(a.constant * b.constant);
    for (var, coef) in &a.linear {
        out.add_linear(*var, coef * b.constant);
    }
    for (var, coef) in &b.linear {
        out.add_linear(*var, coef * a.constant);
    }
    for (va, ca) in &a.linear {
        for (vb, cb) in &b.linear {
            out.add_quadratic((*va, *vb), ca * cb);
        }
    }
    for (key, coef) in &a.quadratic {
        out.add_quadratic(*key, coef * b.constant);
    }
    for (key, coef) in &b.quadratic {
        out.add_quadratic(*key, coef * a.constant);
    }
    Some(out)
}

/// One row of `Ax + s = b`: sparse coefficients plus right-hand side.
type Row = (Vec<(usize, f64)>, f64);

/// Lower a quadratic inequality `form <= ub` to second-order cone rows.
fn soc_rows(model: &Model, name: &str, form: &VarForm, ub: f64) -> Result<Vec<Row>, SolverError> {
    let zvars: Vec<VarId> = form
        .quadratic
        .keys()
        .flat_map(|(i, j)| [*i, *j])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let nz = zvars.len();
    let index_of = |v: VarId| zvars.iter().position(|z| *z == v);

    let mut q = vec![vec![0.0; nz]; nz];
    for ((vi, vj), coef) in &form.quadratic {
        let (i, j) = match (index_of(*vi), index_of(*vj)) {
            (Some(i), Some(j)) => (i, j),
            _ => unreachable!("quadratic keys seed the variable list"),
        };
        if i == j {
            q[i][i] += coef;
        } else {
            q[i][j] += coef / 2.0;
            q[j][i] += coef / 2.0;
        }
    }

    let nonconvex = || SolverError::NonconvexConstraint(name.to_string());
    let negative_diags: Vec<usize> = (0..nz).filter(|&i| q[i][i] < 0.0).collect();

    if let [pi] = negative_diags.as_slice() {
        // Padding epigraph shape: f(z) <= c p^2 with p >= 0 and f convex
        // quadratic. Completing the square, f(z) = ||L'z + v||^2 + rho,
        // this is the cone sqrt(c) p >= ||(L'z + v, sqrt(rho))||.
        let pi = *pi;
        let p_var = zvars[pi];
        let c = -q[pi][pi];
        let separable = (0..nz).all(|j| j == pi || q[pi][j] == 0.0);
        let linear_in_scope = form
            .linear
            .keys()
            .all(|v| *v != p_var && zvars.contains(v));
        if !(separable && linear_in_scope && model.var(p_var).lower >= 0.0) {
            return Err(nonconvex());
        }

        let rest: Vec<usize> = (0..nz).filter(|&i| i != pi).collect();
        let rest_mat: Vec<Vec<f64>> = rest
            .iter()
            .map(|&i| rest.iter().map(|&j| q[i][j]).collect())
            .collect();
        let l = linalg::cholesky_psd(&rest_mat).ok_or_else(nonconvex)?;
        let half_lin: Vec<f64> = rest
            .iter()
            .map(|&i| form.linear.get(&zvars[i]).copied().unwrap_or(0.0) / 2.0)
            .collect();
        let v = linalg::forward_substitute(&l, &half_lin).ok_or_else(nonconvex)?;
        let mut rho = (form.constant - ub) - v.iter().map(|x| x * x).sum::<f64>();
        let tol = 1e-9 * (1.0 + form.constant.abs() + ub.abs());
        if rho < -tol {
            return Err(nonconvex());
        }
        rho = rho.max(0.0);

        let mut rows = Vec::with_capacity(2 + rest.len());
        rows.push((vec![(p_var.index(), -c.sqrt())], 0.0));
        for i in 0..rest.len() {
            let mut coeffs = Vec::new();
            for (j, &zi) in rest.iter().enumerate() {
                // Row i of L' is column i of L.
                if l[j][i] != 0.0 {
                    coeffs.push((zvars[zi].index(), -l[j][i]));
                }
            }
            rows.push((coeffs, v[i]));
        }
        if rho > 0.0 {
            rows.push((Vec::new(), rho.sqrt()));
        }
        return Ok(rows);
    }
    if !negative_diags.is_empty() {
        return Err(nonconvex());
    }

    // Convex quadratic: z'Qz + a'x + k <= ub, Q = L L'.
    let l = linalg::cholesky_psd(&q).ok_or_else(nonconvex)?;
    let slack = ub - form.constant;
    let a_coeffs: Vec<(usize, f64)> = form
        .linear
        .iter()
        .map(|(v, coef)| (v.index(), *coef))
        .collect();

    let mut rows = Vec::with_capacity(2 + nz);
    rows.push((a_coeffs.clone(), 1.0 + slack));
    for i in 0..nz {
        let mut coeffs = Vec::new();
        for (j, z) in zvars.iter().enumerate() {
            if l[j][i] != 0.0 {
                coeffs.push((z.index(), -2.0 * l[j][i]));
            }
        }
        rows.push((coeffs, 0.0));
    }
    rows.push((
        a_coeffs.iter().map(|&(col, v)| (col, -v)).collect(),
        1.0 - slack,
    ));
    Ok(rows)
}

fn csc_from_columns(m: usize, n: usize, mut cols: Vec<Vec<(usize, f64)>>) -> CscMatrix<f64> {
    let mut col_ptr = Vec::with_capacity(n + 1);
    let mut row_idx = Vec::new();
    let mut values = Vec::new();
    for col in cols.iter_mut() {
        col_ptr.push(row_idx.len());
        col.sort_by_key(|(r, _)| *r);
        for &(r, v) in col.iter() {
            row_idx.push(r);
            values.push(v);
        }
    }
    col_ptr.push(row_idx.len());
    CscMatrix::new(m, n, col_ptr, row_idx, values)
}

impl DeterministicSolver for ClarabelSolver {
    fn name(&self) -> &'static str {
        "clarabel"
    }

    fn solve(
        &self,
        model: &mut Model,
        tee: bool,
        timelimit: Option<f64>,
    ) -> Result<SolverResults, SolverError> {
        let objective = model
            .active_objective()
            .cloned()
            .ok_or_else(|| SolverError::Setup("model has no active objective".to_string()))?;
        let n = model.variables().len();

        if model
            .variables()
            .iter()
            .any(|v| v.kind != VarKind::Continuous)
        {
            tracing::warn!(
                model = %model.name,
                "integer and binary variables are relaxed to their continuous bounds"
            );
        }

        // === Objective: (1/2) x'Px + q'x, negated for maximization ===

        let obj_form = var_form(model, &objective.expr)
            .ok_or_else(|| SolverError::NonlinearConstraint(objective.name.clone()))?;
        let obj_scale = match objective.sense {
            Sense::Minimize => 1.0,
            Sense::Maximize => -1.0,
        };

        let mut p_cols: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        if !obj_form.quadratic.is_empty() {
            let qvars: Vec<VarId> = obj_form
                .quadratic
                .keys()
                .flat_map(|(i, j)| [*i, *j])
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let pos = |v: VarId| qvars.iter().position(|q| *q == v);
            let mut dense = vec![vec![0.0; qvars.len()]; qvars.len()];
            for ((vi, vj), coef) in &obj_form.quadratic {
                let (i, j) = match (pos(*vi), pos(*vj)) {
                    (Some(i), Some(j)) => (i, j),
                    _ => unreachable!("quadratic keys seed the variable list"),
                };
                let c = obj_scale * coef;
                if i == j {
                    dense[i][i] += c;
                } else {
                    dense[i][j] += c / 2.0;
                    dense[j][i] += c / 2.0;
                }
            }
            if linalg::cholesky_psd(&dense).is_none() {
                return Err(SolverError::NonconvexConstraint(objective.name.clone()));
            }
            for ((vi, vj), coef) in &obj_form.quadratic {
                let c = obj_scale * coef;
                let (i, j) = (vi.index().min(vj.index()), vi.index().max(vj.index()));
                // Upper triangle, with the diagonal doubled for the 1/2 factor.
                let value = if i == j { 2.0 * c } else { c };
                p_cols[j].push((i, value));
            }
        }
        let p_mat = csc_from_columns(n, n, p_cols);

        let mut q = vec![0.0f64; n];
        for (var, coef) in &obj_form.linear {
            q[var.index()] = obj_scale * coef;
        }

        // === Constraints: equalities, inequalities, then cone blocks ===

        let mut eq_rows: Vec<Row> = Vec::new();
        let mut ineq_rows: Vec<Row> = Vec::new();
        let mut soc_blocks: Vec<Vec<Row>> = Vec::new();

        for cons in model.constraints().iter().filter(|c| c.is_active()) {
            let form = var_form(model, &cons.expr)
                .ok_or_else(|| SolverError::NonlinearConstraint(cons.name.clone()))?;

            if form.quadratic.is_empty() {
                let coeffs: Vec<(usize, f64)> = form
                    .linear
                    .iter()
                    .map(|(v, coef)| (v.index(), *coef))
                    .collect();
                if cons.is_equality() {
                    // lower == upper by is_equality
                    let rhs = cons.lower.unwrap_or(0.0) - form.constant;
                    eq_rows.push((coeffs, rhs));
                    continue;
                }
                if let Some(upper) = cons.upper {
                    ineq_rows.push((coeffs.clone(), upper - form.constant));
                }
                if let Some(lower) = cons.lower {
                    ineq_rows.push((
                        coeffs.iter().map(|&(col, v)| (col, -v)).collect(),
                        form.constant - lower,
                    ));
                }
                continue;
            }

            // Quadratic: only one-sided inequalities are conic-representable.
            let (qform, ub) = match (cons.lower, cons.upper) {
                (Some(_), Some(_)) => {
                    return Err(SolverError::NonconvexConstraint(cons.name.clone()));
                }
                (None, Some(upper)) => (form, upper),
                (Some(lower), None) => (form.negate(), -lower),
                (None, None) => continue,
            };
            soc_blocks.push(soc_rows(model, &cons.name, &qform, ub)?);
        }

        for var in model.variables() {
            if var.upper.is_finite() {
                ineq_rows.push((vec![(var.id.index(), 1.0)], var.upper));
            }
            if var.lower.is_finite() {
                ineq_rows.push((vec![(var.id.index(), -1.0)], -var.lower));
            }
        }

        // === Assemble Ax + s = b with the cone layout matching row order ===

        let mut cols: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut rhs: Vec<f64> = Vec::new();
        let mut cones: Vec<SupportedConeT<f64>> = Vec::new();

        let push_rows = |rows: &[Row], cols: &mut Vec<Vec<(usize, f64)>>, rhs: &mut Vec<f64>| {
            for (coeffs, b) in rows {
                let r = rhs.len();
                for &(col, val) in coeffs {
                    cols[col].push((r, val));
                }
                rhs.push(*b);
            }
        };

        push_rows(&eq_rows, &mut cols, &mut rhs);
        if !eq_rows.is_empty() {
            cones.push(SupportedConeT::ZeroConeT(eq_rows.len()));
        }
        push_rows(&ineq_rows, &mut cols, &mut rhs);
        if !ineq_rows.is_empty() {
            cones.push(SupportedConeT::NonnegativeConeT(ineq_rows.len()));
        }
        for block in &soc_blocks {
            push_rows(block, &mut cols, &mut rhs);
            cones.push(SupportedConeT::SecondOrderConeT(block.len()));
        }

        let a_mat = csc_from_columns(rhs.len(), n, cols);

        // === Solve ===

        let mut builder = DefaultSettingsBuilder::default();
        builder.verbose(tee);
        if let Some(limit) = timelimit {
            builder.time_limit(limit);
        }
        let settings = builder
            .build()
            .map_err(|e| SolverError::Setup(format!("settings error: {:?}", e)))?;

        let mut solver = DefaultSolver::new(&p_mat, &q, &a_mat, &rhs, &cones, settings)
            .map_err(|e| SolverError::Setup(format!("initialization failed: {:?}", e)))?;
        solver.solve();
        let sol = solver.solution;

        let termination = match sol.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => TerminationCondition::Optimal,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                TerminationCondition::Infeasible
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                TerminationCondition::Unbounded
            }
            SolverStatus::MaxIterations => TerminationCondition::MaxIterations,
            SolverStatus::MaxTime => TerminationCondition::MaxTimeLimit,
            _ => TerminationCondition::Error,
        };
        tracing::debug!(
            model = %model.name,
            status = ?sol.status,
            iterations = sol.iterations,
            "clarabel solve finished"
        );

        let objective_value = if termination == TerminationCondition::Optimal {
            for i in 0..n {
                model.set_var_value(VarId::new(i), sol.x[i]);
            }
            Some(obj_scale * sol.obj_val + obj_form.constant)
        } else {
            None
        };

        Ok(SolverResults {
            termination,
            objective_value,
            cpu_time: Some(sol.solve_time),
            iterations: sol.iterations as usize,
        })
    }
}
