//! Cutting-plane generation with an exact separation oracle.
//!
//! A cut generator replaces one uncertain constraint or objective. The
//! component is deactivated and re-enforced lazily: at each master solution
//! the oracle maximizes (or minimizes) the component expression over its
//! uncertainty region, and if the worst case violates the bound a new
//! deterministic cut is added at that realization. Uncertain objectives go
//! through an epigraph variable first so cuts stay linear constraints.
//!
//! Every generator seeds one cut at the nominal realization so the first
//! master problem is bounded.

use crate::backend::{DeterministicSolver, TerminationCondition};
use crate::error::{RobustError, SolverError};
use crate::linalg;
use crate::reformulate::Target;
use crate::structure::decompose;
use rob_core::{
    ConsId, CounterpartRecord, CounterpartSource, Expr, LibraryShape, Model, ObjId, RegionId,
    Sense, UncId, VarId,
};
use std::collections::BTreeMap;

/// Outcome of one separation round for one generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Separation {
    /// The component holds at its worst case within tolerance.
    Feasible,
    /// A violated realization was found and a cut was added.
    CutAdded { violation: f64 },
}

/// Lazy enforcement of one uncertain component.
#[derive(Debug)]
pub struct CutGenerator {
    source: CounterpartSource,
    name: String,
    expr: Expr,
    lower: Option<f64>,
    upper: Option<f64>,
    /// Epigraph variable standing in for an uncertain objective.
    epigraph: Option<(VarId, Sense)>,
    region: RegionId,
    tolerance: f64,
    cuts: usize,
    /// Backend-reported seconds accumulated over separation subproblems.
    oracle_time: Option<f64>,
}

impl CutGenerator {
    /// Take over enforcement of an uncertain constraint.
    pub fn for_constraint(
        model: &mut Model,
        id: ConsId,
        tolerance: f64,
    ) -> Result<Self, RobustError> {
        let cons = model.constraint(id);
        let target = Target::Constraint {
            id,
            name: cons.name.clone(),
            expr: cons.expr.clone(),
            lower: cons.lower,
            upper: cons.upper,
        };
        Self::from_target(model, target, tolerance)
    }

    /// Take over enforcement of an uncertain objective via its epigraph.
    pub fn for_objective(
        model: &mut Model,
        id: ObjId,
        tolerance: f64,
    ) -> Result<Self, RobustError> {
        let obj = model.objective(id);
        let target = Target::Objective {
            id,
            name: obj.name.clone(),
            expr: obj.expr.clone(),
            sense: obj.sense,
        };
        Self::from_target(model, target, tolerance)
    }

    pub(crate) fn from_target(
        model: &mut Model,
        target: Target,
        tolerance: f64,
    ) -> Result<Self, RobustError> {
        let region = crate::reformulate::region_of(model, target.name(), target.expr())?;
        if model.region(region).is_empty() {
            return Err(RobustError::EmptyUncertaintySet {
                region: model.region(region).name.clone(),
            });
        }
        if decompose(target.expr()).is_none() {
            return Err(RobustError::UnsupportedDependence {
                constraint: target.name().to_string(),
            });
        }

        let mut generator = match target {
            Target::Constraint {
                id,
                name,
                expr,
                lower,
                upper,
            } => {
                model.deactivate_constraint(id);
                Self {
                    source: CounterpartSource::Constraint(id),
                    name,
                    expr,
                    lower,
                    upper,
                    epigraph: None,
                    region,
                    tolerance,
                    cuts: 0,
                    oracle_time: None,
                }
            }
            Target::Objective {
                id,
                name,
                expr,
                sense,
            } => {
                let epigraph = model.add_var(
                    format!("{name}_epigraph"),
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                );
                model.add_objective(format!("{name}_new"), Expr::Var(epigraph), sense);
                model.deactivate_objective(id);
                // For a minimization, the epigraph bounds the expression
                // from above; cuts are `expr(w) <= t`, i.e. upper cuts.
                let (lower, upper) = match sense {
                    Sense::Minimize => (None, Some(0.0)),
                    Sense::Maximize => (Some(0.0), None),
                };
                Self {
                    source: CounterpartSource::Objective(id),
                    name,
                    expr,
                    lower,
                    upper,
                    epigraph: Some((epigraph, sense)),
                    region,
                    tolerance,
                    cuts: 0,
                    oracle_time: None,
                }
            }
        };

        let variables = match generator.epigraph {
            Some((var, _)) => vec![var],
            None => Vec::new(),
        };
        model.record_counterpart(CounterpartRecord {
            original: generator.source,
            constraints: Vec::new(),
            variables,
            objective: None,
        });

        // Seed with the nominal realization so the first master is bounded.
        let nominal: BTreeMap<UncId, f64> = generator
            .expr
            .unc_params()
            .into_iter()
            .map(|u| (u, model.unc(u).nominal))
            .collect();
        let seed = format!("{}_nominal", generator.name);
        generator.add_cut(model, seed, &nominal, generator.lower, generator.upper);
        Ok(generator)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cuts added by separation, not counting the nominal seed.
    pub fn cuts_added(&self) -> usize {
        self.cuts
    }

    /// Backend-reported seconds spent in this generator's separation
    /// subproblems; `None` until a subproblem reports a time.
    pub fn oracle_time(&self) -> Option<f64> {
        self.oracle_time
    }

    /// Check the component at the current variable values and add a cut at
    /// the most violating realization if one exists.
    pub fn separate(
        &mut self,
        model: &mut Model,
        solver: &dyn DeterministicSolver,
        tee: bool,
        timelimit: Option<f64>,
    ) -> Result<Separation, RobustError> {
        let mut worst_violation = 0.0f64;

        if let Some(ub) = self.upper {
            let bound = self.effective_bound(model, ub);
            let (value, realization) = self.worst_case(model, solver, true, tee, timelimit)?;
            if value > bound + self.tolerance {
                let name = format!("{}_cut_{}", self.name, self.cuts);
                self.add_cut(model, name, &realization, None, self.upper);
                self.cuts += 1;
                worst_violation = worst_violation.max(value - bound);
            }
        }
        if let Some(lb) = self.lower {
            let bound = self.effective_bound(model, lb);
            let (value, realization) = self.worst_case(model, solver, false, tee, timelimit)?;
            if value < bound - self.tolerance {
                let name = format!("{}_cut_{}", self.name, self.cuts);
                self.add_cut(model, name, &realization, self.lower, None);
                self.cuts += 1;
                worst_violation = worst_violation.max(bound - value);
            }
        }

        if worst_violation > 0.0 {
            tracing::debug!(
                component = %self.name,
                violation = worst_violation,
                cuts = self.cuts,
                "added separation cut"
            );
            Ok(Separation::CutAdded {
                violation: worst_violation,
            })
        } else {
            Ok(Separation::Feasible)
        }
    }

    /// The bound a worst-case value is compared against: the stored bound
    /// for constraints, the current epigraph value for objectives.
    fn effective_bound(&self, model: &Model, stored: f64) -> f64 {
        match self.epigraph {
            Some((var, _)) => model.var_value(var),
            None => stored,
        }
    }

    /// Solve the separation subproblem: optimize the component expression
    /// over the uncertainty region at the current variable values.
    fn worst_case(
        &mut self,
        model: &Model,
        solver: &dyn DeterministicSolver,
        maximize: bool,
        tee: bool,
        timelimit: Option<f64>,
    ) -> Result<(f64, BTreeMap<UncId, f64>), RobustError> {
        let decomp = decompose(&self.expr).ok_or_else(|| RobustError::UnsupportedDependence {
            constraint: self.name.clone(),
        })?;
        let region = model.region(self.region);

        // Every parameter the region or the expression mentions becomes a
        // decision variable of the subproblem.
        let mut params: Vec<UncId> = self.expr.unc_params().into_iter().collect();
        for rc in region.constraints() {
            for p in rc.expr.unc_params() {
                if !params.contains(&p) {
                    params.push(p);
                }
            }
        }
        if let Some(shape) = region.library() {
            let shape_params: Vec<UncId> = match shape {
                LibraryShape::Box { bounds } => bounds.iter().map(|(u, _, _)| *u).collect(),
                LibraryShape::Ellipsoid { params, .. } => params.clone(),
            };
            for p in shape_params {
                if !params.contains(&p) {
                    params.push(p);
                }
            }
        }

        let mut sub = Model::new(format!("{}_separation", self.name));
        let mut map: BTreeMap<UncId, VarId> = BTreeMap::new();
        for p in &params {
            let bounds = match region.library() {
                Some(LibraryShape::Box { bounds }) => bounds
                    .iter()
                    .find(|(u, _, _)| u == p)
                    .map(|(_, lo, hi)| (*lo, *hi)),
                _ => None,
            };
            let (lo, hi) = bounds.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
            map.insert(*p, sub.add_var(model.unc(*p).name.clone(), lo, hi));
        }
        let as_var = |u: UncId| map.get(&u).map(|v| Expr::Var(*v));

        for rc in region.constraints() {
            sub.add_constraint(
                rc.name.clone(),
                rc.expr.substitute_unc(&as_var),
                rc.lower,
                rc.upper,
            );
        }
        if let Some(LibraryShape::Ellipsoid {
            params: eparams,
            center,
            covariance,
        }) = region.library()
        {
            let inv = linalg::invert(covariance).ok_or_else(|| {
                RobustError::UnreformulableGeometry {
                    region: region.name.clone(),
                }
            })?;
            let mut expr = Expr::zero();
            for (i, pi) in eparams.iter().enumerate() {
                for (j, pj) in eparams.iter().enumerate() {
                    if inv[i][j] == 0.0 {
                        continue;
                    }
                    let di = Expr::Var(map[pi]) - Expr::Const(center[i]);
                    let dj = Expr::Var(map[pj]) - Expr::Const(center[j]);
                    expr = expr + Expr::Const(inv[i][j]) * (di * dj);
                }
            }
            sub.add_constraint("shape", expr, None, Some(1.0));
        }

        // Objective: the component expression with decision variables
        // frozen at their current master values.
        let mut objective = Expr::Const(model.eval(&decomp.constant));
        for (p, coef) in &decomp.linear {
            objective = objective + Expr::Const(model.eval(coef)) * Expr::Var(map[p]);
        }
        for ((pi, pj), coef) in &decomp.quadratic {
            objective = objective
                + Expr::Const(model.eval(coef)) * (Expr::Var(map[pi]) * Expr::Var(map[pj]));
        }
        let sense = if maximize {
            Sense::Maximize
        } else {
            Sense::Minimize
        };
        sub.add_objective("worst_case", objective, sense);

        let results = solver.solve(&mut sub, tee, timelimit)?;
        if let Some(t) = results.cpu_time {
            *self.oracle_time.get_or_insert(0.0) += t;
        }
        if results.termination != TerminationCondition::Optimal {
            return Err(RobustError::Solver(SolverError::Internal(format!(
                "separation subproblem for '{}' terminated with {:?}",
                self.name, results.termination
            ))));
        }
        let value = match results.objective_value {
            Some(v) => v,
            None => {
                return Err(RobustError::Solver(SolverError::Internal(format!(
                    "separation subproblem for '{}' returned no objective value",
                    self.name
                ))))
            }
        };
        let realization = map.iter().map(|(u, v)| (*u, sub.var_value(*v))).collect();
        Ok((value, realization))
    }

    /// Instantiate the component at a concrete realization and add it as a
    /// deterministic constraint.
    fn add_cut(
        &self,
        model: &mut Model,
        name: String,
        realization: &BTreeMap<UncId, f64>,
        lower: Option<f64>,
        upper: Option<f64>,
    ) {
        let fixed = self
            .expr
            .substitute_unc(&|u| realization.get(&u).map(|v| Expr::Const(*v)));
        let expr = match self.epigraph {
            Some((var, _)) => fixed - Expr::Var(var),
            None => fixed,
        };
        let id = model.add_constraint(name, expr, lower, upper);
        if let Some(record) = model.counterpart_of_mut(self.source) {
            record.constraints.push(id);
        }
    }
}
