//! The optimization-model container consumed by the reformulation engine.

use crate::expr::Expr;
use crate::ids::{ConsId, ObjId, RegionId, UncId, VarId};
use crate::region::Region;
use serde::{Deserialize, Serialize};

/// Optimization sense of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Minimize,
    Maximize,
}

/// Kind of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Continuous,
    Integer,
    Binary,
}

/// Whether a constraint or objective is still enforced directly or has been
/// replaced by a deterministic counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    Active,
    Reformulated,
}

/// A decision variable. `value` carries the most recently written-back
/// solution (0.0 before any solve).
#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub kind: VarKind,
    pub value: f64,
}

/// An uncertain parameter: nominal point estimate plus an optional
/// uncertainty region.
#[derive(Debug, Clone, Serialize)]
pub struct UncParam {
    pub id: UncId,
    pub name: String,
    pub nominal: f64,
    pub region: Option<RegionId>,
}

/// A constraint `lower <= expr <= upper`; either bound may be absent, both
/// present makes it two-sided, equal bounds make it an equality.
#[derive(Debug, Clone, Serialize)]
pub struct Constraint {
    pub id: ConsId,
    pub name: String,
    pub expr: Expr,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub state: ComponentState,
}

impl Constraint {
    pub fn is_active(&self) -> bool {
        self.state == ComponentState::Active
    }

    pub fn is_equality(&self) -> bool {
        matches!((self.lower, self.upper), (Some(l), Some(u)) if l == u)
    }
}

/// An objective expression with an optimization sense.
#[derive(Debug, Clone, Serialize)]
pub struct Objective {
    pub id: ObjId,
    pub name: String,
    pub expr: Expr,
    pub sense: Sense,
    pub state: ComponentState,
}

impl Objective {
    pub fn is_active(&self) -> bool {
        self.state == ComponentState::Active
    }
}

/// The original component a counterpart record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CounterpartSource {
    Constraint(ConsId),
    Objective(ObjId),
}

/// Discoverable original-to-counterpart mapping written by the
/// reformulation builders and the cut generator.
#[derive(Debug, Clone, Serialize)]
pub struct CounterpartRecord {
    pub original: CounterpartSource,
    pub constraints: Vec<ConsId>,
    pub variables: Vec<VarId>,
    pub objective: Option<ObjId>,
}

/// Problem-size statistics, mirroring the counts a solve report carries.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub number_of_variables: usize,
    pub number_of_continuous_variables: usize,
    pub number_of_integer_variables: usize,
    pub number_of_binary_variables: usize,
    pub number_of_constraints: usize,
    pub number_of_active_constraints: usize,
    pub number_of_objectives: usize,
    pub number_of_uncertain_parameters: usize,
}

/// An optimization model: variables, uncertain parameters and their
/// regions, constraints, and objectives.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub name: String,
    vars: Vec<Variable>,
    uncs: Vec<UncParam>,
    regions: Vec<Region>,
    cons: Vec<Constraint>,
    objs: Vec<Objective>,
    counterparts: Vec<CounterpartRecord>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: Vec::new(),
            uncs: Vec::new(),
            regions: Vec::new(),
            cons: Vec::new(),
            objs: Vec::new(),
            counterparts: Vec::new(),
        }
    }

    // === Variables ===

    pub fn add_var(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.add_var_kind(name, lower, upper, VarKind::Continuous)
    }

    pub fn add_integer_var(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.add_var_kind(name, lower, upper, VarKind::Integer)
    }

    pub fn add_binary_var(&mut self, name: impl Into<String>) -> VarId {
        self.add_var_kind(name, 0.0, 1.0, VarKind::Binary)
    }

    fn add_var_kind(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        kind: VarKind,
    ) -> VarId {
        let id = VarId::new(self.vars.len());
        self.vars.push(Variable {
            id,
            name: name.into(),
            lower,
            upper,
            kind,
            value: 0.0,
        });
        id
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn set_var_value(&mut self, id: VarId, value: f64) {
        self.vars[id.index()].value = value;
    }

    pub fn var_value(&self, id: VarId) -> f64 {
        self.vars[id.index()].value
    }

    // === Uncertain parameters ===

    pub fn add_unc(&mut self, name: impl Into<String>, nominal: f64) -> UncId {
        let id = UncId::new(self.uncs.len());
        self.uncs.push(UncParam {
            id,
            name: name.into(),
            nominal,
            region: None,
        });
        id
    }

    /// Add an uncertain parameter already attached to a region.
    pub fn add_unc_in(
        &mut self,
        name: impl Into<String>,
        nominal: f64,
        region: RegionId,
    ) -> UncId {
        let id = self.add_unc(name, nominal);
        self.uncs[id.index()].region = Some(region);
        id
    }

    pub fn unc(&self, id: UncId) -> &UncParam {
        &self.uncs[id.index()]
    }

    pub fn unc_params(&self) -> &[UncParam] {
        &self.uncs
    }

    pub fn set_unc_region(&mut self, id: UncId, region: RegionId) {
        self.uncs[id.index()].region = Some(region);
    }

    // === Regions ===

    pub fn add_region(&mut self, name: impl Into<String>) -> RegionId {
        let id = RegionId::new(self.regions.len());
        self.regions.push(Region::new(id, name.into()));
        id
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id.index()]
    }

    // === Constraints ===

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: Expr,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> ConsId {
        let id = ConsId::new(self.cons.len());
        self.cons.push(Constraint {
            id,
            name: name.into(),
            expr,
            lower,
            upper,
            state: ComponentState::Active,
        });
        id
    }

    pub fn constraint(&self, id: ConsId) -> &Constraint {
        &self.cons[id.index()]
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.cons
    }

    pub fn constraint_by_name(&self, name: &str) -> Option<&Constraint> {
        self.cons.iter().find(|c| c.name == name)
    }

    pub fn deactivate_constraint(&mut self, id: ConsId) {
        self.cons[id.index()].state = ComponentState::Reformulated;
    }

    // === Objectives ===

    pub fn add_objective(&mut self, name: impl Into<String>, expr: Expr, sense: Sense) -> ObjId {
        let id = ObjId::new(self.objs.len());
        self.objs.push(Objective {
            id,
            name: name.into(),
            expr,
            sense,
            state: ComponentState::Active,
        });
        id
    }

    pub fn objective(&self, id: ObjId) -> &Objective {
        &self.objs[id.index()]
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objs
    }

    pub fn objective_by_name(&self, name: &str) -> Option<&Objective> {
        self.objs.iter().find(|o| o.name == name)
    }

    /// The first active objective, if any.
    pub fn active_objective(&self) -> Option<&Objective> {
        self.objs.iter().find(|o| o.is_active())
    }

    pub fn deactivate_objective(&mut self, id: ObjId) {
        self.objs[id.index()].state = ComponentState::Reformulated;
    }

    // === Counterpart bookkeeping ===

    pub fn record_counterpart(&mut self, record: CounterpartRecord) {
        self.counterparts.push(record);
    }

    pub fn counterparts(&self) -> &[CounterpartRecord] {
        &self.counterparts
    }

    pub fn counterpart_of(&self, original: CounterpartSource) -> Option<&CounterpartRecord> {
        self.counterparts.iter().find(|r| r.original == original)
    }

    pub fn counterpart_of_mut(
        &mut self,
        original: CounterpartSource,
    ) -> Option<&mut CounterpartRecord> {
        self.counterparts.iter_mut().find(|r| r.original == original)
    }

    // === Statistics ===

    pub fn statistics(&self) -> Statistics {
        let count_kind =
            |kind: VarKind| self.vars.iter().filter(|v| v.kind == kind).count();
        Statistics {
            number_of_variables: self.vars.len(),
            number_of_continuous_variables: count_kind(VarKind::Continuous),
            number_of_integer_variables: count_kind(VarKind::Integer),
            number_of_binary_variables: count_kind(VarKind::Binary),
            number_of_constraints: self.cons.len(),
            number_of_active_constraints: self.cons.iter().filter(|c| c.is_active()).count(),
            number_of_objectives: self.objs.len(),
            number_of_uncertain_parameters: self.uncs.len(),
        }
    }

    /// Evaluate a deterministic expression at the current variable values;
    /// uncertain parameters take their nominal value.
    pub fn eval(&self, expr: &Expr) -> f64 {
        expr.eval(&|v| self.var_value(v), &|u| self.unc(u).nominal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_count_by_kind() {
        let mut m = Model::new("stats");
        m.add_var("x", 0.0, 1.0);
        m.add_integer_var("n", 0.0, 10.0);
        m.add_binary_var("b");
        m.add_unc("w", 1.0);
        let x = VarId::new(0);
        m.add_constraint("c", Expr::Var(x), None, Some(1.0));
        m.add_objective("obj", Expr::Var(x), Sense::Minimize);

        let stats = m.statistics();
        assert_eq!(stats.number_of_variables, 3);
        assert_eq!(stats.number_of_continuous_variables, 1);
        assert_eq!(stats.number_of_integer_variables, 1);
        assert_eq!(stats.number_of_binary_variables, 1);
        assert_eq!(stats.number_of_constraints, 1);
        assert_eq!(stats.number_of_active_constraints, 1);
        assert_eq!(stats.number_of_objectives, 1);
        assert_eq!(stats.number_of_uncertain_parameters, 1);
    }

    #[test]
    fn deactivation_and_counterpart_lookup() {
        let mut m = Model::new("book");
        let x = m.add_var("x", 0.0, 1.0);
        let c = m.add_constraint("c", Expr::Var(x), None, Some(1.0));
        let cp = m.add_constraint("c_counterpart_upper", Expr::Var(x), None, Some(1.0));
        m.deactivate_constraint(c);
        m.record_counterpart(CounterpartRecord {
            original: CounterpartSource::Constraint(c),
            constraints: vec![cp],
            variables: vec![],
            objective: None,
        });

        assert!(!m.constraint(c).is_active());
        let record = m
            .counterpart_of(CounterpartSource::Constraint(c))
            .expect("record exists");
        assert_eq!(record.constraints, vec![cp]);
    }

    #[test]
    fn eval_uses_values_and_nominals() {
        let mut m = Model::new("eval");
        let x = m.add_var("x", f64::NEG_INFINITY, f64::INFINITY);
        let w = m.add_unc("w", 2.0);
        m.set_var_value(x, 3.0);
        let e = Expr::Var(x) * Expr::Unc(w) + 1.0;
        assert_eq!(m.eval(&e), 7.0);
    }

    #[test]
    fn serializes_to_json() {
        let mut m = Model::new("json");
        let x = m.add_var("x", 0.0, 1.0);
        m.add_objective("obj", Expr::Var(x), Sense::Maximize);
        let text = serde_json::to_string(&m).expect("serializable");
        assert!(text.contains("\"Maximize\""));
    }
}
