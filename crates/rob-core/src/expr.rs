//! Expression trees over decision variables and uncertain parameters.
//!
//! Expressions use a tagged-variant representation so downstream passes can
//! recognize affine and quadratic structure without runtime type checks.
//! Operator overloads fold constants eagerly, which keeps the trees produced
//! by the reformulation builders small.

use crate::ids::{UncId, VarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::{Add, Mul, Neg, Sub};

/// Transcendental functions that can wrap a subexpression.
///
/// None of these are reformulable when applied to an uncertain parameter;
/// they exist so that such models can be represented and rejected with a
/// typed error instead of being unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Sin,
    Cos,
    Exp,
    Sqrt,
}

impl UnaryOp {
    pub fn apply(self, v: f64) -> f64 {
        match self {
            UnaryOp::Sin => v.sin(),
            UnaryOp::Cos => v.cos(),
            UnaryOp::Exp => v.exp(),
            UnaryOp::Sqrt => v.sqrt(),
        }
    }
}

/// A scalar expression over variables and uncertain parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(f64),
    Var(VarId),
    Unc(UncId),
    Sum(Vec<Expr>),
    Prod(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, u32),
    Unary(UnaryOp, Box<Expr>),
}

impl Expr {
    pub fn zero() -> Self {
        Expr::Const(0.0)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(c) if *c == 0.0)
    }

    pub fn pow(self, exponent: u32) -> Self {
        match self {
            Expr::Const(c) => Expr::Const(c.powi(exponent as i32)),
            e => Expr::Pow(Box::new(e), exponent),
        }
    }

    pub fn unary(self, op: UnaryOp) -> Self {
        match self {
            Expr::Const(c) => Expr::Const(op.apply(c)),
            e => Expr::Unary(op, Box::new(e)),
        }
    }

    /// Sum a sequence of expressions, folding out zero terms.
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms
            .into_iter()
            .fold(Expr::zero(), |acc, term| acc + term)
    }

    /// Evaluate under value assignments for variables and uncertain
    /// parameters.
    pub fn eval(&self, var: &dyn Fn(VarId) -> f64, unc: &dyn Fn(UncId) -> f64) -> f64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Var(v) => var(*v),
            Expr::Unc(u) => unc(*u),
            Expr::Sum(terms) => terms.iter().map(|t| t.eval(var, unc)).sum(),
            Expr::Prod(a, b) => a.eval(var, unc) * b.eval(var, unc),
            Expr::Pow(base, k) => base.eval(var, unc).powi(*k as i32),
            Expr::Unary(op, e) => op.apply(e.eval(var, unc)),
        }
    }

    /// Numeric value of an expression with no variables or uncertain
    /// parameters.
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            Expr::Var(_) | Expr::Unc(_) => None,
            Expr::Sum(terms) => terms.iter().map(|t| t.as_constant()).sum(),
            Expr::Prod(a, b) => Some(a.as_constant()? * b.as_constant()?),
            Expr::Pow(base, k) => Some(base.as_constant()?.powi(*k as i32)),
            Expr::Unary(op, e) => Some(op.apply(e.as_constant()?)),
        }
    }

    pub fn contains_unc(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Var(_) => false,
            Expr::Unc(_) => true,
            Expr::Sum(terms) => terms.iter().any(Expr::contains_unc),
            Expr::Prod(a, b) => a.contains_unc() || b.contains_unc(),
            Expr::Pow(base, _) => base.contains_unc(),
            Expr::Unary(_, e) => e.contains_unc(),
        }
    }

    pub fn contains_var(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Unc(_) => false,
            Expr::Var(_) => true,
            Expr::Sum(terms) => terms.iter().any(Expr::contains_var),
            Expr::Prod(a, b) => a.contains_var() || b.contains_var(),
            Expr::Pow(base, _) => base.contains_var(),
            Expr::Unary(_, e) => e.contains_var(),
        }
    }

    /// The uncertain parameters referenced anywhere in the expression.
    pub fn unc_params(&self) -> BTreeSet<UncId> {
        let mut set = BTreeSet::new();
        self.collect_unc(&mut set);
        set
    }

    fn collect_unc(&self, set: &mut BTreeSet<UncId>) {
        match self {
            Expr::Const(_) | Expr::Var(_) => {}
            Expr::Unc(u) => {
                set.insert(*u);
            }
            Expr::Sum(terms) => terms.iter().for_each(|t| t.collect_unc(set)),
            Expr::Prod(a, b) => {
                a.collect_unc(set);
                b.collect_unc(set);
            }
            Expr::Pow(base, _) => base.collect_unc(set),
            Expr::Unary(_, e) => e.collect_unc(set),
        }
    }

    /// Replace uncertain parameters for which `subst` yields a replacement.
    ///
    /// Used by the cut generator to instantiate a constraint at a concrete
    /// worst-case realization.
    pub fn substitute_unc(&self, subst: &dyn Fn(UncId) -> Option<Expr>) -> Expr {
        match self {
            Expr::Const(_) | Expr::Var(_) => self.clone(),
            Expr::Unc(u) => subst(*u).unwrap_or_else(|| self.clone()),
            Expr::Sum(terms) => Expr::Sum(terms.iter().map(|t| t.substitute_unc(subst)).collect()),
            Expr::Prod(a, b) => Expr::Prod(
                Box::new(a.substitute_unc(subst)),
                Box::new(b.substitute_unc(subst)),
            ),
            Expr::Pow(base, k) => Expr::Pow(Box::new(base.substitute_unc(subst)), *k),
            Expr::Unary(op, e) => Expr::Unary(*op, Box::new(e.substitute_unc(subst))),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<VarId> for Expr {
    fn from(value: VarId) -> Self {
        Expr::Var(value)
    }
}

impl From<UncId> for Expr {
    fn from(value: UncId) -> Self {
        Expr::Unc(value)
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        match (self, rhs) {
            (Expr::Const(a), Expr::Const(b)) => Expr::Const(a + b),
            (lhs, rhs) if rhs.is_zero() => lhs,
            (lhs, rhs) if lhs.is_zero() => rhs,
            (Expr::Sum(mut terms), Expr::Sum(more)) => {
                terms.extend(more);
                Expr::Sum(terms)
            }
            (Expr::Sum(mut terms), rhs) => {
                terms.push(rhs);
                Expr::Sum(terms)
            }
            (lhs, Expr::Sum(terms)) => {
                let mut all = vec![lhs];
                all.extend(terms);
                Expr::Sum(all)
            }
            (lhs, rhs) => Expr::Sum(vec![lhs, rhs]),
        }
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        self + (-rhs)
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        match (self, rhs) {
            (Expr::Const(a), Expr::Const(b)) => Expr::Const(a * b),
            (lhs, _) if lhs.is_zero() => Expr::zero(),
            (_, rhs) if rhs.is_zero() => Expr::zero(),
            (Expr::Const(c), rhs) if c == 1.0 => rhs,
            (lhs, Expr::Const(c)) if c == 1.0 => lhs,
            (lhs, rhs) => Expr::Prod(Box::new(lhs), Box::new(rhs)),
        }
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        match self {
            Expr::Const(c) => Expr::Const(-c),
            e => Expr::Const(-1.0) * e,
        }
    }
}

impl Add<f64> for Expr {
    type Output = Expr;

    fn add(self, rhs: f64) -> Expr {
        self + Expr::Const(rhs)
    }
}

impl Sub<f64> for Expr {
    type Output = Expr;

    fn sub(self, rhs: f64) -> Expr {
        self + Expr::Const(-rhs)
    }
}

impl Add<Expr> for f64 {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::Const(self) + rhs
    }
}

impl Mul<f64> for Expr {
    type Output = Expr;

    fn mul(self, rhs: f64) -> Expr {
        self * Expr::Const(rhs)
    }
}

impl Mul<Expr> for f64 {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::Const(self) * rhs
    }
}
