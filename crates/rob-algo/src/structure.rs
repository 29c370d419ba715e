//! Expression structure analysis with respect to uncertain parameters.
//!
//! Both counterpart builders and the cut generator rely on the same
//! decomposition: an expression is split into a deterministic part plus
//! per-parameter coefficient expressions. Anything beyond total degree two
//! in the uncertain parameters, or a transcendental function applied to
//! them, is unsupported and must surface as a typed error upstream.

use rob_core::{Expr, UncId};
use std::collections::BTreeMap;

/// Structure of an expression with respect to its uncertain parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncStructure {
    /// No uncertain parameters at all.
    Deterministic,
    /// Every uncertain parameter appears with total degree one; the
    /// coefficients are deterministic expressions (decision variables
    /// allowed — the bilinear pattern used by the ellipsoidal path).
    Affine,
    /// Degree-two combinations of uncertain parameters are present.
    Quadratic,
    /// Anything else; never reformulated, never approximated.
    Unsupported,
}

/// Decomposition of an expression as a polynomial in the uncertain
/// parameters, with deterministic expression coefficients.
#[derive(Debug, Clone)]
pub struct UncDecomp {
    /// Deterministic part (degree zero in the uncertain parameters).
    pub constant: Expr,
    /// Coefficient of each degree-one parameter.
    pub linear: BTreeMap<UncId, Expr>,
    /// Coefficient of each degree-two monomial, keyed by ordered pair.
    pub quadratic: BTreeMap<(UncId, UncId), Expr>,
}

impl UncDecomp {
    fn constant(expr: Expr) -> Self {
        Self {
            constant: expr,
            linear: BTreeMap::new(),
            quadratic: BTreeMap::new(),
        }
    }

    pub fn is_affine(&self) -> bool {
        self.quadratic.is_empty()
    }

    pub fn is_deterministic(&self) -> bool {
        self.linear.is_empty() && self.quadratic.is_empty()
    }

    /// Coefficient of a parameter, zero if absent.
    pub fn coefficient(&self, param: UncId) -> Expr {
        self.linear.get(&param).cloned().unwrap_or_else(Expr::zero)
    }

    fn add_linear(&mut self, param: UncId, coef: Expr) {
        if coef.is_zero() {
            return;
        }
        match self.linear.remove(&param) {
            Some(existing) => {
                let sum = existing + coef;
                if !sum.is_zero() {
                    self.linear.insert(param, sum);
                }
            }
            None => {
                self.linear.insert(param, coef);
            }
        }
    }

    fn add_quadratic(&mut self, key: (UncId, UncId), coef: Expr) {
        if coef.is_zero() {
            return;
        }
        let key = if key.0 <= key.1 { key } else { (key.1, key.0) };
        match self.quadratic.remove(&key) {
            Some(existing) => {
                let sum = existing + coef;
                if !sum.is_zero() {
                    self.quadratic.insert(key, sum);
                }
            }
            None => {
                self.quadratic.insert(key, coef);
            }
        }
    }

    fn merge(&mut self, other: UncDecomp) {
        let constant = std::mem::replace(&mut self.constant, Expr::zero());
        self.constant = constant + other.constant;
        for (param, coef) in other.linear {
            self.add_linear(param, coef);
        }
        for (key, coef) in other.quadratic {
            self.add_quadratic(key, coef);
        }
    }
}

/// Decompose an expression into a degree-at-most-two polynomial in the
/// uncertain parameters. `None` means the dependence is unsupported.
pub fn decompose(expr: &Expr) -> Option<UncDecomp> {
    match expr {
        Expr::Const(_) | Expr::Var(_) => Some(UncDecomp::constant(expr.clone())),
        Expr::Unc(u) => {
            let mut d = UncDecomp::constant(Expr::zero());
            d.add_linear(*u, Expr::Const(1.0));
            Some(d)
        }
        Expr::Sum(terms) => {
            let mut acc = UncDecomp::constant(Expr::zero());
            for term in terms {
                acc.merge(decompose(term)?);
            }
            Some(acc)
        }
        Expr::Prod(a, b) => multiply(decompose(a)?, decompose(b)?),
        Expr::Pow(base, k) => {
            if !base.contains_unc() {
                return Some(UncDecomp::constant(expr.clone()));
            }
            match k {
                0 => Some(UncDecomp::constant(Expr::Const(1.0))),
                1 => decompose(base),
                2 => {
                    let d = decompose(base)?;
                    multiply(d.clone(), d)
                }
                _ => None,
            }
        }
        Expr::Unary(_, inner) => {
            if inner.contains_unc() {
                None
            } else {
                Some(UncDecomp::constant(expr.clone()))
            }
        }
    }
}

fn multiply(a: UncDecomp, b: UncDecomp) -> Option<UncDecomp> {
    // Degree bookkeeping: any product whose total degree exceeds two is
    // unsupported.
    if (!a.quadratic.is_empty() && !(b.linear.is_empty() && b.quadratic.is_empty()))
        || (!b.quadratic.is_empty() && !(a.linear.is_empty() && a.quadratic.is_empty()))
    {
        return None;
    }

    let mut out = UncDecomp::constant(a.constant.clone() * b.constant.clone());

    for (param, coef) in &a.linear {
        out.add_linear(*param, coef.clone() * b.constant.clone());
    }
    for (param, coef) in &b.linear {
        out.add_linear(*param, coef.clone() * a.constant.clone());
    }
    for (pa, ca) in &a.linear {
        for (pb, cb) in &b.linear {
            out.add_quadratic((*pa, *pb), ca.clone() * cb.clone());
        }
    }
    for (key, coef) in &a.quadratic {
        out.add_quadratic(*key, coef.clone() * b.constant.clone());
    }
    for (key, coef) in &b.quadratic {
        out.add_quadratic(*key, coef.clone() * a.constant.clone());
    }
    Some(out)
}

/// Classify the dependence of an expression on its uncertain parameters.
pub fn classify_structure(expr: &Expr) -> UncStructure {
    match decompose(expr) {
        None => UncStructure::Unsupported,
        Some(d) if !d.quadratic.is_empty() => UncStructure::Quadratic,
        Some(d) if !d.linear.is_empty() => UncStructure::Affine,
        Some(_) => UncStructure::Deterministic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rob_core::{UnaryOp, VarId};

    fn w(i: usize) -> Expr {
        Expr::Unc(UncId::new(i))
    }

    fn x(i: usize) -> Expr {
        Expr::Var(VarId::new(i))
    }

    #[test]
    fn bilinear_sum_is_affine() {
        let e = w(0) * x(0) + w(1) * x(1) + 3.0 * x(2);
        assert_eq!(classify_structure(&e), UncStructure::Affine);

        let d = decompose(&e).unwrap();
        assert_eq!(d.linear.len(), 2);
        assert_eq!(d.coefficient(UncId::new(0)), x(0));
        assert!(d.constant.contains_var());
    }

    #[test]
    fn centered_square_expands_to_quadratic() {
        // (w0 - 1)^2 = w0^2 - 2 w0 + 1
        let e = (w(0) - Expr::Const(1.0)).pow(2);
        let d = decompose(&e).unwrap();
        assert_eq!(
            d.quadratic.get(&(UncId::new(0), UncId::new(0))),
            Some(&Expr::Const(1.0))
        );
        assert_eq!(d.coefficient(UncId::new(0)).as_constant(), Some(-2.0));
        assert_eq!(d.constant.as_constant(), Some(1.0));
        assert_eq!(classify_structure(&e), UncStructure::Quadratic);
    }

    #[test]
    fn cross_term_keeps_ordered_key() {
        let e = w(1) * w(0);
        let d = decompose(&e).unwrap();
        assert!(d.quadratic.contains_key(&(UncId::new(0), UncId::new(1))));
    }

    #[test]
    fn squared_parameter_times_variable_is_quadratic_with_var_coefficient() {
        let e = w(0).pow(2) * x(0);
        let d = decompose(&e).unwrap();
        assert_eq!(
            d.quadratic.get(&(UncId::new(0), UncId::new(0))),
            Some(&x(0))
        );
    }

    #[test]
    fn cubic_and_transcendental_are_unsupported() {
        assert_eq!(classify_structure(&w(0).pow(3)), UncStructure::Unsupported);
        assert_eq!(
            classify_structure(&(w(0) * w(1) * w(0))),
            UncStructure::Unsupported
        );
        assert_eq!(
            classify_structure(&w(0).unary(UnaryOp::Sin)),
            UncStructure::Unsupported
        );
        // sin of a deterministic expression is just a coefficient
        assert_eq!(
            classify_structure(&(x(0).unary(UnaryOp::Sin) * w(0))),
            UncStructure::Affine
        );
    }

    #[test]
    fn deterministic_expression() {
        let e = x(0) * x(1) + 2.0 * x(0);
        assert_eq!(classify_structure(&e), UncStructure::Deterministic);
    }
}
