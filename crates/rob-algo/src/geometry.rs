//! Uncertainty region classification.
//!
//! A region is polyhedral iff every defining constraint is affine in the
//! uncertain parameters with numeric coefficients. It is ellipsoidal iff a
//! single convex quadratic constraint `w'Qw + q'w + k <= ub` with positive
//! definite `Q` defines it; the classifier completes the square and stores
//! the center and the scaled inverse shape matrix so that
//! `max_w a'w = a'w0 + sqrt(a' sigma a)` with `sigma = r Q^{-1}`.
//! Library shapes skip inference and are trusted as given.

use crate::error::RobustError;
use crate::linalg;
use crate::structure::{decompose, UncDecomp};
use rob_core::{GeometryTag, LibraryShape, Model, RegionConstraint, RegionId, UncId};
use sprs::{CsMat, TriMat};
use std::collections::BTreeSet;

/// Polyhedral region `{w : A w <= b}` over an ordered parameter list.
#[derive(Debug, Clone)]
pub struct Polyhedron {
    pub params: Vec<UncId>,
    pub a: CsMat<f64>,
    pub b: Vec<f64>,
}

/// Ellipsoidal region with center `w0` and scaled shape matrix `sigma`.
#[derive(Debug, Clone)]
pub struct Ellipsoid {
    pub params: Vec<UncId>,
    pub center: Vec<f64>,
    pub sigma: Vec<Vec<f64>>,
}

/// Classifier output.
#[derive(Debug, Clone)]
pub enum RegionGeometry {
    Polyhedral(Polyhedron),
    Ellipsoidal(Ellipsoid),
    Unclassified,
}

impl RegionGeometry {
    pub fn tag(&self) -> GeometryTag {
        match self {
            RegionGeometry::Polyhedral(_) => GeometryTag::Polyhedral,
            RegionGeometry::Ellipsoidal(_) => GeometryTag::Ellipsoidal,
            RegionGeometry::Unclassified => GeometryTag::Unclassified,
        }
    }
}

/// Classify the geometry of a region. The tag is cached on the region as a
/// side effect; an empty region is a modeling error.
pub fn classify(model: &Model, region_id: RegionId) -> Result<RegionGeometry, RobustError> {
    let region = model.region(region_id);
    if region.is_empty() {
        return Err(RobustError::EmptyUncertaintySet {
            region: region.name.clone(),
        });
    }

    let geometry = if let Some(shape) = region.library() {
        from_library(shape)
    } else {
        infer(region.constraints())
    };
    region.cache_tag(geometry.tag());
    Ok(geometry)
}

/// True when the region is polyhedral. Answers from the cached tag when
/// one is present, classifying otherwise.
pub fn is_polyhedral(model: &Model, region: RegionId) -> bool {
    match model.region(region).cached_tag() {
        Some(tag) => tag == GeometryTag::Polyhedral,
        None => matches!(classify(model, region), Ok(RegionGeometry::Polyhedral(_))),
    }
}

/// True when the region is ellipsoidal. Answers from the cached tag when
/// one is present, classifying otherwise.
pub fn is_ellipsoidal(model: &Model, region: RegionId) -> bool {
    match model.region(region).cached_tag() {
        Some(tag) => tag == GeometryTag::Ellipsoidal,
        None => matches!(classify(model, region), Ok(RegionGeometry::Ellipsoidal(_))),
    }
}

fn from_library(shape: &LibraryShape) -> RegionGeometry {
    match shape {
        LibraryShape::Box { bounds } => {
            let params: Vec<UncId> = bounds.iter().map(|(u, _, _)| *u).collect();
            let mut tri = TriMat::new((2 * bounds.len(), params.len()));
            let mut b = Vec::with_capacity(2 * bounds.len());
            for (i, (_, lower, upper)) in bounds.iter().enumerate() {
                tri.add_triplet(2 * i, i, 1.0);
                b.push(*upper);
                tri.add_triplet(2 * i + 1, i, -1.0);
                b.push(-*lower);
            }
            RegionGeometry::Polyhedral(Polyhedron {
                params,
                a: tri.to_csr(),
                b,
            })
        }
        LibraryShape::Ellipsoid {
            params,
            center,
            covariance,
        } => RegionGeometry::Ellipsoidal(Ellipsoid {
            params: params.clone(),
            center: center.clone(),
            sigma: covariance.clone(),
        }),
    }
}

fn infer(constraints: &[RegionConstraint]) -> RegionGeometry {
    let mut decomps: Vec<(&RegionConstraint, UncDecomp)> = Vec::with_capacity(constraints.len());
    let mut params: BTreeSet<UncId> = BTreeSet::new();
    for rc in constraints {
        let decomp = match decompose(&rc.expr) {
            Some(d) => d,
            None => return RegionGeometry::Unclassified,
        };
        params.extend(decomp.linear.keys().copied());
        for (i, j) in decomp.quadratic.keys() {
            params.insert(*i);
            params.insert(*j);
        }
        decomps.push((rc, decomp));
    }
    let params: Vec<UncId> = params.into_iter().collect();

    if decomps.iter().all(|(_, d)| d.quadratic.is_empty()) {
        return infer_polyhedron(&params, &decomps);
    }
    if let [(rc, decomp)] = decomps.as_slice() {
        return infer_ellipsoid(&params, rc, decomp);
    }
    RegionGeometry::Unclassified
}

fn infer_polyhedron(
    params: &[UncId],
    decomps: &[(&RegionConstraint, UncDecomp)],
) -> RegionGeometry {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut b: Vec<f64> = Vec::new();

    for (rc, decomp) in decomps {
        let constant = match decomp.constant.as_constant() {
            Some(c) => c,
            None => return RegionGeometry::Unclassified,
        };
        let mut coefs = Vec::with_capacity(params.len());
        for param in params {
            match decomp.coefficient(*param).as_constant() {
                Some(c) => coefs.push(c),
                None => return RegionGeometry::Unclassified,
            }
        }
        if let Some(upper) = rc.upper {
            rows.push(coefs.clone());
            b.push(upper - constant);
        }
        if let Some(lower) = rc.lower {
            rows.push(coefs.iter().map(|c| -c).collect());
            b.push(constant - lower);
        }
    }

    let mut tri = TriMat::new((rows.len(), params.len()));
    for (r, row) in rows.iter().enumerate() {
        for (i, &v) in row.iter().enumerate() {
            if v != 0.0 {
                tri.add_triplet(r, i, v);
            }
        }
    }
    RegionGeometry::Polyhedral(Polyhedron {
        params: params.to_vec(),
        a: tri.to_csr(),
        b,
    })
}

fn infer_ellipsoid(
    params: &[UncId],
    rc: &RegionConstraint,
    decomp: &UncDecomp,
) -> RegionGeometry {
    // Canonical form is a one-sided upper bound.
    let upper = match (rc.lower, rc.upper) {
        (None, Some(u)) => u,
        _ => return RegionGeometry::Unclassified,
    };
    let n = params.len();
    let index_of = |u: UncId| params.iter().position(|p| *p == u);

    let mut q = vec![vec![0.0; n]; n];
    for ((pi, pj), coef) in &decomp.quadratic {
        let (i, j) = match (index_of(*pi), index_of(*pj)) {
            (Some(i), Some(j)) => (i, j),
            _ => return RegionGeometry::Unclassified,
        };
        let c = match coef.as_constant() {
            Some(c) => c,
            None => return RegionGeometry::Unclassified,
        };
        if i == j {
            q[i][i] += c;
        } else {
            q[i][j] += c / 2.0;
            q[j][i] += c / 2.0;
        }
    }
    let mut lin = vec![0.0; n];
    for (i, param) in params.iter().enumerate() {
        match decomp.coefficient(*param).as_constant() {
            Some(c) => lin[i] = c,
            None => return RegionGeometry::Unclassified,
        }
    }
    let constant = match decomp.constant.as_constant() {
        Some(c) => c,
        None => return RegionGeometry::Unclassified,
    };

    // Convexity check: Q must be positive definite.
    if linalg::cholesky(&q).is_none() {
        return RegionGeometry::Unclassified;
    }

    // Complete the square: center w0 = -Q^{-1} q_lin / 2.
    let rhs: Vec<f64> = lin.iter().map(|c| -c / 2.0).collect();
    let center = match linalg::solve(&q, &rhs) {
        Some(c) => c,
        None => return RegionGeometry::Unclassified,
    };
    let mut center_form = 0.0;
    for i in 0..n {
        for j in 0..n {
            center_form += center[i] * q[i][j] * center[j];
        }
    }
    let radius = upper - constant + center_form;
    if radius <= 1e-12 {
        return RegionGeometry::Unclassified;
    }

    let qinv = match linalg::invert(&q) {
        Some(inv) => inv,
        None => return RegionGeometry::Unclassified,
    };
    let mut sigma = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            // Symmetrize against round-off from the LU solves.
            sigma[i][j] = radius * (qinv[i][j] + qinv[j][i]) / 2.0;
        }
    }

    RegionGeometry::Ellipsoidal(Ellipsoid {
        params: params.to_vec(),
        center,
        sigma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rob_core::{Expr, GeometryTag, UnaryOp};

    fn box_model() -> (Model, RegionId) {
        let mut m = Model::new("box");
        let region = m.add_region("P");
        let w0 = m.add_unc_in("w0", 1.0, region);
        let w1 = m.add_unc_in("w1", 2.0, region);
        m.region_mut(region)
            .add_constraint("w0_range", Expr::Unc(w0), Some(0.5), Some(1.5));
        m.region_mut(region)
            .add_constraint("w1_range", Expr::Unc(w1), Some(1.5), Some(2.5));
        (m, region)
    }

    #[test]
    fn affine_constraints_classify_as_polyhedral() {
        let (m, region) = box_model();
        let geometry = classify(&m, region).unwrap();
        let poly = match geometry {
            RegionGeometry::Polyhedral(p) => p,
            other => panic!("expected polyhedral, got {:?}", other),
        };
        assert_eq!(poly.params.len(), 2);
        assert_eq!(poly.b.len(), 4);
        assert_eq!(m.region(region).cached_tag(), Some(GeometryTag::Polyhedral));
        assert!(is_polyhedral(&m, region));
        assert!(!is_ellipsoidal(&m, region));
    }

    #[test]
    fn canonical_quadratic_classifies_as_ellipsoidal() {
        let mut m = Model::new("ell");
        let region = m.add_region("E");
        let w0 = m.add_unc_in("w0", 1.0, region);
        let w1 = m.add_unc_in("w1", 2.0, region);
        // (w0-1)^2 + 0.1 (w0-1)(w1-2) + (w1-2)^2 <= 0.1
        let d0 = Expr::Unc(w0) - Expr::Const(1.0);
        let d1 = Expr::Unc(w1) - Expr::Const(2.0);
        let expr = d0.clone().pow(2) + 0.1 * (d0 * d1.clone()) + d1.pow(2);
        m.region_mut(region)
            .add_constraint("shape", expr, None, Some(0.1));

        let ell = match classify(&m, region).unwrap() {
            RegionGeometry::Ellipsoidal(e) => e,
            other => panic!("expected ellipsoidal, got {:?}", other),
        };
        assert!((ell.center[0] - 1.0).abs() < 1e-9);
        assert!((ell.center[1] - 2.0).abs() < 1e-9);
        // sigma = r Q^{-1} with r = 0.1, Q = [[1, 0.05], [0.05, 1]]
        let det = 1.0 - 0.05 * 0.05;
        assert!((ell.sigma[0][0] - 0.1 / det).abs() < 1e-9);
        assert!((ell.sigma[0][1] + 0.1 * 0.05 / det).abs() < 1e-9);
        assert_eq!(m.region(region).cached_tag(), Some(GeometryTag::Ellipsoidal));
    }

    #[test]
    fn empty_region_is_an_error() {
        let mut m = Model::new("empty");
        let region = m.add_region("Uempty");
        m.add_unc_in("w", 1.0, region);
        match classify(&m, region) {
            Err(RobustError::EmptyUncertaintySet { region }) => assert_eq!(region, "Uempty"),
            other => panic!("expected EmptyUncertaintySet, got {:?}", other),
        }
    }

    #[test]
    fn quartic_plus_sine_is_unclassified() {
        let mut m = Model::new("weird");
        let region = m.add_region("U");
        let w0 = m.add_unc_in("w0", 1.0, region);
        let w1 = m.add_unc_in("w1", 2.0, region);
        let expr = (Expr::Unc(w0) - Expr::Const(1.0)).pow(4) + Expr::Unc(w1).unary(UnaryOp::Sin);
        m.region_mut(region)
            .add_constraint("shape", expr, None, Some(1.0));
        assert!(matches!(
            classify(&m, region).unwrap(),
            RegionGeometry::Unclassified
        ));
        assert_eq!(
            m.region(region).cached_tag(),
            Some(GeometryTag::Unclassified)
        );
    }

    #[test]
    fn library_shapes_agree_with_structural_inference() {
        let (mut m, inferred) = box_model();
        let w0 = m.unc_params()[0].id;
        let w1 = m.unc_params()[1].id;

        let boxed = m.add_region("Plib");
        m.region_mut(boxed).set_library(LibraryShape::Box {
            bounds: vec![(w0, 0.5, 1.5), (w1, 1.5, 2.5)],
        });
        assert!(is_polyhedral(&m, boxed));
        assert!(is_polyhedral(&m, inferred));

        let elib = m.add_region("Elib");
        m.region_mut(elib).set_library(LibraryShape::Ellipsoid {
            params: vec![w0, w1],
            center: vec![1.0, 2.0],
            covariance: vec![vec![0.1, 0.0], vec![0.0, 0.1]],
        });
        assert!(is_ellipsoidal(&m, elib));
        assert!(!is_polyhedral(&m, elib));
    }

    #[test]
    fn tag_queries_answer_from_the_cache() {
        let (mut m, region) = box_model();

        // A cached tag wins over structural inference, even a wrong one.
        m.region(region).cache_tag(GeometryTag::Ellipsoidal);
        assert!(is_ellipsoidal(&m, region));
        assert!(!is_polyhedral(&m, region));

        // Editing the region drops the stale tag and inference takes over.
        let w0 = m.unc_params()[0].id;
        m.region_mut(region)
            .add_constraint("extra", Expr::Unc(w0), None, Some(2.0));
        assert_eq!(m.region(region).cached_tag(), None);
        assert!(is_polyhedral(&m, region));
        assert!(!is_ellipsoidal(&m, region));
    }

    #[test]
    fn two_quadratics_are_unclassified() {
        let mut m = Model::new("two");
        let region = m.add_region("U2");
        let w0 = m.add_unc_in("w0", 1.0, region);
        let w1 = m.add_unc_in("w1", 2.0, region);
        let c0 = (Expr::Unc(w0) - Expr::Const(1.0)).pow(2);
        let c1 = (Expr::Unc(w1) - Expr::Const(2.0)).pow(2);
        m.region_mut(region).add_constraint("q0", c0, None, Some(0.25));
        m.region_mut(region).add_constraint("q1", c1, None, Some(0.25));
        assert!(matches!(
            classify(&m, region).unwrap(),
            RegionGeometry::Unclassified
        ));
    }
}
