//! Uncertainty regions: the admissible realizations of uncertain parameters.

use crate::expr::Expr;
use crate::ids::{RegionId, UncId};
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Geometry of an uncertainty region as determined by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryTag {
    Polyhedral,
    Ellipsoidal,
    Unclassified,
}

/// A pre-declared region shape that skips structural inference.
///
/// Library shapes are trusted as given; the classifier never inspects them
/// beyond reading their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LibraryShape {
    /// Axis-aligned box: per-parameter lower and upper bounds.
    Box { bounds: Vec<(UncId, f64, f64)> },
    /// Ellipsoid `(w - center)^T cov^{-1} (w - center) <= 1`.
    Ellipsoid {
        params: Vec<UncId>,
        center: Vec<f64>,
        covariance: Vec<Vec<f64>>,
    },
}

/// A single defining constraint of a region, expressed over uncertain
/// parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConstraint {
    pub name: String,
    pub expr: Expr,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// An uncertainty region: a set of defining constraints over uncertain
/// parameters, or a library shape.
///
/// The geometry tag is classified lazily on first query and cached; any
/// mutation of the defining constraints or the library shape invalidates
/// the cache.
#[derive(Debug, Clone, Serialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    cons: Vec<RegionConstraint>,
    library: Option<LibraryShape>,
    cached_tag: Cell<Option<GeometryTag>>,
}

impl Region {
    pub(crate) fn new(id: RegionId, name: String) -> Self {
        Self {
            id,
            name,
            cons: Vec::new(),
            library: None,
            cached_tag: Cell::new(None),
        }
    }

    /// Add a defining constraint `lower <= expr <= upper`.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: Expr,
        lower: Option<f64>,
        upper: Option<f64>,
    ) {
        self.cons.push(RegionConstraint {
            name: name.into(),
            expr,
            lower,
            upper,
        });
        self.cached_tag.set(None);
    }

    /// Declare the region via a library shape instead of constraints.
    pub fn set_library(&mut self, shape: LibraryShape) {
        self.library = Some(shape);
        self.cached_tag.set(None);
    }

    pub fn constraints(&self) -> &[RegionConstraint] {
        &self.cons
    }

    pub fn library(&self) -> Option<&LibraryShape> {
        self.library.as_ref()
    }

    /// A region with neither defining constraints nor a library shape does
    /// not constrain the worst case at all.
    pub fn is_empty(&self) -> bool {
        self.cons.is_empty() && self.library.is_none()
    }

    pub fn cached_tag(&self) -> Option<GeometryTag> {
        self.cached_tag.get()
    }

    pub fn cache_tag(&self, tag: GeometryTag) {
        self.cached_tag.set(Some(tag));
    }
}
