use thiserror::Error;

/// Robust reformulation errors.
///
/// These are modeling errors: none of them is retried, and no partial
/// results are produced when one is raised.
#[derive(Debug, Clone, Error)]
pub enum RobustError {
    /// An uncertain parameter is used in a constraint or objective but has
    /// no attached uncertainty region.
    #[error("uncertain parameter '{param}' has no attached uncertainty region")]
    MissingRegion { param: String },

    /// A region with no defining constraints does not bound the worst case.
    #[error("uncertainty region '{region}' has no defining constraints")]
    EmptyUncertaintySet { region: String },

    /// Region geometry is neither polyhedral nor ellipsoidal and the caller
    /// did not opt into cutting-plane handling.
    #[error("cannot reformulate uncertainty region with unknown geometry: {region}")]
    UnreformulableGeometry { region: String },

    /// The expression depends on uncertain parameters in a way no builder
    /// supports (higher degree, transcendental use, ...).
    #[error("constraint '{constraint}' depends on uncertain parameters in an unsupported way")]
    UnsupportedDependence { constraint: String },

    /// A single constraint references uncertain parameters from more than
    /// one region.
    #[error("constraint '{constraint}' mixes uncertain parameters from different regions")]
    MixedRegions { constraint: String },

    /// The model has no active objective to solve for.
    #[error("model has no active objective")]
    NoActiveObjective,

    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Errors raised by the deterministic solver backend.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    #[error("unknown solver '{0}'; supported values: clarabel")]
    UnknownSolver(String),

    /// Quadratic equalities and indefinite quadratic forms cannot be
    /// expressed as cones.
    #[error("constraint '{0}' is nonconvex and not supported by the conic backend")]
    NonconvexConstraint(String),

    /// The expression is not linear or conic-representable at all.
    #[error("constraint '{0}' is not linear or conic-representable")]
    NonlinearConstraint(String),

    #[error("solver setup failed: {0}")]
    Setup(String),

    #[error("solver failed: {0}")]
    Internal(String),
}
