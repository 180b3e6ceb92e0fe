//! Algorithm contract and registry.
//!
//! Every optimisation strategy implements [`Optimiser`]. The built-in
//! strategies are enumerated by [`AlgorithmId`] and can be selected by name;
//! adapters around other libraries implement the same trait and are passed
//! to [`crate::Problem::optimise_with`] directly.

use std::fmt;
use std::str::FromStr;

use convoy_core::{OptimError, ProblemSpec};
use tracing::warn;

use crate::context::SolveContext;
use crate::solvers::{Bfgs, Imfil, LevenbergMarquardt};
use crate::state::AlgorithmOutcome;

/// Static description of an algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmProperties {
    /// Registry name
    pub name: &'static str,
    /// Works on residual vectors rather than a scalar objective
    pub least_squares: bool,
    /// Estimates derivatives by finite differences
    pub uses_derivatives: bool,
    /// Refuses to run without bounds
    pub requires_bounds: bool,
    /// Honours bounds when given
    pub allows_bounds: bool,
}

/// An optimisation strategy.
pub trait Optimiser {
    /// Static description.
    fn properties(&self) -> AlgorithmProperties;

    /// Run to termination. All evaluations go through `ctx`.
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<AlgorithmOutcome, OptimError>;
}

/// An optimisation strategy for residual-vector problems.
pub trait LeastSquaresOptimiser: Optimiser {
    /// Run on a least-squares problem. The caller has checked the problem
    /// kind.
    fn solve_least_squares(&mut self, ctx: &mut SolveContext<'_>) -> Result<AlgorithmOutcome, OptimError>;
}

/// Check that `properties` can run on `problem`.
///
/// Bounds given to an algorithm that cannot honour them are ignored with a
/// warning.
pub fn check_compatibility(properties: &AlgorithmProperties, problem: &ProblemSpec) -> Result<(), OptimError> {
    if properties.least_squares && !problem.is_least_squares() {
        return Err(OptimError::AlgorithmMismatch {
            algorithm: properties.name.to_string(),
        });
    }
    match (problem.bounds().is_some(), properties.requires_bounds, properties.allows_bounds) {
        (false, true, _) => Err(OptimError::BoundsRequired(properties.name.to_string())),
        (true, _, false) => {
            warn!(algorithm = properties.name, "Algorithm does not support bounds, ignoring them");
            Ok(())
        }
        _ => Ok(()),
    }
}

/// The built-in algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmId {
    /// Levenberg-Marquardt with a parallel line search over the damping
    LevenbergMarquardt,
    /// Implicit filtering: bound-constrained stencil search
    Imfil,
    /// BFGS quasi-Newton with finite-difference gradients
    Bfgs,
}

impl AlgorithmId {
    /// Every built-in algorithm, in registry order.
    pub const ALL: [AlgorithmId; 3] = [AlgorithmId::LevenbergMarquardt, AlgorithmId::Imfil, AlgorithmId::Bfgs];

    /// Registry name.
    pub fn name(&self) -> &'static str {
        self.properties().name
    }

    /// Static description.
    pub fn properties(&self) -> AlgorithmProperties {
        match self {
            AlgorithmId::LevenbergMarquardt => AlgorithmProperties {
                name: "levenberg_marquardt",
                least_squares: true,
                uses_derivatives: true,
                requires_bounds: false,
                allows_bounds: true,
            },
            AlgorithmId::Imfil => AlgorithmProperties {
                name: "imfil",
                least_squares: false,
                uses_derivatives: false,
                requires_bounds: true,
                allows_bounds: true,
            },
            AlgorithmId::Bfgs => AlgorithmProperties {
                name: "bfgs",
                least_squares: false,
                uses_derivatives: true,
                requires_bounds: false,
                allows_bounds: false,
            },
        }
    }

    /// Look up an algorithm by name, ignoring case and `-`/`_` differences.
    pub fn from_name(name: &str) -> Result<Self, OptimError> {
        let wanted = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|id| id.name() == wanted)
            .ok_or_else(|| OptimError::UnknownAlgorithm(name.to_string()))
    }

    /// Instance with default settings.
    pub fn create(&self) -> Algorithm {
        match self {
            AlgorithmId::LevenbergMarquardt => Algorithm::LevenbergMarquardt(LevenbergMarquardt::new()),
            AlgorithmId::Imfil => Algorithm::Imfil(Imfil::new()),
            AlgorithmId::Bfgs => Algorithm::Bfgs(Bfgs::new()),
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmId {
    type Err = OptimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Whether `name` names a built-in algorithm.
pub fn does_algorithm_exist(name: &str) -> bool {
    AlgorithmId::from_name(name).is_ok()
}

/// A configured built-in algorithm.
#[derive(Debug, Clone)]
pub enum Algorithm {
    LevenbergMarquardt(LevenbergMarquardt),
    Imfil(Imfil),
    Bfgs(Bfgs),
}

impl Algorithm {
    /// Which algorithm this is.
    pub fn id(&self) -> AlgorithmId {
        match self {
            Algorithm::LevenbergMarquardt(_) => AlgorithmId::LevenbergMarquardt,
            Algorithm::Imfil(_) => AlgorithmId::Imfil,
            Algorithm::Bfgs(_) => AlgorithmId::Bfgs,
        }
    }
}

impl Optimiser for Algorithm {
    fn properties(&self) -> AlgorithmProperties {
        self.id().properties()
    }

    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<AlgorithmOutcome, OptimError> {
        match self {
            Algorithm::LevenbergMarquardt(a) => a.solve(ctx),
            Algorithm::Imfil(a) => a.solve(ctx),
            Algorithm::Bfgs(a) => a.solve(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{Bounds, FunctionError, VectorFunction};
    use std::sync::Arc;

    fn function() -> Arc<dyn VectorFunction> {
        Arc::new(|x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(x.to_vec()) })
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(AlgorithmId::from_name("levenberg_marquardt"), Ok(AlgorithmId::LevenbergMarquardt));
        assert_eq!(AlgorithmId::from_name("Levenberg-Marquardt"), Ok(AlgorithmId::LevenbergMarquardt));
        assert_eq!("bfgs".parse::<AlgorithmId>(), Ok(AlgorithmId::Bfgs));
        assert!(does_algorithm_exist("imfil"));
        assert!(!does_algorithm_exist("simulated_annealing"));
        assert_eq!(
            AlgorithmId::from_name("nelder_mead"),
            Err(OptimError::UnknownAlgorithm("nelder_mead".to_string()))
        );
    }

    #[test]
    fn test_names_round_trip() {
        for id in AlgorithmId::ALL {
            assert_eq!(AlgorithmId::from_name(id.name()), Ok(id));
            assert_eq!(id.create().id(), id);
        }
    }

    #[test]
    fn test_least_squares_algorithm_rejects_scalar_problem() {
        let problem = ProblemSpec::scalar(function(), vec![1.0]);
        let err = check_compatibility(&AlgorithmId::LevenbergMarquardt.properties(), &problem).unwrap_err();
        assert!(matches!(err, OptimError::AlgorithmMismatch { .. }));
        assert!(check_compatibility(&AlgorithmId::Bfgs.properties(), &problem).is_ok());
    }

    #[test]
    fn test_bounds_requirements() {
        let problem = ProblemSpec::scalar(function(), vec![1.0]);
        assert!(matches!(
            check_compatibility(&AlgorithmId::Imfil.properties(), &problem),
            Err(OptimError::BoundsRequired(_))
        ));
        let bounded = problem.with_bounds(Bounds::new(vec![0.0], vec![2.0]).unwrap());
        assert!(check_compatibility(&AlgorithmId::Imfil.properties(), &bounded).is_ok());
        assert!(check_compatibility(&AlgorithmId::Bfgs.properties(), &bounded).is_ok());
    }
}
