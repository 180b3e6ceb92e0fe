//! Problem description supplied by the caller.
//!
//! A [`ProblemSpec`] is immutable once validated. It carries the function
//! reference, the initial point, optional bound constraints, the
//! finite-difference settings and the evaluation budget. Least-squares
//! problems additionally carry the number of residual terms and the
//! targets/sigmas used to form the total objective
//! `Σ ((r_k - t_k) / σ_k)²`.

use std::fmt;
use std::sync::Arc;

use crate::error::OptimError;
use crate::function::VectorFunction;

/// Finite-difference stencil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FiniteDifferenceMode {
    /// One-sided differences, `N + 1` evaluations
    #[default]
    Forward,
    /// Centered differences, `2N + 1` evaluations
    Centered,
}

/// How the finite-difference step relates to the parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepScaling {
    /// `h_i = h`
    #[default]
    Absolute,
    /// `h_i = h * |x_i|`, or `h` where `x_i == 0`
    Relative,
}

/// Finite-difference configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiniteDifferenceSettings {
    /// Stencil shape
    pub mode: FiniteDifferenceMode,
    /// Base step size
    pub step_size: f64,
    /// Absolute or relative step
    pub scaling: StepScaling,
}

impl Default for FiniteDifferenceSettings {
    fn default() -> Self {
        Self {
            mode: FiniteDifferenceMode::Forward,
            step_size: 1e-7,
            scaling: StepScaling::Absolute,
        }
    }
}

impl FiniteDifferenceSettings {
    /// Reject zero, negative and non-finite steps.
    pub fn validate(&self) -> Result<(), OptimError> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(OptimError::InvalidStepSize(self.step_size));
        }
        Ok(())
    }

    /// Per-parameter step sizes at `x`.
    pub fn steps(&self, x: &[f64]) -> Result<Vec<f64>, OptimError> {
        self.validate()?;
        Ok(x.iter()
            .map(|xi| match self.scaling {
                StepScaling::Absolute => self.step_size,
                StepScaling::Relative if *xi == 0.0 => self.step_size,
                StepScaling::Relative => self.step_size * xi.abs(),
            })
            .collect())
    }
}

/// Box constraints `lower <= x <= upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    /// Create bounds, checking that each lower bound does not exceed its
    /// upper bound.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, OptimError> {
        if lower.len() != upper.len() {
            return Err(OptimError::InvalidProblem(format!(
                "lower bounds have {} entries but upper bounds have {}",
                lower.len(),
                upper.len()
            )));
        }
        if let Some(j) = lower.iter().zip(&upper).position(|(lo, hi)| !(lo <= hi)) {
            return Err(OptimError::InvalidProblem(format!(
                "lower bound {} exceeds upper bound {} for parameter {}",
                lower[j], upper[j], j
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Bounds around `x` following `rule`.
    pub fn relative(x: &[f64], rule: &RelativeBounds) -> Result<Self, OptimError> {
        rule.validate()?;
        let mut lower = Vec::with_capacity(x.len());
        let mut upper = Vec::with_capacity(x.len());
        for (j, &xj) in x.iter().enumerate() {
            if !rule.preserve_sign {
                let radius = rule.min_radius.max(rule.max_factor * xj.abs());
                lower.push(-radius);
                upper.push(radius);
                continue;
            }
            if xj == 0.0 {
                return Err(OptimError::InvalidProblem(format!(
                    "parameter {} is zero, so its sign cannot be preserved",
                    j
                )));
            }
            let (a, b) = (rule.min_factor * xj, rule.max_factor * xj);
            let (mut lo, mut hi) = (a.min(b), a.max(b));
            if hi - lo < 2.0 * rule.min_radius {
                let mid = 0.5 * (lo + hi);
                lo = mid - rule.min_radius;
                hi = mid + rule.min_radius;
            }
            lower.push(lo);
            upper.push(hi);
        }
        Self::new(lower, upper)
    }

    /// Lower bounds.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds.
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Number of bounded parameters.
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    /// True if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Clamp `x` component-wise into the box.
    pub fn clamp(&self, x: &mut [f64]) {
        for ((xi, lo), hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *xi = xi.clamp(*lo, *hi);
        }
    }

    /// Width of the box along each parameter.
    pub fn widths(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi - lo)
            .collect()
    }
}

/// Bounds derived from the initial point instead of given explicitly.
///
/// With `preserve_sign` unset, parameter `j` is confined to
/// `[-r_j, r_j]` where `r_j = max(min_radius, max_factor * |x_j|)`.
/// With `preserve_sign` set, it is confined to the interval between
/// `min_factor * x_j` and `max_factor * x_j`, widened about its midpoint to
/// at least `2 * min_radius`; every `x_j` must then be non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeBounds {
    /// Factor giving the bound nearest zero (sign-preserving only)
    pub min_factor: f64,
    /// Factor giving the bound farthest from zero
    pub max_factor: f64,
    /// Smallest half-width of any interval
    pub min_radius: f64,
    /// Keep every parameter on the side of zero it starts on
    pub preserve_sign: bool,
}

impl RelativeBounds {
    /// Reject negative or non-finite factors and radii.
    pub fn validate(&self) -> Result<(), OptimError> {
        let finite = [self.min_factor, self.max_factor, self.min_radius]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_factor < 0.0 || self.min_radius < 0.0 {
            return Err(OptimError::InvalidProblem(format!(
                "relative bounds need finite non-negative factors and radius, got {:?}",
                self
            )));
        }
        if self.max_factor < self.min_factor {
            return Err(OptimError::InvalidProblem(format!(
                "relative bound max_factor {} is below min_factor {}",
                self.max_factor, self.min_factor
            )));
        }
        Ok(())
    }
}

/// Scalar objective or least-squares residual vector.
#[derive(Debug, Clone, PartialEq)]
pub enum ProblemKind {
    /// The function returns one value to minimise
    Scalar,
    /// The function returns `targets.len()` residual terms
    LeastSquares {
        /// Values the residuals are fitted to
        targets: Vec<f64>,
        /// Per-term scale; all non-zero
        sigmas: Vec<f64>,
    },
}

/// Immutable description of an optimisation problem.
#[derive(Clone)]
pub struct ProblemSpec {
    function: Arc<dyn VectorFunction>,
    initial: Vec<f64>,
    kind: ProblemKind,
    bounds: Option<Bounds>,
    finite_difference: FiniteDifferenceSettings,
    max_function_evaluations: usize,
}

impl fmt::Debug for ProblemSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemSpec")
            .field("initial", &self.initial)
            .field("kind", &self.kind)
            .field("bounds", &self.bounds)
            .field("finite_difference", &self.finite_difference)
            .field("max_function_evaluations", &self.max_function_evaluations)
            .finish_non_exhaustive()
    }
}

impl ProblemSpec {
    /// Scalar objective problem starting at `initial`.
    pub fn scalar(function: Arc<dyn VectorFunction>, initial: Vec<f64>) -> Self {
        Self {
            function,
            initial,
            kind: ProblemKind::Scalar,
            bounds: None,
            finite_difference: FiniteDifferenceSettings::default(),
            max_function_evaluations: 10_000,
        }
    }

    /// Least-squares problem with `n_terms` residuals, zero targets and unit
    /// sigmas.
    pub fn least_squares(function: Arc<dyn VectorFunction>, initial: Vec<f64>, n_terms: usize) -> Self {
        Self {
            kind: ProblemKind::LeastSquares {
                targets: vec![0.0; n_terms],
                sigmas: vec![1.0; n_terms],
            },
            ..Self::scalar(function, initial)
        }
    }

    /// Set the residual targets of a least-squares problem.
    pub fn with_targets(mut self, targets: Vec<f64>) -> Self {
        if let ProblemKind::LeastSquares { targets: t, .. } = &mut self.kind {
            *t = targets;
        }
        self
    }

    /// Set the residual sigmas of a least-squares problem.
    pub fn with_sigmas(mut self, sigmas: Vec<f64>) -> Self {
        if let ProblemKind::LeastSquares { sigmas: s, .. } = &mut self.kind {
            *s = sigmas;
        }
        self
    }

    /// Set bound constraints.
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Set bound constraints derived from the initial point.
    pub fn with_relative_bounds(self, rule: &RelativeBounds) -> Result<Self, OptimError> {
        let bounds = Bounds::relative(&self.initial, rule)?;
        Ok(self.with_bounds(bounds))
    }

    /// Set finite-difference settings.
    pub fn with_finite_difference(mut self, settings: FiniteDifferenceSettings) -> Self {
        self.finite_difference = settings;
        self
    }

    /// Set the evaluation budget.
    pub fn with_max_function_evaluations(mut self, budget: usize) -> Self {
        self.max_function_evaluations = budget;
        self
    }

    /// Check the description for consistency.
    ///
    /// # Errors
    ///
    /// - `OptimError::InvalidProblem` for empty parameters, dimension
    ///   mismatches, zero sigmas or an initial point outside the bounds.
    /// - `OptimError::InvalidStepSize` for a non-positive step.
    pub fn validate(&self) -> Result<(), OptimError> {
        let n = self.initial.len();
        if n == 0 {
            return Err(OptimError::InvalidProblem(
                "problem has no parameters".to_string(),
            ));
        }
        if self.max_function_evaluations == 0 {
            return Err(OptimError::InvalidProblem(
                "evaluation budget must be positive".to_string(),
            ));
        }
        if let ProblemKind::LeastSquares { targets, sigmas } = &self.kind {
            if targets.is_empty() {
                return Err(OptimError::InvalidProblem(
                    "least-squares problem has no residual terms".to_string(),
                ));
            }
            if targets.len() != sigmas.len() {
                return Err(OptimError::InvalidProblem(format!(
                    "{} targets but {} sigmas",
                    targets.len(),
                    sigmas.len()
                )));
            }
            if let Some(j) = sigmas.iter().position(|s| *s == 0.0) {
                return Err(OptimError::InvalidProblem(format!(
                    "sigma {} is zero; sigmas must all be nonzero",
                    j
                )));
            }
        }
        if let Some(bounds) = &self.bounds {
            if bounds.len() != n {
                return Err(OptimError::InvalidProblem(format!(
                    "bounds have {} entries but the problem has {} parameters",
                    bounds.len(),
                    n
                )));
            }
            let outside = self
                .initial
                .iter()
                .zip(bounds.lower().iter().zip(bounds.upper()))
                .any(|(x, (lo, hi))| x < lo || x > hi);
            if outside {
                return Err(OptimError::InvalidProblem(
                    "initial point lies outside the bounds".to_string(),
                ));
            }
        }
        self.finite_difference.validate()
    }

    /// The callback.
    pub fn function(&self) -> &Arc<dyn VectorFunction> {
        &self.function
    }

    /// Initial point.
    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    /// Number of parameters.
    pub fn n_parameters(&self) -> usize {
        self.initial.len()
    }

    /// Number of values the function returns.
    pub fn n_values(&self) -> usize {
        match &self.kind {
            ProblemKind::Scalar => 1,
            ProblemKind::LeastSquares { targets, .. } => targets.len(),
        }
    }

    /// Scalar or least-squares.
    pub fn kind(&self) -> &ProblemKind {
        &self.kind
    }

    /// True for residual-vector problems.
    pub fn is_least_squares(&self) -> bool {
        matches!(self.kind, ProblemKind::LeastSquares { .. })
    }

    /// Bound constraints, if any.
    pub fn bounds(&self) -> Option<&Bounds> {
        self.bounds.as_ref()
    }

    /// Finite-difference settings.
    pub fn finite_difference(&self) -> &FiniteDifferenceSettings {
        &self.finite_difference
    }

    /// Evaluation budget.
    pub fn max_function_evaluations(&self) -> usize {
        self.max_function_evaluations
    }

    /// Shifted residuals `(r_k - t_k) / σ_k`; the values themselves for a
    /// scalar problem.
    pub fn shifted_residuals(&self, values: &[f64]) -> Vec<f64> {
        match &self.kind {
            ProblemKind::Scalar => values.to_vec(),
            ProblemKind::LeastSquares { targets, sigmas } => values
                .iter()
                .zip(targets.iter().zip(sigmas))
                .map(|(r, (t, s))| (r - t) / s)
                .collect(),
        }
    }

    /// Total objective of a function result.
    pub fn objective(&self, values: &[f64]) -> f64 {
        match &self.kind {
            ProblemKind::Scalar => values.first().copied().unwrap_or(f64::NAN),
            ProblemKind::LeastSquares { .. } => {
                self.shifted_residuals(values).iter().map(|s| s * s).sum()
            }
        }
    }

    /// Clamp `x` into the bounds when bounds are configured.
    pub fn clamp(&self, x: &mut [f64]) {
        if let Some(bounds) = &self.bounds {
            bounds.clamp(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FunctionError;
    use approx::assert_relative_eq;

    fn identity() -> Arc<dyn VectorFunction> {
        Arc::new(|x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(x.to_vec()) })
    }

    #[test]
    fn test_relative_steps_fall_back_at_zero() {
        let fd = FiniteDifferenceSettings {
            step_size: 1e-3,
            scaling: StepScaling::Relative,
            ..Default::default()
        };
        let steps = fd.steps(&[0.0, -2.0, 10.0]).unwrap();
        assert_relative_eq!(steps[0], 1e-3);
        assert_relative_eq!(steps[1], 2e-3);
        assert_relative_eq!(steps[2], 1e-2);
    }

    #[test]
    fn test_non_positive_step_rejected() {
        for step in [0.0, -1e-6, f64::NAN] {
            let fd = FiniteDifferenceSettings {
                step_size: step,
                ..Default::default()
            };
            assert!(matches!(fd.validate(), Err(OptimError::InvalidStepSize(_))));
        }
    }

    #[test]
    fn test_bounds_clamp() {
        let bounds = Bounds::new(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap();
        let mut x = vec![-3.0, 5.0];
        bounds.clamp(&mut x);
        assert_eq!(x, vec![-1.0, 2.0]);
    }

    #[test]
    fn test_bounds_reject_inverted_box() {
        assert!(Bounds::new(vec![1.0], vec![0.0]).is_err());
        assert!(Bounds::new(vec![0.0], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_relative_bounds_symmetric() {
        let rule = RelativeBounds {
            min_factor: 0.5,
            max_factor: 2.0,
            min_radius: 0.0,
            preserve_sign: false,
        };
        let bounds = Bounds::relative(&[3.0, -2.0], &rule).unwrap();
        assert_eq!(bounds.lower(), &[-6.0, -4.0]);
        assert_eq!(bounds.upper(), &[6.0, 4.0]);

        let wide = RelativeBounds { min_radius: 5.0, ..rule };
        let bounds = Bounds::relative(&[3.0, 0.0], &wide).unwrap();
        assert_eq!(bounds.lower(), &[-6.0, -5.0]);
        assert_eq!(bounds.upper(), &[6.0, 5.0]);
    }

    #[test]
    fn test_relative_bounds_preserve_sign() {
        let rule = RelativeBounds {
            min_factor: 0.5,
            max_factor: 2.0,
            min_radius: 0.0,
            preserve_sign: true,
        };
        let bounds = Bounds::relative(&[3.0, -2.0], &rule).unwrap();
        assert_eq!(bounds.lower(), &[1.5, -4.0]);
        assert_eq!(bounds.upper(), &[6.0, -1.0]);

        // interval [0.5, 2] is widened about its midpoint 1.25
        let wide = RelativeBounds { min_radius: 1.0, ..rule };
        let bounds = Bounds::relative(&[1.0], &wide).unwrap();
        assert_relative_eq!(bounds.lower()[0], 0.25);
        assert_relative_eq!(bounds.upper()[0], 2.25);

        assert!(matches!(Bounds::relative(&[1.0, 0.0], &rule), Err(OptimError::InvalidProblem(_))));
    }

    #[test]
    fn test_relative_bounds_rule_validated() {
        let inverted = RelativeBounds {
            min_factor: 2.0,
            max_factor: 0.5,
            min_radius: 0.0,
            preserve_sign: false,
        };
        assert!(Bounds::relative(&[1.0], &inverted).is_err());
        let negative = RelativeBounds {
            min_radius: -1.0,
            min_factor: 0.5,
            ..inverted
        };
        assert!(Bounds::relative(&[1.0], &negative).is_err());
    }

    #[test]
    fn test_relative_bounds_on_problem() {
        let rule = RelativeBounds {
            min_factor: 0.5,
            max_factor: 2.0,
            min_radius: 0.0,
            preserve_sign: true,
        };
        let spec = ProblemSpec::scalar(identity(), vec![4.0]).with_relative_bounds(&rule).unwrap();
        spec.validate().unwrap();
        let bounds = spec.bounds().unwrap();
        assert_eq!((bounds.lower()[0], bounds.upper()[0]), (2.0, 8.0));
    }

    #[test]
    fn test_least_squares_objective_uses_targets_and_sigmas() {
        let spec = ProblemSpec::least_squares(identity(), vec![0.0, 0.0], 2)
            .with_targets(vec![1.0, 2.0])
            .with_sigmas(vec![2.0, 0.5]);
        spec.validate().unwrap();
        // ((3-1)/2)^2 + ((3-2)/0.5)^2 = 1 + 4
        assert_relative_eq!(spec.objective(&[3.0, 3.0]), 5.0);
    }

    #[test]
    fn test_zero_sigma_rejected() {
        let spec = ProblemSpec::least_squares(identity(), vec![0.0], 2).with_sigmas(vec![1.0, 0.0]);
        assert!(matches!(spec.validate(), Err(OptimError::InvalidProblem(_))));
    }

    #[test]
    fn test_initial_point_outside_bounds_rejected() {
        let spec = ProblemSpec::scalar(identity(), vec![2.0])
            .with_bounds(Bounds::new(vec![0.0], vec![1.0]).unwrap());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_scalar_objective_is_first_value() {
        let spec = ProblemSpec::scalar(identity(), vec![0.0]);
        assert_eq!(spec.n_values(), 1);
        assert_relative_eq!(spec.objective(&[4.5]), 4.5);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn box_and_point() -> impl Strategy<Value = (Vec<f64>, Vec<f64>, Vec<f64>)> {
            (1usize..6).prop_flat_map(|n| {
                (
                    prop::collection::vec(-100.0f64..0.0, n),
                    prop::collection::vec(0.0f64..100.0, n),
                    prop::collection::vec(-500.0f64..500.0, n),
                )
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(300))]

            #[test]
            fn test_clamp_lands_inside_and_is_idempotent((lower, upper, x) in box_and_point()) {
                let bounds = Bounds::new(lower.clone(), upper.clone()).unwrap();
                let mut clamped = x.clone();
                bounds.clamp(&mut clamped);
                for i in 0..x.len() {
                    prop_assert!(clamped[i] >= lower[i] && clamped[i] <= upper[i]);
                    if x[i] >= lower[i] && x[i] <= upper[i] {
                        prop_assert_eq!(clamped[i], x[i]);
                    }
                }
                let again = {
                    let mut c = clamped.clone();
                    bounds.clamp(&mut c);
                    c
                };
                prop_assert_eq!(again, clamped);
            }

            #[test]
            fn test_steps_are_positive(
                x in prop::collection::vec(-1e6f64..1e6, 1..8),
                h in 1e-12f64..1.0,
                relative in any::<bool>(),
            ) {
                let settings = FiniteDifferenceSettings {
                    mode: FiniteDifferenceMode::Forward,
                    step_size: h,
                    scaling: if relative { StepScaling::Relative } else { StepScaling::Absolute },
                };
                let steps = settings.steps(&x).unwrap();
                prop_assert_eq!(steps.len(), x.len());
                prop_assert!(steps.iter().all(|s| *s > 0.0));
            }
        }
    }
}
