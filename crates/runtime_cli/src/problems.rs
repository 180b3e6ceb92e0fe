//! Built-in demonstration problems.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::ValueEnum;
use convoy_core::{Bounds, FunctionError, OptimError, ProblemSpec, ScalarFunction, VectorFunction};

/// Sample times of the linear-fit data.
const FIT_TIMES: [f64; 6] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
/// Observations of `y = 1.5 + 0.8 t` with a little noise.
const FIT_OBSERVATIONS: [f64; 6] = [1.52, 2.28, 3.13, 3.88, 4.71, 5.49];
/// Measurement errors of the observations.
const FIT_SIGMAS: [f64; 6] = [0.05, 0.05, 0.1, 0.1, 0.2, 0.2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoProblem {
    /// Rosenbrock valley as two residuals
    Rosenbrock,
    /// Separable quadratic bowl, scalar objective
    Quadratic,
    /// Straight line through weighted observations
    LinearFit,
}

impl DemoProblem {
    /// Problem description. Each evaluation sleeps for `delay` to mimic an
    /// expensive model.
    pub fn spec(&self, delay: Duration) -> ProblemSpec {
        match self {
            DemoProblem::Rosenbrock => {
                let f = move |p: &[f64]| -> Result<Vec<f64>, FunctionError> {
                    pause(delay);
                    Ok(vec![1.0 - p[0], 10.0 * (p[1] - p[0] * p[0])])
                };
                ProblemSpec::least_squares(Arc::new(f), vec![-1.2, 1.0], 2)
            }
            DemoProblem::Quadratic => {
                let f = ScalarFunction::new(move |p: &[f64]| {
                    pause(delay);
                    Ok(p.iter().enumerate().map(|(i, x)| (x - i as f64).powi(2)).sum())
                });
                let function: Arc<dyn VectorFunction> = Arc::new(f);
                ProblemSpec::scalar(function, vec![0.5; 3])
            }
            DemoProblem::LinearFit => {
                let f = move |p: &[f64]| -> Result<Vec<f64>, FunctionError> {
                    pause(delay);
                    Ok(FIT_TIMES.iter().map(|t| p[0] + p[1] * t).collect())
                };
                ProblemSpec::least_squares(Arc::new(f), vec![0.0, 0.0], FIT_TIMES.len())
                    .with_targets(FIT_OBSERVATIONS.to_vec())
                    .with_sigmas(FIT_SIGMAS.to_vec())
            }
        }
    }

    /// Bounds used by algorithms that need them when none are configured.
    pub fn default_bounds(&self) -> Result<Bounds, OptimError> {
        let (lower, upper) = match self {
            DemoProblem::Rosenbrock => (vec![-2.0, -2.0], vec![2.0, 2.0]),
            DemoProblem::Quadratic => (vec![-5.0; 3], vec![5.0; 3]),
            DemoProblem::LinearFit => (vec![-10.0, -10.0], vec![10.0, 10.0]),
        };
        Bounds::new(lower, upper)
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
