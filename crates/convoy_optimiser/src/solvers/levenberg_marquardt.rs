//! Levenberg-Marquardt algorithm for nonlinear least squares.
//!
//! Each iteration evaluates the Jacobian as one finite-difference batch,
//! then solves the damped normal equations for a grid of damping values
//! centred on the current λ and evaluates all trial points as a second
//! batch. With `G` worker groups the default grid has `G` points, so the
//! line search costs one round of parallel evaluations.

use convoy_core::linalg::{norm, normal_equations, solve_linear_system, Matrix};
use convoy_core::{OptimError, ProblemKind};
use tracing::{debug, info};

use crate::algorithm::{AlgorithmProperties, LeastSquaresOptimiser, Optimiser};
use crate::context::SolveContext;
use crate::state::{AlgorithmOutcome, Termination};
use crate::AlgorithmId;

/// Damping matrix `D` in `(JᵀJ + λD) Δx = -Jᵀs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Damping {
    /// `D = I`
    #[default]
    Identity,
    /// `D = diag(JᵀJ)`
    Marquardt,
}

/// Configuration for Levenberg-Marquardt solver.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Initial central damping parameter (λ)
    pub initial_lambda: f64,
    /// Factor applied to the best λ after an accepted step
    pub lambda_decrease: f64,
    /// Give up once the central λ exceeds this
    pub max_lambda: f64,
    /// Rejected line searches allowed per iteration
    pub max_rejections: usize,
    /// λ values per line search; `None` means one per worker group
    pub line_search_points: Option<usize>,
    /// Converged when an accepted step is shorter than this
    pub step_tolerance: f64,
    /// Converged when the sum of squares drops to this
    pub objective_tolerance: f64,
    /// Relative decrease a trial needs to be accepted
    pub acceptance_tolerance: f64,
    /// Damping matrix
    pub damping: Damping,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            initial_lambda: 0.01,
            lambda_decrease: 0.1,
            max_lambda: 1e12,
            max_rejections: 4,
            line_search_points: None,
            step_tolerance: 1e-10,
            objective_tolerance: 1e-20,
            acceptance_tolerance: 0.0,
            damping: Damping::Identity,
        }
    }
}

/// Factor by which the central λ grows after a rejected line search with
/// `points` grid values. Also the span of the grid.
pub fn lambda_increase_factor(points: usize) -> f64 {
    let n = points.max(1) as f64;
    let (lo, hi) = (10f64.ln(), 1000f64.ln());
    (hi - (hi - lo) * 3.0 / (n + 2.0)).exp()
}

/// `points` damping values spread logarithmically over one increase factor,
/// centred on `central`.
pub fn lambda_grid(central: f64, points: usize) -> Vec<f64> {
    let n = points.max(1);
    let span = lambda_increase_factor(n).ln();
    (0..n)
        .map(|j| central * (((j as f64 + 0.5) / n as f64 - 0.5) * span).exp())
        .collect()
}

/// Levenberg-Marquardt solver for nonlinear least squares problems.
///
/// Minimises `Σ ((r_k(x) - t_k) / σ_k)²`.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    config: LevenbergMarquardtConfig,
}

impl LevenbergMarquardt {
    /// Create a new solver with default configuration.
    pub fn new() -> Self {
        Self {
            config: LevenbergMarquardtConfig::default(),
        }
    }

    /// Create a new solver with custom configuration.
    pub fn with_config(config: LevenbergMarquardtConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    /// Solve `(JᵀJ + λD) Δx = -Jᵀs` for each λ; singular systems yield `None`.
    fn steps(&self, jtj: &Matrix, jts: &[f64], lambdas: &[f64]) -> Vec<Option<Vec<f64>>> {
        let rhs: Vec<f64> = jts.iter().map(|v| -v).collect();
        let diag: Vec<f64> = (0..jtj.len())
            .map(|i| match self.config.damping {
                Damping::Identity => 1.0,
                Damping::Marquardt if jtj[i][i] > 0.0 => jtj[i][i],
                Damping::Marquardt => 1.0,
            })
            .collect();

        lambdas
            .iter()
            .map(|lambda| {
                let mut a = jtj.clone();
                for (i, d) in diag.iter().enumerate() {
                    a[i][i] += lambda * d;
                }
                solve_linear_system(&a, &rhs).ok()
            })
            .collect()
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimiser for LevenbergMarquardt {
    fn properties(&self) -> AlgorithmProperties {
        AlgorithmId::LevenbergMarquardt.properties()
    }

    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<AlgorithmOutcome, OptimError> {
        if !ctx.problem().is_least_squares() {
            return Err(OptimError::AlgorithmMismatch {
                algorithm: self.properties().name.to_string(),
            });
        }
        self.solve_least_squares(ctx)
    }
}

impl LeastSquaresOptimiser for LevenbergMarquardt {
    fn solve_least_squares(&mut self, ctx: &mut SolveContext<'_>) -> Result<AlgorithmOutcome, OptimError> {
        let problem = ctx.problem();
        let sigmas: Vec<f64> = match problem.kind() {
            ProblemKind::LeastSquares { sigmas, .. } => sigmas.clone(),
            ProblemKind::Scalar => vec![1.0; problem.n_values()],
        };
        let points = self.config.line_search_points.unwrap_or_else(|| ctx.parallelism()).max(1);
        let increase = lambda_increase_factor(points);
        let mut central = self.config.initial_lambda;

        let mut x = problem.initial().to_vec();
        let mut values = ctx.evaluate(&x)?;
        let mut ss = ctx.objective(&values);
        ctx.set_current(x.clone(), ss);
        info!(points, objective = ss, "Starting Levenberg-Marquardt");

        for _ in 0..self.config.max_iterations {
            if ss <= self.config.objective_tolerance {
                return Ok(ctx.finish(AlgorithmOutcome::new(
                    Termination::Converged,
                    format!("sum of squares {:e} within tolerance", ss),
                )));
            }
            if ctx.budget_exhausted() {
                return Ok(ctx.finish(AlgorithmOutcome::new(Termination::BudgetExhausted, "budget spent")));
            }

            // Jacobian of the shifted residuals: rows of J scaled by 1/σ
            let jac = ctx.jacobian(&x, Some(&values))?;
            let scaled: Matrix = jac
                .matrix
                .iter()
                .zip(&sigmas)
                .map(|(row, s)| row.iter().map(|v| v / s).collect())
                .collect();
            let shifted = problem.shifted_residuals(&values);
            let (jtj, jts) = normal_equations(&scaled, &shifted);

            let mut rejections = 0;
            loop {
                if ctx.budget_exhausted() {
                    return Ok(ctx.finish(AlgorithmOutcome::new(Termination::BudgetExhausted, "budget spent")));
                }

                let lambdas = lambda_grid(central, points);
                let mut trial_lambdas = Vec::with_capacity(points);
                let mut trials = Vec::with_capacity(points);
                for (lambda, step) in lambdas.iter().zip(self.steps(&jtj, &jts, &lambdas)) {
                    if let Some(step) = step {
                        let mut trial: Vec<f64> = x.iter().zip(&step).map(|(xi, si)| xi + si).collect();
                        problem.clamp(&mut trial);
                        trial_lambdas.push(*lambda);
                        trials.push(trial);
                    }
                }
                if trials.is_empty() {
                    return Err(OptimError::SingularMatrix);
                }

                let (trial_values, objectives) = ctx.evaluate_objectives(&trials)?;
                let best = objectives
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| !f.is_nan())
                    .min_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(j, _)| j);

                let accepted = best.filter(|&j| {
                    let f = objectives[j];
                    f < ss && f <= ss - self.config.acceptance_tolerance * ss
                });

                if let Some(j) = accepted {
                    let step_norm = norm(&trials[j].iter().zip(&x).map(|(a, b)| a - b).collect::<Vec<_>>());
                    debug!(
                        lambda = trial_lambdas[j],
                        objective = objectives[j],
                        previous = ss,
                        step = step_norm,
                        "Step accepted"
                    );
                    central = trial_lambdas[j] * self.config.lambda_decrease;
                    x = trials[j].clone();
                    ss = objectives[j];
                    values = trial_values[j].clone();
                    ctx.set_current(x.clone(), ss);
                    ctx.next_iteration();

                    if step_norm < self.config.step_tolerance {
                        return Ok(ctx.finish(AlgorithmOutcome::new(
                            Termination::Converged,
                            format!("step {:e} within tolerance", step_norm),
                        )));
                    }
                    break;
                }

                rejections += 1;
                central *= increase;
                debug!(central, rejections, "Line search rejected");
                if rejections > self.config.max_rejections || central > self.config.max_lambda {
                    return Ok(ctx.finish(AlgorithmOutcome::new(
                        Termination::Stagnated,
                        format!("no decrease after {} line searches (lambda {:e})", rejections, central),
                    )));
                }
            }
        }

        Ok(ctx.finish(AlgorithmOutcome::new(
            Termination::MaxIterations,
            format!("{} iterations", self.config.max_iterations),
        )))
    }
}
