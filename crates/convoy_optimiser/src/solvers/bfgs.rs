//! BFGS algorithm for unconstrained optimisation.
//!
//! Gradients are finite-difference batches. The backtracking line search
//! tries as many step lengths per batch as there are worker groups and
//! takes the longest one satisfying the Armijo condition.

use convoy_core::linalg::{dot, norm};
use convoy_core::OptimError;
use tracing::{debug, info};

use crate::algorithm::{AlgorithmProperties, Optimiser};
use crate::context::SolveContext;
use crate::state::{AlgorithmOutcome, Termination};
use crate::AlgorithmId;

/// Configuration for BFGS solver.
#[derive(Debug, Clone)]
pub struct BfgsConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Convergence tolerance for gradient norm
    pub gradient_tolerance: f64,
    /// Convergence tolerance for objective change
    pub objective_tolerance: f64,
    /// Line search parameters (Armijo condition)
    pub c1: f64,
    /// Step-length reduction between line-search trials
    pub backtrack: f64,
    /// Maximum line search trials per iteration
    pub max_line_search: usize,
}

impl Default for BfgsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            gradient_tolerance: 1e-6,
            objective_tolerance: 1e-12,
            c1: 1e-4,
            backtrack: 0.5,
            max_line_search: 20,
        }
    }
}

/// BFGS quasi-Newton solver for unconstrained optimisation.
///
/// Uses the Broyden-Fletcher-Goldfarb-Shanno update for the inverse Hessian approximation.
#[derive(Debug, Clone)]
pub struct Bfgs {
    config: BfgsConfig,
}

impl Bfgs {
    /// Create a new solver with default configuration.
    pub fn new() -> Self {
        Self {
            config: BfgsConfig::default(),
        }
    }

    /// Create a new solver with custom configuration.
    pub fn with_config(config: BfgsConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &BfgsConfig {
        &self.config
    }

    /// BFGS inverse Hessian update.
    fn bfgs_update(&self, h_inv: &mut [Vec<f64>], s: &[f64], y: &[f64], sy: f64) {
        let n = s.len();
        let rho = 1.0 / sy;

        // H_new = (I - rho s y^T) H (I - rho y s^T) + rho s s^T
        let hy: Vec<f64> = h_inv.iter().map(|row| dot(row, y)).collect();
        let yhy = dot(y, &hy);

        for i in 0..n {
            for j in 0..n {
                h_inv[i][j] += rho * ((1.0 + rho * yhy) * s[i] * s[j] - hy[i] * s[j] - s[i] * hy[j]);
            }
        }
    }
}

impl Default for Bfgs {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimiser for Bfgs {
    fn properties(&self) -> AlgorithmProperties {
        AlgorithmId::Bfgs.properties()
    }

    #[allow(clippy::needless_range_loop)]
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<AlgorithmOutcome, OptimError> {
        let n = ctx.problem().n_parameters();
        let mut x = ctx.problem().initial().to_vec();

        // Initialise inverse Hessian as identity
        let mut h_inv = vec![vec![0.0; n]; n];
        for i in 0..n {
            h_inv[i][i] = 1.0;
        }

        let (mut f, mut g) = ctx.gradient(&x, None)?;
        ctx.set_current(x.clone(), f);
        info!(objective = f, "Starting BFGS");

        for _ in 0..self.config.max_iterations {
            let g_norm = norm(&g);
            if g_norm < self.config.gradient_tolerance {
                return Ok(ctx.finish(AlgorithmOutcome::new(
                    Termination::Converged,
                    format!("gradient norm {:e} within tolerance", g_norm),
                )));
            }
            if ctx.budget_exhausted() {
                return Ok(ctx.finish(AlgorithmOutcome::new(Termination::BudgetExhausted, "budget spent")));
            }

            // Search direction p = -H^{-1} g, reset to steepest descent if not downhill
            let mut p: Vec<f64> = h_inv.iter().map(|row| -dot(row, &g)).collect();
            let mut slope = dot(&p, &g);
            if slope >= 0.0 {
                debug!("Resetting inverse Hessian");
                for i in 0..n {
                    for j in 0..n {
                        h_inv[i][j] = if i == j { 1.0 } else { 0.0 };
                    }
                }
                p = g.iter().map(|gi| -gi).collect();
                slope = dot(&p, &g);
            }

            // Backtracking, several step lengths per batch
            let per_batch = ctx.parallelism();
            let mut alpha = 1.0;
            let mut tried = 0;
            let mut accepted: Option<(Vec<f64>, Vec<f64>, f64, f64)> = None;
            while tried < self.config.max_line_search && accepted.is_none() {
                if ctx.budget_exhausted() {
                    return Ok(ctx.finish(AlgorithmOutcome::new(Termination::BudgetExhausted, "budget spent")));
                }
                let count = per_batch.min(self.config.max_line_search - tried);
                let alphas: Vec<f64> = (0..count)
                    .map(|k| alpha * self.config.backtrack.powi(k as i32))
                    .collect();
                let trials: Vec<Vec<f64>> = alphas
                    .iter()
                    .map(|a| x.iter().zip(&p).map(|(xi, pi)| xi + a * pi).collect())
                    .collect();
                let (values, objectives) = ctx.evaluate_objectives(&trials)?;

                accepted = alphas
                    .iter()
                    .zip(trials)
                    .zip(values.into_iter().zip(objectives))
                    .find(|((a, _), (_, f_new))| *f_new <= f + self.config.c1 * *a * slope)
                    .map(|((a, trial), (v, f_new))| (trial, v, f_new, *a));

                tried += count;
                alpha *= self.config.backtrack.powi(count as i32);
            }

            let Some((x_new, values_new, f_new, step)) = accepted else {
                return Ok(ctx.finish(AlgorithmOutcome::new(
                    Termination::Stagnated,
                    format!("line search failed after {} trials", tried),
                )));
            };
            debug!(alpha = step, objective = f_new, "Step accepted");

            let (_, g_new) = ctx.gradient(&x_new, Some(&values_new))?;
            let s: Vec<f64> = p.iter().map(|pi| step * pi).collect();
            let y: Vec<f64> = g_new.iter().zip(&g).map(|(gn, go)| gn - go).collect();
            let f_old = f;

            x = x_new;
            f = f_new;
            g = g_new;
            ctx.set_current(x.clone(), f);
            ctx.next_iteration();

            // Check objective convergence
            if (f_old - f).abs() < self.config.objective_tolerance {
                return Ok(ctx.finish(AlgorithmOutcome::new(
                    Termination::Converged,
                    format!("objective change {:e} within tolerance", f_old - f),
                )));
            }

            let sy = dot(&s, &y);
            if sy > 1e-12 {
                self.bfgs_update(&mut h_inv, &s, &y, sy);
            }
        }

        Ok(ctx.finish(AlgorithmOutcome::new(
            Termination::MaxIterations,
            format!("{} iterations", self.config.max_iterations),
        )))
    }
}
