//! Implicit filtering for bound-constrained problems.
//!
//! A derivative-free stencil search in coordinates scaled to the bounds.
//! Every iteration evaluates the `2N` points `x ± h·w_i·e_i` (clamped to the
//! bounds, `w_i` the width of the box) as one batch. The best stencil point
//! becomes the new centre if it improves on it; otherwise the stencil
//! failed and `h` shrinks.

use convoy_core::OptimError;
use tracing::{debug, info};

use crate::algorithm::{AlgorithmProperties, Optimiser};
use crate::context::SolveContext;
use crate::state::{AlgorithmOutcome, Termination};
use crate::AlgorithmId;

/// Configuration for the implicit-filtering solver.
#[derive(Debug, Clone)]
pub struct ImfilConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Initial stencil scale, as a fraction of the bound widths
    pub initial_scale: f64,
    /// Factor applied to the scale after a failed stencil
    pub scale_decrease: f64,
    /// Converged once the scale falls below this
    pub scale_tolerance: f64,
}

impl Default for ImfilConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            initial_scale: 0.5,
            scale_decrease: 0.5,
            scale_tolerance: 1e-6,
        }
    }
}

/// Implicit filtering solver. Requires bounds.
#[derive(Debug, Clone)]
pub struct Imfil {
    config: ImfilConfig,
}

impl Imfil {
    /// Create a new solver with default configuration.
    pub fn new() -> Self {
        Self {
            config: ImfilConfig::default(),
        }
    }

    /// Create a new solver with custom configuration.
    pub fn with_config(config: ImfilConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &ImfilConfig {
        &self.config
    }
}

impl Default for Imfil {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimiser for Imfil {
    fn properties(&self) -> AlgorithmProperties {
        AlgorithmId::Imfil.properties()
    }

    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<AlgorithmOutcome, OptimError> {
        let problem = ctx.problem();
        let Some(bounds) = problem.bounds() else {
            return Err(OptimError::BoundsRequired(self.properties().name.to_string()));
        };
        let widths = bounds.widths();

        let mut x = problem.initial().to_vec();
        let values = ctx.evaluate(&x)?;
        let mut f = ctx.objective(&values);
        ctx.set_current(x.clone(), f);
        let mut scale = self.config.initial_scale;
        info!(objective = f, "Starting implicit filtering");

        for _ in 0..self.config.max_iterations {
            if scale < self.config.scale_tolerance {
                return Ok(ctx.finish(AlgorithmOutcome::new(
                    Termination::Converged,
                    format!("stencil scale {:e} within tolerance", scale),
                )));
            }
            if ctx.budget_exhausted() {
                return Ok(ctx.finish(AlgorithmOutcome::new(Termination::BudgetExhausted, "budget spent")));
            }

            let mut stencil = Vec::with_capacity(2 * x.len());
            for (i, w) in widths.iter().enumerate() {
                for sign in [1.0, -1.0] {
                    let mut p = x.clone();
                    p[i] += sign * scale * w;
                    bounds.clamp(&mut p);
                    if p != x {
                        stencil.push(p);
                    }
                }
            }
            if stencil.is_empty() {
                scale *= self.config.scale_decrease;
                continue;
            }

            let (_, objectives) = ctx.evaluate_objectives(&stencil)?;
            let best = objectives
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_nan())
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(j, v)| (j, *v));

            match best {
                Some((j, f_best)) if f_best < f => {
                    debug!(scale, objective = f_best, "Stencil success");
                    x = stencil.swap_remove(j);
                    f = f_best;
                    ctx.set_current(x.clone(), f);
                    ctx.next_iteration();
                }
                _ => {
                    scale *= self.config.scale_decrease;
                    debug!(scale, "Stencil failure");
                }
            }
        }

        Ok(ctx.finish(AlgorithmOutcome::new(
            Termination::MaxIterations,
            format!("{} iterations", self.config.max_iterations),
        )))
    }
}
