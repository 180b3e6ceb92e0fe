//! Finite-difference derivatives over a batch evaluator.
//!
//! Every stencil is submitted as one batch, so with `G` worker groups up to
//! `G` stencil points are evaluated at once. Batch layout:
//!
//! ```text
//! [base?] [x + h_1 e_1 .. x + h_N e_N] [x - h_1 e_1 .. x - h_N e_N]   (centered only)
//! ```
//!
//! The base point is omitted when its values are supplied by the caller.

use convoy_core::linalg::Matrix;
use convoy_core::{BatchEvaluator, FiniteDifferenceMode, FiniteDifferenceSettings, OptimError};
use tracing::debug;

/// Jacobian estimate together with the function values at the base point.
#[derive(Debug, Clone, PartialEq)]
pub struct Jacobian {
    /// Values at the base point
    pub base_values: Vec<f64>,
    /// `m x n` matrix, one row per function value
    pub matrix: Matrix,
    /// Evaluations spent on the estimate
    pub evaluations: usize,
}

/// Stencil points around `x` with their per-parameter steps.
pub fn stencil(
    x: &[f64],
    settings: &FiniteDifferenceSettings,
    include_base: bool,
) -> Result<(Vec<Vec<f64>>, Vec<f64>), OptimError> {
    let steps = settings.steps(x)?;
    let n = x.len();
    let per_side = match settings.mode {
        FiniteDifferenceMode::Forward => 1,
        FiniteDifferenceMode::Centered => 2,
    };
    let mut points = Vec::with_capacity(usize::from(include_base) + per_side * n);
    if include_base {
        points.push(x.to_vec());
    }
    for (i, h) in steps.iter().enumerate() {
        let mut p = x.to_vec();
        p[i] += h;
        points.push(p);
    }
    if settings.mode == FiniteDifferenceMode::Centered {
        for (i, h) in steps.iter().enumerate() {
            let mut p = x.to_vec();
            p[i] -= h;
            points.push(p);
        }
    }
    Ok((points, steps))
}

/// Jacobian of the function at `x`.
///
/// `base_values`, when given, must be the function values at `x`; they
/// save one evaluation. Any failed evaluation fails the whole estimate.
#[allow(clippy::needless_range_loop)]
pub fn jacobian(
    evaluator: &mut dyn BatchEvaluator,
    x: &[f64],
    base_values: Option<&[f64]>,
    settings: &FiniteDifferenceSettings,
) -> Result<Jacobian, OptimError> {
    let n = x.len();
    let (points, steps) = stencil(x, settings, base_values.is_none())?;
    debug!(points = points.len(), mode = ?settings.mode, "Finite-difference batch");
    let mut values = evaluator.evaluate_batch(&points)?.into_iter();

    let base = match base_values {
        Some(v) => v.to_vec(),
        None => values.next().unwrap_or_default(),
    };
    let forward: Vec<Vec<f64>> = values.by_ref().take(n).collect();
    let backward: Vec<Vec<f64>> = values.take(n).collect();

    let m = base.len();
    let mut matrix = vec![vec![0.0; n]; m];
    for i in 0..n {
        let plus = forward.get(i).ok_or_else(|| short_batch(i))?;
        check_len(plus, m, i)?;
        match settings.mode {
            FiniteDifferenceMode::Forward => {
                for k in 0..m {
                    matrix[k][i] = (plus[k] - base[k]) / steps[i];
                }
            }
            FiniteDifferenceMode::Centered => {
                let minus = backward.get(i).ok_or_else(|| short_batch(n + i))?;
                check_len(minus, m, n + i)?;
                for k in 0..m {
                    matrix[k][i] = (plus[k] - minus[k]) / (2.0 * steps[i]);
                }
            }
        }
    }

    Ok(Jacobian {
        base_values: base,
        matrix,
        evaluations: points.len(),
    })
}

/// Gradient of a scalar function at `x`: the single row of its Jacobian.
///
/// Returns the value at `x` and the gradient.
pub fn gradient(
    evaluator: &mut dyn BatchEvaluator,
    x: &[f64],
    base_value: Option<f64>,
    settings: &FiniteDifferenceSettings,
) -> Result<(f64, Vec<f64>), OptimError> {
    let base = base_value.map(|f| vec![f]);
    let jac = jacobian(evaluator, x, base.as_deref(), settings)?;
    let value = jac.base_values.first().copied().unwrap_or(f64::NAN);
    let grad = jac.matrix.into_iter().next().unwrap_or_else(|| vec![0.0; x.len()]);
    Ok((value, grad))
}

/// Gradient of `Σ s_k²` with `s_k = (r_k - t_k) / σ_k`, from the Jacobian
/// of the raw residuals `r`:
///
/// `g_j = Σ_k 2 s_k / σ_k · J_kj`
pub fn least_squares_gradient(shifted: &[f64], sigmas: &[f64], jacobian: &[Vec<f64>]) -> Vec<f64> {
    let n = jacobian.first().map_or(0, Vec::len);
    let mut g = vec![0.0; n];
    for ((s, sigma), row) in shifted.iter().zip(sigmas).zip(jacobian) {
        let w = 2.0 * s / sigma;
        for (gj, jkj) in g.iter_mut().zip(row) {
            *gj += w * jkj;
        }
    }
    g
}

fn short_batch(index: usize) -> OptimError {
    OptimError::EvaluationFailed {
        index,
        message: "evaluator returned fewer results than requested".to_string(),
    }
}

fn check_len(values: &[f64], expected: usize, index: usize) -> Result<(), OptimError> {
    if values.len() != expected {
        return Err(OptimError::EvaluationFailed {
            index,
            message: format!("returned {} values, expected {}", values.len(), expected),
        });
    }
    Ok(())
}
