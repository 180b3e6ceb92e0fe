//! Objective and residual callbacks.
//!
//! A [`VectorFunction`] maps a parameter vector to a vector of values: one
//! value for a scalar objective, `N_terms` values for a least-squares
//! residual. The function is evaluated on a group leader, which may split
//! the work into shares and scatter them across the members of its worker
//! group through a [`GroupContext`].
//!
//! Functions must be callable independently and concurrently on different
//! processes, hence the `Send + Sync` bound.

use crate::error::FunctionError;

/// Access to the worker group that cooperates on one evaluation.
pub trait GroupContext {
    /// Number of processes in the group, leader included.
    fn size(&self) -> usize;

    /// Evaluate `shares` across the group and return the results in the same
    /// order as the input, whichever member computed them.
    ///
    /// Every share is passed to [`VectorFunction::evaluate_share`] on the
    /// member that receives it.
    fn scatter(&mut self, shares: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, FunctionError>;
}

/// User-supplied objective or residual function.
///
/// Closures of type `Fn(&[f64]) -> Result<Vec<f64>, FunctionError>` implement
/// this trait directly; they ignore the worker group.
pub trait VectorFunction: Send + Sync {
    /// Evaluate the function at `x` on a group leader.
    fn evaluate(&self, x: &[f64], group: &mut dyn GroupContext) -> Result<Vec<f64>, FunctionError>;

    /// Evaluate one share of a split evaluation on a group member.
    fn evaluate_share(&self, _share: &[f64]) -> Result<Vec<f64>, FunctionError> {
        Err(FunctionError::new(
            "function does not split work across its worker group",
        ))
    }
}

impl<F> VectorFunction for F
where
    F: Fn(&[f64]) -> Result<Vec<f64>, FunctionError> + Send + Sync,
{
    fn evaluate(&self, x: &[f64], _group: &mut dyn GroupContext) -> Result<Vec<f64>, FunctionError> {
        self(x)
    }
}

/// Adapter turning a scalar objective closure into a one-valued
/// [`VectorFunction`].
pub struct ScalarFunction<F> {
    objective: F,
}

impl<F> ScalarFunction<F>
where
    F: Fn(&[f64]) -> Result<f64, FunctionError> + Send + Sync,
{
    /// Wrap a scalar objective.
    pub fn new(objective: F) -> Self {
        Self { objective }
    }
}

impl<F> VectorFunction for ScalarFunction<F>
where
    F: Fn(&[f64]) -> Result<f64, FunctionError> + Send + Sync,
{
    fn evaluate(&self, x: &[f64], _group: &mut dyn GroupContext) -> Result<Vec<f64>, FunctionError> {
        (self.objective)(x).map(|f| vec![f])
    }
}

/// Group of one: shares are evaluated in turn on the calling process.
pub struct LocalGroup<'a> {
    function: &'a dyn VectorFunction,
}

impl<'a> LocalGroup<'a> {
    /// Create a single-process group for `function`.
    pub fn new(function: &'a dyn VectorFunction) -> Self {
        Self { function }
    }
}

impl GroupContext for LocalGroup<'_> {
    fn size(&self) -> usize {
        1
    }

    fn scatter(&mut self, shares: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, FunctionError> {
        shares
            .iter()
            .map(|share| self.function.evaluate_share(share))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SumOfSquares;

    impl VectorFunction for SumOfSquares {
        fn evaluate(&self, x: &[f64], group: &mut dyn GroupContext) -> Result<Vec<f64>, FunctionError> {
            let shares = x.iter().map(|xi| vec![*xi]).collect();
            let parts = group.scatter(shares)?;
            Ok(vec![parts.iter().map(|p| p[0]).sum()])
        }

        fn evaluate_share(&self, share: &[f64]) -> Result<Vec<f64>, FunctionError> {
            Ok(vec![share[0] * share[0]])
        }
    }

    #[test]
    fn test_closure_is_vector_function() {
        let f = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(vec![x[0] + 1.0]) };
        let mut group = LocalGroup::new(&f);
        assert_eq!(f.evaluate(&[1.0], &mut group).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_scalar_function_wraps_value() {
        let f = ScalarFunction::new(|x: &[f64]| Ok(x.iter().sum::<f64>()));
        let mut group = LocalGroup::new(&f);
        assert_eq!(f.evaluate(&[1.0, 2.0], &mut group).unwrap(), vec![3.0]);
    }

    #[test]
    fn test_local_group_scatter_keeps_order() {
        let f = SumOfSquares;
        let mut group = LocalGroup::new(&f);
        assert_eq!(group.size(), 1);
        assert_eq!(f.evaluate(&[1.0, 2.0, 3.0], &mut group).unwrap(), vec![14.0]);
    }

    #[test]
    fn test_default_share_is_unsupported() {
        let f = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(x.to_vec()) };
        assert!(f.evaluate_share(&[1.0]).is_err());
    }
}
