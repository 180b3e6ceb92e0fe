//! Evaluation requests, results and the batch-evaluation seam.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{FunctionError, OptimError};
use crate::function::{GroupContext, LocalGroup, VectorFunction};

/// One parameter vector to evaluate, tagged with its position in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    /// Position of the request in its batch
    pub id: usize,
    /// Parameter vector
    pub x: Vec<f64>,
}

/// Outcome of one [`EvaluationRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// Id of the request this result answers
    pub id: usize,
    /// Function values; empty on failure
    pub values: Vec<f64>,
    /// Whether the callback succeeded
    pub success: bool,
    /// Callback message on failure
    pub message: Option<String>,
}

impl EvaluationResult {
    /// Successful result.
    pub fn success(id: usize, values: Vec<f64>) -> Self {
        Self {
            id,
            values,
            success: true,
            message: None,
        }
    }

    /// Failed result.
    pub fn failure(id: usize, message: impl Into<String>) -> Self {
        Self {
            id,
            values: Vec::new(),
            success: false,
            message: Some(message.into()),
        }
    }

    /// Build from the callback's return value.
    pub fn from_outcome(id: usize, outcome: Result<Vec<f64>, FunctionError>) -> Self {
        match outcome {
            Ok(values) => Self::success(id, values),
            Err(e) => Self::failure(id, e.message()),
        }
    }
}

/// What the recorder hook receives after each successful evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    /// 1-based index of the evaluation within the solve
    pub evaluation: usize,
    /// Index of the batch the evaluation belonged to
    pub batch: usize,
    /// Parameter vector
    pub x: Vec<f64>,
    /// Total objective
    pub objective: f64,
    /// Raw function values (residuals for least-squares problems)
    pub values: Vec<f64>,
}

/// Anything that can evaluate an ordered batch of parameter vectors.
///
/// Implementations return exactly one value vector per input, in input
/// order. If any evaluation fails, the whole batch fails with
/// `OptimError::EvaluationFailed` and no partial results are returned.
pub trait BatchEvaluator {
    /// Evaluate `points` and return their values in the same order.
    fn evaluate_batch(&mut self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, OptimError>;

    /// Number of evaluations that can run concurrently.
    fn concurrency(&self) -> usize {
        1
    }
}

/// Call `function` at `x`, turning a panic inside the callback into a
/// [`FunctionError`].
pub fn guarded_evaluate(
    function: &dyn VectorFunction,
    x: &[f64],
    group: &mut dyn GroupContext,
) -> Result<Vec<f64>, FunctionError> {
    catch_unwind(AssertUnwindSafe(|| function.evaluate(x, group)))
        .unwrap_or_else(|_| Err(FunctionError::new("function panicked during evaluation")))
}

/// Like [`guarded_evaluate`] for one share of a split evaluation.
pub fn guarded_evaluate_share(function: &dyn VectorFunction, share: &[f64]) -> Result<Vec<f64>, FunctionError> {
    catch_unwind(AssertUnwindSafe(|| function.evaluate_share(share)))
        .unwrap_or_else(|_| Err(FunctionError::new("function panicked while evaluating a share")))
}

/// Evaluates batches one point at a time on the calling process.
pub struct SerialEvaluator<'a> {
    function: &'a dyn VectorFunction,
}

impl<'a> SerialEvaluator<'a> {
    /// Create a serial evaluator over `function`.
    pub fn new(function: &'a dyn VectorFunction) -> Self {
        Self { function }
    }
}

impl BatchEvaluator for SerialEvaluator<'_> {
    fn evaluate_batch(&mut self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, OptimError> {
        let mut group = LocalGroup::new(self.function);
        points
            .iter()
            .enumerate()
            .map(|(index, x)| {
                guarded_evaluate(self.function, x, &mut group).map_err(|e| OptimError::EvaluationFailed {
                    index,
                    message: e.message().to_string(),
                })
            })
            .collect()
    }
}
