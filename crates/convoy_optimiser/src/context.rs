//! The view of a solve that an algorithm works through.

use convoy_core::{BatchEvaluator, EvaluationRecord, OptimError, ProblemKind, ProblemSpec};
use tracing::debug;

use crate::finite_difference::{self, Jacobian};
use crate::recorder::Recorder;
use crate::state::{AlgorithmOutcome, AlgorithmState};

/// Problem, evaluator, recorder and state of one solve.
///
/// Every batch an algorithm submits goes through the context, which checks
/// the result shapes, numbers the evaluations, tracks the best point seen
/// and forwards each evaluation to the recorder in submission order. The
/// context is itself a [`BatchEvaluator`], so finite differences computed
/// through it are recorded like any other evaluation.
pub struct SolveContext<'a> {
    problem: &'a ProblemSpec,
    evaluator: &'a mut dyn BatchEvaluator,
    recorder: &'a mut dyn Recorder,
    state: AlgorithmState,
}

impl<'a> SolveContext<'a> {
    pub fn new(
        problem: &'a ProblemSpec,
        evaluator: &'a mut dyn BatchEvaluator,
        recorder: &'a mut dyn Recorder,
    ) -> Self {
        Self {
            problem,
            evaluator,
            recorder,
            state: AlgorithmState::new(problem.initial()),
        }
    }

    /// The problem being solved.
    pub fn problem(&self) -> &'a ProblemSpec {
        self.problem
    }

    /// Current state.
    pub fn state(&self) -> &AlgorithmState {
        &self.state
    }

    /// Number of evaluations the evaluator runs at once (at least 1).
    pub fn parallelism(&self) -> usize {
        self.evaluator.concurrency().max(1)
    }

    /// Evaluations left in the budget.
    pub fn remaining_budget(&self) -> usize {
        self.problem
            .max_function_evaluations()
            .saturating_sub(self.state.evaluations)
    }

    /// Whether the budget is spent. Checked by algorithms between batches.
    pub fn budget_exhausted(&self) -> bool {
        self.remaining_budget() == 0
    }

    /// Total objective of a function result.
    pub fn objective(&self, values: &[f64]) -> f64 {
        self.problem.objective(values)
    }

    /// Evaluate a single point.
    pub fn evaluate(&mut self, x: &[f64]) -> Result<Vec<f64>, OptimError> {
        let mut values = self.evaluate_batch(&[x.to_vec()])?;
        values.pop().ok_or_else(|| OptimError::EvaluationFailed {
            index: 0,
            message: "no result received".to_string(),
        })
    }

    /// Evaluate a batch and return the values with their objectives.
    pub fn evaluate_objectives(&mut self, points: &[Vec<f64>]) -> Result<(Vec<Vec<f64>>, Vec<f64>), OptimError> {
        let values = self.evaluate_batch(points)?;
        let objectives = values.iter().map(|v| self.problem.objective(v)).collect();
        Ok((values, objectives))
    }

    /// Finite-difference Jacobian of the raw function values at `x`.
    pub fn jacobian(&mut self, x: &[f64], base_values: Option<&[f64]>) -> Result<Jacobian, OptimError> {
        let settings = *self.problem.finite_difference();
        finite_difference::jacobian(self, x, base_values, &settings)
    }

    /// Objective and its finite-difference gradient at `x`.
    ///
    /// Least-squares objectives are differentiated through the Jacobian of
    /// the residuals, so scalar algorithms can run on least-squares problems.
    pub fn gradient(&mut self, x: &[f64], base_values: Option<&[f64]>) -> Result<(f64, Vec<f64>), OptimError> {
        let problem = self.problem;
        match problem.kind() {
            ProblemKind::Scalar => {
                let settings = *problem.finite_difference();
                let base = base_values.and_then(|v| v.first().copied());
                finite_difference::gradient(self, x, base, &settings)
            }
            ProblemKind::LeastSquares { sigmas, .. } => {
                let jac = self.jacobian(x, base_values)?;
                let shifted = problem.shifted_residuals(&jac.base_values);
                let objective = shifted.iter().map(|s| s * s).sum();
                let gradient = finite_difference::least_squares_gradient(&shifted, sigmas, &jac.matrix);
                Ok((objective, gradient))
            }
        }
    }

    /// Move the current point.
    pub fn set_current(&mut self, x: Vec<f64>, objective: f64) {
        self.state.current = x;
        self.state.current_objective = objective;
        self.state.trajectory.push(objective);
    }

    /// Count one completed iteration.
    pub fn next_iteration(&mut self) {
        self.state.iterations += 1;
    }

    /// Mark the solve as finished.
    pub fn finish(&mut self, outcome: AlgorithmOutcome) -> AlgorithmOutcome {
        debug!(termination = %outcome.termination, iterations = self.state.iterations, "Algorithm finished");
        self.state.termination = Some(outcome.termination);
        outcome
    }

    /// Hand back the final state.
    pub fn into_state(self) -> AlgorithmState {
        self.state
    }
}

impl BatchEvaluator for SolveContext<'_> {
    fn evaluate_batch(&mut self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, OptimError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        self.state.batches += 1;
        let values = self.evaluator.evaluate_batch(points)?;

        let expected = self.problem.n_values();
        if values.len() != points.len() {
            return Err(OptimError::EvaluationFailed {
                index: values.len().min(points.len()),
                message: format!("{} results for {} points", values.len(), points.len()),
            });
        }
        if let Some(index) = values.iter().position(|v| v.len() != expected) {
            return Err(OptimError::EvaluationFailed {
                index,
                message: format!("returned {} values, expected {}", values[index].len(), expected),
            });
        }

        for (x, v) in points.iter().zip(&values) {
            self.state.evaluations += 1;
            let record = EvaluationRecord {
                evaluation: self.state.evaluations,
                batch: self.state.batches,
                x: x.clone(),
                objective: self.problem.objective(v),
                values: v.clone(),
            };
            self.recorder.record(&record);
            self.state.observe(&record);
        }
        Ok(values)
    }

    fn concurrency(&self) -> usize {
        self.parallelism()
    }
}
