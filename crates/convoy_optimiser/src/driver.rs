//! Running an algorithm on a problem over a cluster.

use std::sync::Arc;
use std::time::Duration;

use convoy_cluster::{Cluster, Partition};
use convoy_core::{BatchEvaluator, OptimError, ProblemSpec};
use tracing::{info, warn};

use crate::algorithm::{check_compatibility, AlgorithmId, Optimiser};
use crate::context::SolveContext;
use crate::recorder::{NullRecorder, Recorder};
use crate::state::Termination;

/// Optimisation result.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisationResult {
    /// Best parameters seen
    pub parameters: Vec<f64>,
    /// Objective at the best parameters
    pub objective: f64,
    /// Number of iterations
    pub iterations: usize,
    /// Number of function evaluations
    pub function_evaluations: usize,
    /// Convergence status
    pub converged: bool,
    /// Why the algorithm stopped
    pub termination: Termination,
    /// Algorithm's description of the termination
    pub message: String,
    /// Residuals at the best parameters, for least-squares problems
    pub residuals: Option<Vec<f64>>,
    /// Index of the best evaluation (1-based, as recorded)
    pub best_evaluation: Option<usize>,
    /// Name of the algorithm that ran
    pub algorithm: &'static str,
}

/// A problem bound to the partition it is solved on.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use convoy_cluster::Partition;
/// use convoy_core::{FunctionError, ProblemSpec};
/// use convoy_optimiser::{AlgorithmId, Problem};
///
/// let residuals = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(vec![x[0] - 3.0, x[1] + 1.0]) };
/// let spec = ProblemSpec::least_squares(Arc::new(residuals), vec![0.0, 0.0], 2);
/// let partition = Arc::new(Partition::create(4, 2).unwrap());
///
/// let result = Problem::new(spec, partition)
///     .optimise(AlgorithmId::LevenbergMarquardt)
///     .unwrap();
/// assert!(result.converged);
/// assert!((result.parameters[0] - 3.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct Problem {
    spec: ProblemSpec,
    partition: Arc<Partition>,
    reply_timeout: Option<Duration>,
}

impl Problem {
    pub fn new(spec: ProblemSpec, partition: Arc<Partition>) -> Self {
        Self {
            spec,
            partition,
            reply_timeout: None,
        }
    }

    /// Treat a process as unreachable if it takes longer than `timeout` to
    /// reply.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// The problem description.
    pub fn spec(&self) -> &ProblemSpec {
        &self.spec
    }

    /// The partition solves run on.
    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    /// Solve with a built-in algorithm at its default settings.
    pub fn optimise(&self, algorithm: AlgorithmId) -> Result<OptimisationResult, OptimError> {
        let mut optimiser = algorithm.create();
        self.optimise_with(&mut optimiser, &mut NullRecorder)
    }

    /// Solve with any optimiser over the cluster, recording every
    /// evaluation.
    ///
    /// Every process is started before the algorithm runs and stopped
    /// before this returns, whatever the outcome.
    pub fn optimise_with(
        &self,
        optimiser: &mut dyn Optimiser,
        recorder: &mut dyn Recorder,
    ) -> Result<OptimisationResult, OptimError> {
        self.prepare(optimiser)?;
        let mut cluster = Cluster::new(Arc::clone(&self.partition));
        if let Some(timeout) = self.reply_timeout {
            cluster = cluster.with_reply_timeout(timeout);
        }
        let function = Arc::clone(self.spec.function());
        cluster.run(function.as_ref(), |evaluator| {
            solve(&self.spec, optimiser, evaluator, recorder)
        })
    }

    /// Solve with any optimiser on a caller-supplied evaluator, bypassing
    /// the cluster.
    pub fn optimise_on(
        &self,
        optimiser: &mut dyn Optimiser,
        evaluator: &mut dyn BatchEvaluator,
        recorder: &mut dyn Recorder,
    ) -> Result<OptimisationResult, OptimError> {
        self.prepare(optimiser)?;
        solve(&self.spec, optimiser, evaluator, recorder)
    }

    fn prepare(&self, optimiser: &dyn Optimiser) -> Result<(), OptimError> {
        self.spec.validate()?;
        check_compatibility(&optimiser.properties(), &self.spec)
    }
}

fn solve(
    spec: &ProblemSpec,
    optimiser: &mut dyn Optimiser,
    evaluator: &mut dyn BatchEvaluator,
    recorder: &mut dyn Recorder,
) -> Result<OptimisationResult, OptimError> {
    let algorithm = optimiser.properties().name;
    info!(
        algorithm,
        parameters = spec.n_parameters(),
        parallelism = evaluator.concurrency(),
        budget = spec.max_function_evaluations(),
        "Starting solve"
    );

    recorder.init(spec);
    let mut ctx = SolveContext::new(spec, evaluator, recorder);
    let outcome = optimiser.solve(&mut ctx);
    let state = ctx.into_state();
    recorder.finalize(state.best.as_ref());

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(algorithm, error = %e, evaluations = state.evaluations, "Solve failed");
            return Err(e);
        }
    };

    let (parameters, objective, residuals, best_evaluation) = match state.best {
        Some(best) => (best.x, best.objective, Some(best.values), Some(best.evaluation)),
        None => (state.current, state.current_objective, None, None),
    };
    let result = OptimisationResult {
        parameters,
        objective,
        iterations: state.iterations,
        function_evaluations: state.evaluations,
        converged: outcome.termination.is_converged(),
        termination: outcome.termination,
        message: outcome.message,
        residuals: residuals.filter(|_| spec.is_least_squares()),
        best_evaluation,
        algorithm,
    };
    info!(
        algorithm,
        termination = %result.termination,
        objective = result.objective,
        iterations = result.iterations,
        evaluations = result.function_evaluations,
        "Solve finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use crate::solvers::LevenbergMarquardt;
    use approx::assert_abs_diff_eq;
    use convoy_core::{Bounds, FunctionError, SerialEvaluator};

    fn linear(x: &[f64]) -> Result<Vec<f64>, FunctionError> {
        Ok(vec![x[0] - 2.0, x[1] - 1.0, x[0] + x[1] - 3.0])
    }

    fn serial_problem(spec: ProblemSpec) -> Problem {
        Problem::new(spec, Arc::new(Partition::create(1, 1).unwrap()))
    }

    #[test]
    fn test_optimise_on_serial_evaluator() {
        let problem = serial_problem(ProblemSpec::least_squares(Arc::new(linear), vec![0.0, 0.0], 3));
        let f = linear;
        let mut evaluator = SerialEvaluator::new(&f);
        let mut recorder = MemoryRecorder::new();
        let result = problem
            .optimise_on(&mut LevenbergMarquardt::new(), &mut evaluator, &mut recorder)
            .unwrap();

        assert!(result.converged);
        assert_eq!(result.algorithm, "levenberg_marquardt");
        assert_abs_diff_eq!(result.parameters[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.parameters[1], 1.0, epsilon = 1e-6);
        assert_eq!(result.function_evaluations, recorder.records().len());
        assert!(recorder.is_finalized());
        assert_eq!(recorder.best().map(|r| r.evaluation), result.best_evaluation);
        assert_eq!(result.residuals.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_incompatible_algorithm_rejected_before_any_evaluation() {
        let scalar = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(vec![x[0] * x[0]]) };
        let problem = serial_problem(ProblemSpec::scalar(Arc::new(scalar), vec![1.0]));
        let mut recorder = MemoryRecorder::new();
        let err = problem
            .optimise_with(&mut AlgorithmId::LevenbergMarquardt.create(), &mut recorder)
            .unwrap_err();
        assert!(matches!(err, OptimError::AlgorithmMismatch { .. }));
        assert!(recorder.records().is_empty());
        assert!(!recorder.is_finalized());

        let err = problem.optimise(AlgorithmId::Imfil).unwrap_err();
        assert!(matches!(err, OptimError::BoundsRequired(_)));
    }

    #[test]
    fn test_invalid_problem_rejected() {
        let problem = serial_problem(
            ProblemSpec::least_squares(Arc::new(linear), vec![0.0, 0.0], 3).with_sigmas(vec![1.0, 0.0, 1.0]),
        );
        assert!(matches!(
            problem.optimise(AlgorithmId::LevenbergMarquardt),
            Err(OptimError::InvalidProblem(_))
        ));
    }

    #[test]
    fn test_scalar_result_has_no_residuals() {
        let scalar = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(vec![(x[0] - 0.25).powi(2)]) };
        let spec = ProblemSpec::scalar(Arc::new(scalar), vec![0.9])
            .with_bounds(Bounds::new(vec![0.0], vec![1.0]).unwrap());
        let result = serial_problem(spec).optimise(AlgorithmId::Imfil).unwrap();
        assert!(result.residuals.is_none());
        assert_abs_diff_eq!(result.parameters[0], 0.25, epsilon = 1e-4);
    }
}
