use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use convoy_cluster::{Cluster, Partition};
use convoy_core::{
    Bounds, FiniteDifferenceMode, FiniteDifferenceSettings, FunctionError, GroupContext, OptimError, ProblemSpec,
    ScalarFunction, StepScaling, VectorFunction,
};
use convoy_optimiser::{
    AlgorithmId, LevenbergMarquardt, LevenbergMarquardtConfig, MemoryRecorder, Optimiser, Problem, SolveContext,
    Termination,
};

fn identity(x: &[f64]) -> Result<Vec<f64>, FunctionError> {
    Ok(x.to_vec())
}

fn rosenbrock(p: &[f64]) -> Result<Vec<f64>, FunctionError> {
    Ok(vec![1.0 - p[0], 10.0 * (p[1] - p[0] * p[0])])
}

fn partition(world: usize, groups: usize) -> Arc<Partition> {
    Arc::new(Partition::create(world, groups).unwrap())
}

#[test]
fn test_lm_identity_residuals_over_cluster() {
    let spec = ProblemSpec::least_squares(Arc::new(identity), vec![1.0, -2.0, 0.5], 3);
    let mut recorder = MemoryRecorder::new();

    let state = Cluster::new(partition(6, 3))
        .with_reply_timeout(Duration::from_secs(30))
        .run(&identity, |evaluator| {
            let mut ctx = SolveContext::new(&spec, evaluator, &mut recorder);
            let outcome = LevenbergMarquardt::new().solve(&mut ctx)?;
            assert_eq!(outcome.termination, Termination::Converged);
            Ok(ctx.into_state())
        })
        .unwrap();

    assert!(state.iterations < 50);
    assert!(state.trajectory.windows(2).all(|w| w[1] < w[0]));
    let best = state.best.unwrap();
    assert!(best.objective < 1e-12);
    for v in &best.x {
        assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-6);
    }
}

#[test]
fn test_lm_rosenbrock_matches_serial_run() {
    let spec = ProblemSpec::least_squares(Arc::new(rosenbrock), vec![-1.0, 1.0], 2);
    let config = LevenbergMarquardtConfig {
        line_search_points: Some(4),
        ..Default::default()
    };

    let parallel = Problem::new(spec.clone(), partition(4, 4))
        .optimise_with(&mut LevenbergMarquardt::with_config(config.clone()), &mut MemoryRecorder::new())
        .unwrap();
    let serial = Problem::new(spec, partition(1, 1))
        .optimise_with(&mut LevenbergMarquardt::with_config(config), &mut MemoryRecorder::new())
        .unwrap();

    assert!(parallel.converged);
    assert_eq!(parallel.parameters, serial.parameters);
    assert_eq!(parallel.function_evaluations, serial.function_evaluations);
    assert_abs_diff_eq!(parallel.parameters[0], 1.0, epsilon = 1e-4);
    assert_abs_diff_eq!(parallel.parameters[1], 1.0, epsilon = 1e-4);
}

#[test]
fn test_failing_evaluation_yields_no_jacobian() {
    let f = |x: &[f64]| -> Result<Vec<f64>, FunctionError> {
        if x[1] > 0.0 {
            Err(FunctionError::new("outside model domain"))
        } else {
            Ok(vec![x[0], x[1]])
        }
    };
    let spec = ProblemSpec::least_squares(Arc::new(f), vec![1.0, 0.0], 2).with_finite_difference(
        FiniteDifferenceSettings {
            mode: FiniteDifferenceMode::Forward,
            step_size: 1e-3,
            scaling: StepScaling::Absolute,
        },
    );
    let mut recorder = MemoryRecorder::new();

    let err = Cluster::new(partition(3, 3))
        .run(&f, |evaluator| {
            let mut ctx = SolveContext::new(&spec, evaluator, &mut recorder);
            ctx.jacobian(&[1.0, 0.0], None).map(|_| ())
        })
        .unwrap_err();

    // stencil order: base, x + h e0, x + h e1
    assert_eq!(
        err,
        OptimError::EvaluationFailed {
            index: 2,
            message: "outside model domain".to_string()
        }
    );
    assert!(recorder.records().is_empty());
}

#[test]
fn test_failure_inside_solve_is_returned_from_problem() {
    let f = |x: &[f64]| -> Result<Vec<f64>, FunctionError> {
        if x[0] < 0.5 {
            Err(FunctionError::new("rate went negative"))
        } else {
            Ok(vec![x[0] - 0.25])
        }
    };
    let spec = ProblemSpec::least_squares(Arc::new(f), vec![1.0], 1);
    let err = Problem::new(spec, partition(4, 2))
        .with_reply_timeout(Duration::from_secs(30))
        .optimise(AlgorithmId::LevenbergMarquardt)
        .unwrap_err();
    assert!(matches!(err, OptimError::EvaluationFailed { .. }));
}

#[test]
fn test_unresponsive_leader_aborts_solve() {
    let slow_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&slow_calls);
    // only the first Jacobian point moves x[0]; it lands on the other group's leader
    let f = move |x: &[f64]| -> Result<Vec<f64>, FunctionError> {
        if x[0] != 1.0 {
            thread::sleep(Duration::from_millis(400));
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(vec![x[0] - 3.0, x[1] + 1.0])
    };
    let spec = ProblemSpec::least_squares(Arc::new(f), vec![1.0, 2.0], 2);
    let mut recorder = MemoryRecorder::new();

    let err = Problem::new(spec, partition(2, 2))
        .with_reply_timeout(Duration::from_millis(100))
        .optimise_with(&mut LevenbergMarquardt::new(), &mut recorder)
        .unwrap_err();

    assert_eq!(err, OptimError::WorkerUnreachable { rank: 1 });
    assert!(recorder.is_finalized());
    assert_eq!(recorder.records().len(), 1);
    // the slow leader was stopped and joined before the solve returned
    assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_recorder_sees_every_evaluation_in_order() {
    let spec = ProblemSpec::least_squares(Arc::new(rosenbrock), vec![-1.0, 1.0], 2);
    let mut recorder = MemoryRecorder::new();
    let result = Problem::new(spec, partition(5, 3))
        .optimise_with(&mut AlgorithmId::LevenbergMarquardt.create(), &mut recorder)
        .unwrap();

    let records = recorder.records();
    assert_eq!(records.len(), result.function_evaluations);
    assert!(records.windows(2).all(|w| w[1].evaluation == w[0].evaluation + 1));
    assert!(records.windows(2).all(|w| w[1].batch >= w[0].batch));
    assert!(recorder.is_finalized());

    let best = recorder.best().unwrap();
    assert_eq!(Some(best.evaluation), result.best_evaluation);
    assert_eq!(best.x, result.parameters);
    assert!(records.iter().all(|r| r.objective >= best.objective));
}

#[test]
fn test_budget_exhaustion() {
    let spec = ProblemSpec::least_squares(Arc::new(rosenbrock), vec![-1.2, 1.0], 2).with_max_function_evaluations(12);
    let result = Problem::new(spec, partition(3, 3))
        .optimise(AlgorithmId::LevenbergMarquardt)
        .unwrap();
    assert_eq!(result.termination, Termination::BudgetExhausted);
    assert!(!result.converged);
    // one batch may overshoot the budget
    assert!(result.function_evaluations >= 12);
    assert!(result.function_evaluations < 12 + 3);
}

#[test]
fn test_imfil_over_cluster() {
    let objective = ScalarFunction::new(|x: &[f64]| Ok((x[0] - 0.2).powi(2) + (x[1] - 0.9).powi(2) + 1.0));
    let spec = ProblemSpec::scalar(Arc::new(objective), vec![0.0, 0.0])
        .with_bounds(Bounds::new(vec![-1.0, -1.0], vec![1.0, 0.5]).unwrap());
    let result = Problem::new(spec, partition(4, 4))
        .optimise(AlgorithmId::Imfil)
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.algorithm, "imfil");
    assert_abs_diff_eq!(result.parameters[0], 0.2, epsilon = 1e-4);
    assert_abs_diff_eq!(result.parameters[1], 0.5, epsilon = 1e-12);
}

#[test]
fn test_bfgs_over_cluster() {
    let objective = ScalarFunction::new(|p: &[f64]| Ok((p[0] - 2.0).powi(2) + 4.0 * (p[1] + 1.0).powi(2)));
    let spec = ProblemSpec::scalar(Arc::new(objective), vec![0.0, 0.0]);
    let result = Problem::new(spec, partition(3, 3))
        .optimise(AlgorithmId::Bfgs)
        .unwrap();

    assert!(result.converged);
    assert!(result.residuals.is_none());
    assert_abs_diff_eq!(result.parameters[0], 2.0, epsilon = 0.01);
    assert_abs_diff_eq!(result.parameters[1], -1.0, epsilon = 0.01);
}

/// Residuals `x_k - k`, one share per term scattered across the group.
struct ScatteredResiduals;

impl VectorFunction for ScatteredResiduals {
    fn evaluate(&self, x: &[f64], group: &mut dyn GroupContext) -> Result<Vec<f64>, FunctionError> {
        let shares = x.iter().enumerate().map(|(k, v)| vec![k as f64, *v]).collect();
        Ok(group.scatter(shares)?.into_iter().map(|r| r[0]).collect())
    }

    fn evaluate_share(&self, share: &[f64]) -> Result<Vec<f64>, FunctionError> {
        Ok(vec![share[1] - share[0]])
    }
}

#[test]
fn test_lm_with_split_evaluations() {
    let spec = ProblemSpec::least_squares(Arc::new(ScatteredResiduals), vec![5.0; 4], 4);
    let result = Problem::new(spec, partition(6, 2))
        .with_reply_timeout(Duration::from_secs(30))
        .optimise(AlgorithmId::LevenbergMarquardt)
        .unwrap();

    assert!(result.converged);
    for (k, v) in result.parameters.iter().enumerate() {
        assert_abs_diff_eq!(*v, k as f64, epsilon = 1e-6);
    }
    assert_eq!(result.residuals.as_ref().map(Vec::len), Some(4));
}

#[test]
fn test_scalar_problem_rejected_by_least_squares_algorithm() {
    let objective = ScalarFunction::new(|p: &[f64]| Ok(p[0] * p[0]));
    let spec = ProblemSpec::scalar(Arc::new(objective), vec![1.0]);
    assert!(matches!(
        Problem::new(spec, partition(2, 2)).optimise(AlgorithmId::LevenbergMarquardt),
        Err(OptimError::AlgorithmMismatch { .. })
    ));
}
