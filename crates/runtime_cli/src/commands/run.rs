//! Run command implementation
//!
//! Solves one of the demonstration problems over a cluster built from the
//! settings.

use std::io::Write;
use std::time::Duration;

use clap::Args;
use convoy_optimiser::{AlgorithmId, NullRecorder, OptimisationResult, Problem, Recorder, TracingRecorder};
use infra_config::Settings;
use tracing::info;

use crate::problems::DemoProblem;
use crate::setup;
use crate::Result;

/// Arguments of the run command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Problem to solve
    #[arg(short, long, value_enum, default_value_t = DemoProblem::Rosenbrock)]
    pub problem: DemoProblem,

    /// Algorithm name (defaults to `optimiser.algorithm` from the settings)
    #[arg(short, long)]
    pub algorithm: Option<String>,

    /// Milliseconds each evaluation sleeps, to mimic an expensive model
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Log every evaluation
    #[arg(long)]
    pub trace_evaluations: bool,
}

/// Run the run command
pub fn run(settings: &Settings, args: &RunArgs) -> Result<()> {
    let id = AlgorithmId::from_name(args.algorithm.as_deref().unwrap_or(&settings.optimiser.algorithm))?;

    let mut spec = args
        .problem
        .spec(Duration::from_millis(args.delay_ms))
        .with_finite_difference(setup::finite_difference(&settings.optimiser.finite_difference))
        .with_max_function_evaluations(settings.optimiser.max_function_evaluations);
    if let Some(bounds) = &settings.optimiser.bounds {
        let bounds = setup::bounds(bounds, spec.initial())?;
        spec = spec.with_bounds(bounds);
    } else if id.properties().requires_bounds {
        spec = spec.with_bounds(args.problem.default_bounds()?);
    }

    let mut problem = Problem::new(spec, setup::partition(&settings.cluster)?);
    if let Some(timeout) = settings.cluster.reply_timeout() {
        problem = problem.with_reply_timeout(timeout);
    }

    let mut algorithm = setup::algorithm(id, settings);
    let mut recorder: Box<dyn Recorder> = if args.trace_evaluations {
        Box::new(TracingRecorder)
    } else {
        Box::new(NullRecorder)
    };
    info!(problem = ?args.problem, algorithm = %id, "Solving demo problem");
    let result = problem.optimise_with(&mut algorithm, recorder.as_mut())?;

    report(&result)
}

fn report(result: &OptimisationResult) -> Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "Algorithm:   {}", result.algorithm)?;
    writeln!(out, "Termination: {} ({})", result.termination, result.message)?;
    writeln!(out, "Objective:   {:.6e}", result.objective)?;
    writeln!(out, "Iterations:  {}", result.iterations)?;
    writeln!(out, "Evaluations: {}", result.function_evaluations)?;
    if let Some(index) = result.best_evaluation {
        writeln!(out, "Best found at evaluation {}", index)?;
    }
    writeln!(out, "Parameters:")?;
    for (i, p) in result.parameters.iter().enumerate() {
        writeln!(out, "  x[{}] = {:.10}", i, p)?;
    }
    if let Some(residuals) = &result.residuals {
        writeln!(out, "Residuals:")?;
        for (k, r) in residuals.iter().enumerate() {
            writeln!(out, "  r[{}] = {:.6e}", k, r)?;
        }
    }
    Ok(())
}
