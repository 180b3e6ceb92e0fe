//! Progress of a running solve.

use std::fmt;

use convoy_core::EvaluationRecord;

/// Why an algorithm stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A convergence criterion was met
    Converged,
    /// The evaluation budget was spent
    BudgetExhausted,
    /// The algorithm could not make further progress
    Stagnated,
    /// The algorithm's own iteration limit was reached
    MaxIterations,
}

impl Termination {
    /// Whether the solve converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Termination::Converged)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::Converged => "converged",
            Termination::BudgetExhausted => "evaluation budget exhausted",
            Termination::Stagnated => "stagnated",
            Termination::MaxIterations => "iteration limit reached",
        };
        f.write_str(s)
    }
}

/// What an algorithm reports when it returns normally.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmOutcome {
    /// Why it stopped
    pub termination: Termination,
    /// Human-readable detail
    pub message: String,
}

impl AlgorithmOutcome {
    pub fn new(termination: Termination, message: impl Into<String>) -> Self {
        Self {
            termination,
            message: message.into(),
        }
    }
}

/// Mutable state of a solve, owned by the root.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmState {
    /// Current point
    pub current: Vec<f64>,
    /// Objective at the current point
    pub current_objective: f64,
    /// Objective after each move of the current point
    pub trajectory: Vec<f64>,
    /// Best evaluation so far
    pub best: Option<EvaluationRecord>,
    /// Completed iterations
    pub iterations: usize,
    /// Successful evaluations so far
    pub evaluations: usize,
    /// Batches submitted so far
    pub batches: usize,
    /// Set once the algorithm stops
    pub termination: Option<Termination>,
}

impl AlgorithmState {
    /// State at the start of a solve from `initial`.
    pub fn new(initial: &[f64]) -> Self {
        Self {
            current: initial.to_vec(),
            current_objective: f64::INFINITY,
            trajectory: Vec::new(),
            best: None,
            iterations: 0,
            evaluations: 0,
            batches: 0,
            termination: None,
        }
    }

    /// Offer a record as the new best. Ties keep the earlier record.
    pub fn observe(&mut self, record: &EvaluationRecord) {
        let better = match &self.best {
            None => !record.objective.is_nan(),
            Some(best) => record.objective < best.objective,
        };
        if better {
            self.best = Some(record.clone());
        }
    }

    /// Whether the solve has stopped.
    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }
}
