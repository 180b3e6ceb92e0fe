//! Evaluation history hooks.
//!
//! A [`Recorder`] sees every successful evaluation of a solve, in
//! submission order, and the best evaluation once the solve finishes. How
//! the history is persisted is up to the implementation.

use convoy_core::{EvaluationRecord, ProblemSpec};
use tracing::{debug, info};

/// Receives the evaluation history of a solve.
pub trait Recorder {
    /// Called once before the first evaluation.
    fn init(&mut self, _problem: &ProblemSpec) {}

    /// Called after each successful evaluation.
    fn record(&mut self, record: &EvaluationRecord);

    /// Called once after the solve, with the best evaluation seen.
    fn finalize(&mut self, _best: Option<&EvaluationRecord>) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn record(&mut self, _record: &EvaluationRecord) {}
}

/// Keeps the full history in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    records: Vec<EvaluationRecord>,
    best: Option<EvaluationRecord>,
    finalized: bool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded evaluation, in order.
    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    /// The best evaluation, once finalized.
    pub fn best(&self) -> Option<&EvaluationRecord> {
        self.best.as_ref()
    }

    /// Whether `finalize` has been called.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Objective of every record, in order.
    pub fn objectives(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.objective).collect()
    }
}

impl Recorder for MemoryRecorder {
    fn init(&mut self, _problem: &ProblemSpec) {
        self.records.clear();
        self.best = None;
        self.finalized = false;
    }

    fn record(&mut self, record: &EvaluationRecord) {
        self.records.push(record.clone());
    }

    fn finalize(&mut self, best: Option<&EvaluationRecord>) {
        self.best = best.cloned();
        self.finalized = true;
    }
}

/// Emits the history as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl Recorder for TracingRecorder {
    fn init(&mut self, problem: &ProblemSpec) {
        info!(
            parameters = problem.n_parameters(),
            values = problem.n_values(),
            budget = problem.max_function_evaluations(),
            "Recording solve"
        );
    }

    fn record(&mut self, record: &EvaluationRecord) {
        debug!(
            evaluation = record.evaluation,
            batch = record.batch,
            objective = record.objective,
            x = ?record.x,
            "Evaluation"
        );
    }

    fn finalize(&mut self, best: Option<&EvaluationRecord>) {
        match best {
            Some(r) => info!(evaluation = r.evaluation, objective = r.objective, x = ?r.x, "Best evaluation"),
            None => info!("No successful evaluation recorded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(evaluation: usize, objective: f64) -> EvaluationRecord {
        EvaluationRecord {
            evaluation,
            batch: 1,
            x: vec![objective],
            objective,
            values: vec![objective],
        }
    }

    #[test]
    fn test_memory_recorder_keeps_order() {
        let mut rec = MemoryRecorder::new();
        rec.record(&record(1, 3.0));
        rec.record(&record(2, 1.0));
        rec.finalize(Some(&record(2, 1.0)));
        assert_eq!(rec.objectives(), vec![3.0, 1.0]);
        assert_eq!(rec.best().map(|r| r.evaluation), Some(2));
        assert!(rec.is_finalized());
    }
}
