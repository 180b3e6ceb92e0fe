//! Root-side parallel batch evaluation.

use std::sync::Arc;
use std::time::Duration;

use convoy_core::{guarded_evaluate, BatchEvaluator, OptimError, VectorFunction};
use tracing::{debug, info};

use crate::dispatch::{DispatchState, Dispatcher};
use crate::partition::Partition;
use crate::schedule::fan_out;
use crate::transport::Endpoint;
use crate::worker::WorkerGroup;

/// Evaluates batches of points across every worker group.
///
/// Runs on the root. With `G` groups up to `G` points are evaluated at
/// once: one per remote group leader plus one on the root's own group.
/// Results are returned in input order whatever order they complete in.
pub struct ParallelEvaluator<'a> {
    partition: Arc<Partition>,
    function: &'a dyn VectorFunction,
    leaders: Dispatcher,
    group: Dispatcher,
    batches: usize,
    evaluations: usize,
}

impl<'a> ParallelEvaluator<'a> {
    /// Build the root evaluator from the root's endpoint.
    pub fn from_endpoint(
        partition: Arc<Partition>,
        endpoint: Endpoint,
        function: &'a dyn VectorFunction,
        reply_timeout: Option<Duration>,
    ) -> Result<Self, OptimError> {
        let (Some(leaders), Some(group)) = (endpoint.leaders, endpoint.group) else {
            return Err(OptimError::InvalidTopology(
                "endpoint does not belong to the root".to_string(),
            ));
        };
        Ok(Self {
            partition,
            function,
            leaders: Dispatcher::new(leaders, reply_timeout, "leaders"),
            group: Dispatcher::new(group, reply_timeout, "group"),
            batches: 0,
            evaluations: 0,
        })
    }

    /// The partition being driven.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Number of batches evaluated so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Number of points evaluated so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// State of every other group leader, in group order (root excluded).
    pub fn leader_states(&self) -> &[DispatchState] {
        self.leaders.states()
    }

    /// Bring every process into its dispatch loop.
    pub fn mobilize(&mut self) -> Result<(), OptimError> {
        self.leaders.mobilize_workers()?;
        self.group.mobilize_workers()?;
        info!(
            processes = self.partition.world_size(),
            groups = self.partition.n_groups(),
            "Cluster mobilized"
        );
        Ok(())
    }

    /// Stop every process. Group leaders stop their own members before
    /// acknowledging. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), OptimError> {
        let leaders = self.leaders.stop_workers();
        let group = self.group.stop_workers();
        debug!(batches = self.batches, evaluations = self.evaluations, "Cluster stopped");
        leaders.and(group)
    }

    fn evaluate_locally(&mut self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, OptimError> {
        let function = self.function;
        let mut out = Vec::with_capacity(points.len());
        for (index, x) in points.iter().enumerate() {
            let mut group = WorkerGroup::new(function, Some(&mut self.group));
            let values = guarded_evaluate(function, x, &mut group).map_err(|e| OptimError::EvaluationFailed {
                index,
                message: e.message().to_string(),
            })?;
            out.push(values);
        }
        Ok(out)
    }
}

impl BatchEvaluator for ParallelEvaluator<'_> {
    fn evaluate_batch(&mut self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, OptimError> {
        self.leaders.ensure_ready()?;
        self.group.ensure_ready()?;
        self.batches += 1;
        debug!(batch = self.batches, points = points.len(), "Evaluating batch");

        let result = if points.len() <= 1 || self.leaders.is_empty() {
            self.evaluate_locally(points)
        } else {
            let function = self.function;
            let group = &mut self.group;
            fan_out(&mut self.leaders, points, |x| {
                let mut members = WorkerGroup::new(function, Some(&mut *group));
                guarded_evaluate(function, x, &mut members)
            })
        };

        if result.is_ok() {
            self.evaluations += points.len();
        }
        result
    }

    fn concurrency(&self) -> usize {
        self.partition.n_groups()
    }
}
