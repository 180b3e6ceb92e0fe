//! Launching the processes of a partition.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use convoy_core::{OptimError, VectorFunction};
use tracing::{info, warn};

use crate::evaluator::ParallelEvaluator;
use crate::partition::Partition;
use crate::transport::wire;
use crate::worker::serve;

/// A partitioned set of processes, each an OS thread.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use convoy_cluster::{Cluster, Partition};
/// use convoy_core::{BatchEvaluator, FunctionError};
///
/// let partition = Arc::new(Partition::create(4, 2).unwrap());
/// let square = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(vec![x[0] * x[0]]) };
///
/// let values = Cluster::new(partition)
///     .run(&square, |evaluator| evaluator.evaluate_batch(&[vec![1.0], vec![2.0], vec![3.0]]))
///     .unwrap();
/// assert_eq!(values, vec![vec![1.0], vec![4.0], vec![9.0]]);
/// ```
#[derive(Debug, Clone)]
pub struct Cluster {
    partition: Arc<Partition>,
    reply_timeout: Option<Duration>,
}

impl Cluster {
    /// Cluster over `partition`, waiting indefinitely for replies.
    pub fn new(partition: Arc<Partition>) -> Self {
        Self {
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

    /// The partition.
    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    /// Start every process, run `body` on the root with the parallel
    /// evaluator, then stop every process and wait for it to exit.
    ///
    /// Processes are stopped on every path out of `body`, including a panic.
    /// An error from `body` takes precedence over an error while stopping.
    pub fn run<T, F>(&self, function: &dyn VectorFunction, body: F) -> Result<T, OptimError>
    where
        F: FnOnce(&mut ParallelEvaluator<'_>) -> Result<T, OptimError>,
    {
        let mut endpoints = wire(&self.partition)?.into_iter();
        let Some(root) = endpoints.next() else {
            return Err(OptimError::InvalidTopology("partition has no processes".to_string()));
        };
        let timeout = self.reply_timeout;

        thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .map(|endpoint| {
                    let rank = endpoint.view().rank;
                    (rank, scope.spawn(move || serve(endpoint, function, timeout)))
                })
                .collect();

            let mut evaluator = ParallelEvaluator::from_endpoint(Arc::clone(&self.partition), root, function, timeout)?;
            let outcome = evaluator.mobilize().and_then(|()| body(&mut evaluator));
            let stopped = evaluator.shutdown();
            drop(evaluator);

            for (rank, handle) in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(rank, error = %e, "Process exited with an error"),
                    Err(_) => warn!(rank, "Process panicked"),
                }
            }

            match (&outcome, &stopped) {
                (Err(e), _) => warn!(error = %e, "Cluster run aborted"),
                (Ok(_), Err(e)) => warn!(error = %e, "Failed to stop every process"),
                (Ok(_), Ok(())) => info!(processes = self.partition.world_size(), "Cluster run finished"),
            }
            let value = outcome?;
            stopped?;
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{BatchEvaluator, FunctionError};

    #[test]
    fn test_single_process_cluster() {
        let partition = Arc::new(Partition::create(1, 1).unwrap());
        let f = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(vec![x[0] + 1.0]) };
        let out = Cluster::new(partition)
            .run(&f, |e| e.evaluate_batch(&[vec![1.0], vec![2.0]]))
            .unwrap();
        assert_eq!(out, vec![vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_body_error_still_stops_processes() {
        let partition = Arc::new(Partition::create(4, 4).unwrap());
        let f = |x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(x.to_vec()) };
        let err = Cluster::new(partition)
            .with_reply_timeout(Duration::from_secs(10))
            .run(&f, |_| -> Result<(), OptimError> { Err(OptimError::SingularMatrix) })
            .unwrap_err();
        assert_eq!(err, OptimError::SingularMatrix);
    }
}
