//! Non-root processes: the worker group seen by a leader, and the handlers
//! that run inside each process's dispatch loop.

use std::time::Duration;

use convoy_core::{
    guarded_evaluate, guarded_evaluate_share, EvaluationRequest, EvaluationResult, FunctionError, GroupContext,
    OptimError, VectorFunction,
};
use tracing::debug;

use crate::dispatch::{DispatchLoop, Dispatcher, WorkHandler};
use crate::schedule::fan_out;
use crate::transport::Endpoint;

/// A leader's worker group, handed to the function while it evaluates.
///
/// Shares scattered over the group run on the members and on the leader
/// itself; results come back in share order.
pub struct WorkerGroup<'a> {
    function: &'a dyn VectorFunction,
    members: Option<&'a mut Dispatcher>,
}

impl<'a> WorkerGroup<'a> {
    /// Group led by the caller, with `members` as the other processes.
    pub fn new(function: &'a dyn VectorFunction, members: Option<&'a mut Dispatcher>) -> Self {
        Self { function, members }
    }
}

impl GroupContext for WorkerGroup<'_> {
    fn size(&self) -> usize {
        1 + self.members.as_ref().map_or(0, |d| d.len())
    }

    fn scatter(&mut self, shares: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, FunctionError> {
        let function = self.function;
        match self.members.as_deref_mut() {
            Some(members) if !members.is_empty() => {
                fan_out(members, &shares, |share| guarded_evaluate_share(function, share))
                    .map_err(|e| FunctionError::new(e.to_string()))
            }
            _ => shares
                .iter()
                .map(|share| guarded_evaluate_share(function, share))
                .collect(),
        }
    }
}

/// Handler for a group leader other than the root: evaluates whole points
/// and commands its own group members.
pub struct LeaderHandler<'a> {
    function: &'a dyn VectorFunction,
    group: Dispatcher,
}

impl<'a> LeaderHandler<'a> {
    pub fn new(function: &'a dyn VectorFunction, group: Dispatcher) -> Self {
        Self { function, group }
    }
}

impl WorkHandler for LeaderHandler<'_> {
    fn on_mobilize(&mut self) -> Result<(), OptimError> {
        self.group.mobilize_workers()
    }

    fn on_work(&mut self, request: EvaluationRequest) -> EvaluationResult {
        let function = self.function;
        let mut group = WorkerGroup::new(function, Some(&mut self.group));
        EvaluationResult::from_outcome(request.id, guarded_evaluate(function, &request.x, &mut group))
    }

    fn on_stop(&mut self) -> Result<(), OptimError> {
        self.group.stop_workers()
    }
}

/// Handler for a plain group member: evaluates shares.
pub struct ShareHandler<'a> {
    function: &'a dyn VectorFunction,
}

impl<'a> ShareHandler<'a> {
    pub fn new(function: &'a dyn VectorFunction) -> Self {
        Self { function }
    }
}

impl WorkHandler for ShareHandler<'_> {
    fn on_work(&mut self, request: EvaluationRequest) -> EvaluationResult {
        EvaluationResult::from_outcome(request.id, guarded_evaluate_share(self.function, &request.x))
    }
}

/// Run the dispatch loop of a non-root process until it is stopped.
pub fn serve(
    endpoint: Endpoint,
    function: &dyn VectorFunction,
    reply_timeout: Option<Duration>,
) -> Result<(), OptimError> {
    let rank = endpoint.view.rank;
    let (Some(inbox), Some(superior)) = (endpoint.inbox, endpoint.superior) else {
        return Err(OptimError::InvalidTopology(format!(
            "rank {} has no superior to serve",
            rank
        )));
    };

    debug!(rank, group = endpoint.view.group, leader = endpoint.view.is_leader(), "Entering dispatch loop");
    let outcome = match endpoint.group {
        Some(link) => {
            let handler = LeaderHandler::new(function, Dispatcher::new(link, reply_timeout, "group"));
            DispatchLoop::new(rank, inbox, superior, handler).run()
        }
        None => DispatchLoop::new(rank, inbox, superior, ShareHandler::new(function)).run(),
    };
    debug!(rank, "Left dispatch loop");
    outcome
}
