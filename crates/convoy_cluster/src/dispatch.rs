//! Leader/worker dispatch protocol.
//!
//! The superior side is a [`Dispatcher`], which tracks the state of every
//! subordinate it commands. The subordinate side is a [`DispatchLoop`],
//! which runs until told to stop:
//!
//! ```text
//! Idle --Mobilize--> Waiting --Work--> Executing --reply sent--> Waiting
//!   |                   |
//!   +-------Stop--------+--> Stopped
//! ```
//!
//! A subordinate handles one work item at a time and its result is sent
//! before it becomes eligible for the next. `Stop` is always acknowledged,
//! so a superior that stops its subordinates never waits on a process that
//! has already left its loop.
//!
//! A superior that gives up waiting on a reply marks every target with work
//! in flight as faulted. A faulted target accepts no further work and its
//! late results are discarded; it is still stopped normally.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use convoy_core::{EvaluationRequest, EvaluationResult, OptimError};
use tracing::{debug, warn};

use crate::transport::{Envelope, Link, Reply};

/// Protocol state of one subordinate process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Not yet mobilized
    Idle,
    /// Ready for a work item
    Waiting,
    /// Working on an item
    Executing,
    /// Left the loop; terminal
    Stopped,
}

/// Superior-side view of a set of subordinates.
#[derive(Debug)]
pub struct Dispatcher {
    link: Link,
    states: Vec<DispatchState>,
    faulted: Vec<bool>,
    reply_timeout: Option<Duration>,
    label: &'static str,
}

impl Dispatcher {
    /// Wrap `link`, with every target `Idle`.
    ///
    /// `label` names the link in log output ("leaders" or "group").
    pub fn new(link: Link, reply_timeout: Option<Duration>, label: &'static str) -> Self {
        let states = vec![DispatchState::Idle; link.ranks.len()];
        let faulted = vec![false; states.len()];
        Self {
            link,
            states,
            faulted,
            reply_timeout,
            label,
        }
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether there are no targets.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// World rank of the target in `slot`.
    pub fn rank(&self, slot: usize) -> usize {
        self.link.ranks[slot]
    }

    /// Current state of every target, in slot order.
    pub fn states(&self) -> &[DispatchState] {
        &self.states
    }

    /// Whether the target in `slot` stopped replying in time.
    pub fn is_faulted(&self, slot: usize) -> bool {
        self.faulted[slot]
    }

    /// First target ready for work.
    pub fn idle_target(&self) -> Option<usize> {
        (0..self.len()).find(|&s| self.states[s] == DispatchState::Waiting && !self.faulted[s])
    }

    /// Number of targets with a work item in flight.
    pub fn outstanding(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == DispatchState::Executing)
            .count()
    }

    /// Fail with `WorkerUnreachable` naming the first target that is not
    /// mobilized, has stopped, or is faulted.
    pub fn ensure_ready(&self) -> Result<(), OptimError> {
        match (0..self.len()).find(|&s| {
            self.faulted[s] || matches!(self.states[s], DispatchState::Idle | DispatchState::Stopped)
        }) {
            Some(slot) => Err(OptimError::WorkerUnreachable {
                rank: self.rank(slot),
            }),
            None => Ok(()),
        }
    }

    /// Send `Mobilize` to every idle target and wait for all of them to
    /// acknowledge.
    pub fn mobilize_workers(&mut self) -> Result<(), OptimError> {
        let mut pending = Vec::new();
        for slot in 0..self.len() {
            if self.states[slot] != DispatchState::Idle {
                continue;
            }
            self.send(slot, Envelope::Mobilize)?;
            pending.push(slot);
        }

        while !pending.is_empty() {
            match self.receive(&pending)? {
                Reply::Mobilized { rank } => {
                    if let Some(slot) = self.slot_of(rank) {
                        self.states[slot] = DispatchState::Waiting;
                        pending.retain(|s| *s != slot);
                    }
                }
                other => debug!(link = self.label, rank = other.rank(), "Ignoring reply while mobilizing"),
            }
        }
        debug!(link = self.label, targets = self.len(), "Workers mobilized");
        Ok(())
    }

    /// Send `Stop` to every target not already stopped and wait until each
    /// one acknowledges. Results still in flight are discarded.
    ///
    /// Every reachable target is stopped even if another one fails; the
    /// first failure is returned.
    pub fn stop_workers(&mut self) -> Result<(), OptimError> {
        let mut first_error = None;
        let mut pending = Vec::new();
        for slot in 0..self.len() {
            if self.states[slot] == DispatchState::Stopped {
                continue;
            }
            match self.send(slot, Envelope::Stop) {
                Ok(()) => pending.push(slot),
                Err(e) => {
                    self.states[slot] = DispatchState::Stopped;
                    first_error.get_or_insert(e);
                }
            }
        }

        while !pending.is_empty() {
            match self.receive(&pending) {
                Ok(Reply::Stopped { rank }) => {
                    if let Some(slot) = self.slot_of(rank) {
                        self.states[slot] = DispatchState::Stopped;
                        pending.retain(|s| *s != slot);
                    }
                }
                Ok(other) => debug!(link = self.label, rank = other.rank(), "Discarding reply while stopping"),
                Err(e) => {
                    for slot in pending.drain(..) {
                        self.states[slot] = DispatchState::Stopped;
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(link = self.label, targets = self.len(), "Workers stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Send one work item to the target in `slot`.
    ///
    /// # Errors
    ///
    /// `OptimError::WorkerUnreachable` if the target is not waiting for work,
    /// is faulted, or its channel is closed.
    pub fn dispatch(&mut self, slot: usize, request: EvaluationRequest) -> Result<(), OptimError> {
        if self.states[slot] != DispatchState::Waiting || self.faulted[slot] {
            return Err(OptimError::WorkerUnreachable {
                rank: self.rank(slot),
            });
        }
        self.send(slot, Envelope::Work(request))?;
        self.states[slot] = DispatchState::Executing;
        Ok(())
    }

    /// Block until one in-flight work item completes.
    ///
    /// Returns the slot that produced the result; that slot is `Waiting`
    /// again. If no reply arrives every target with work in flight is
    /// faulted.
    pub fn collect(&mut self) -> Result<(usize, EvaluationResult), OptimError> {
        loop {
            let executing = self.executing();
            let reply = match self.receive(&executing) {
                Ok(reply) => reply,
                Err(e) => {
                    self.fault(&executing);
                    return Err(e);
                }
            };
            if let Some(done) = self.complete(reply) {
                return Ok(done);
            }
        }
    }

    /// Like [`Dispatcher::collect`] without blocking.
    pub fn try_collect(&mut self) -> Result<Option<(usize, EvaluationResult)>, OptimError> {
        loop {
            match self.link.replies.try_recv() {
                Ok(reply) => {
                    if let Some(done) = self.complete(reply) {
                        return Ok(Some(done));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    let executing = self.executing();
                    self.fault(&executing);
                    return Err(self.unreachable(&executing));
                }
            }
        }
    }

    fn complete(&mut self, reply: Reply) -> Option<(usize, EvaluationResult)> {
        match reply {
            Reply::Completed { rank, result } => {
                let slot = self.slot_of(rank)?;
                if self.states[slot] != DispatchState::Executing {
                    debug!(link = self.label, rank, "Discarding unexpected result");
                    return None;
                }
                self.states[slot] = DispatchState::Waiting;
                if self.faulted[slot] {
                    debug!(link = self.label, rank, id = result.id, "Discarding late result");
                    return None;
                }
                Some((slot, result))
            }
            other => {
                debug!(link = self.label, rank = other.rank(), "Ignoring reply while collecting");
                None
            }
        }
    }

    fn fault(&mut self, slots: &[usize]) {
        for &slot in slots {
            if !self.faulted[slot] {
                warn!(link = self.label, rank = self.rank(slot), "Target faulted, no further work will be sent");
                self.faulted[slot] = true;
            }
        }
    }

    fn executing(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&s| self.states[s] == DispatchState::Executing)
            .collect()
    }

    fn slot_of(&self, rank: usize) -> Option<usize> {
        self.link.ranks.iter().position(|&r| r == rank)
    }

    fn send(&self, slot: usize, envelope: Envelope) -> Result<(), OptimError> {
        self.link.outboxes[slot]
            .send(envelope)
            .map_err(|_| OptimError::WorkerUnreachable {
                rank: self.rank(slot),
            })
    }

    /// Receive the next reply, blaming the first of `awaited` if none comes.
    fn receive(&self, awaited: &[usize]) -> Result<Reply, OptimError> {
        let received = match self.reply_timeout {
            Some(timeout) => self.link.replies.recv_timeout(timeout),
            None => self
                .link
                .replies
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        received.map_err(|e| {
            warn!(link = self.label, error = ?e, "No reply from workers");
            self.unreachable(awaited)
        })
    }

    fn unreachable(&self, awaited: &[usize]) -> OptimError {
        let rank = awaited
            .first()
            .map_or_else(|| self.link.ranks.first().copied().unwrap_or(0), |&s| self.rank(s));
        OptimError::WorkerUnreachable { rank }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.states.iter().all(|s| *s == DispatchState::Stopped) {
            return;
        }
        warn!(link = self.label, "Dispatcher dropped with live workers, stopping them");
        if let Err(e) = self.stop_workers() {
            warn!(link = self.label, error = %e, "Failed to stop workers");
        }
    }
}

/// Behaviour of a subordinate process inside its dispatch loop.
pub trait WorkHandler {
    /// Called once on `Mobilize`, before the acknowledgement.
    fn on_mobilize(&mut self) -> Result<(), OptimError> {
        Ok(())
    }

    /// Evaluate one work item.
    fn on_work(&mut self, request: EvaluationRequest) -> EvaluationResult;

    /// Called once on `Stop`, before the acknowledgement.
    fn on_stop(&mut self) -> Result<(), OptimError> {
        Ok(())
    }
}

/// Subordinate side of the protocol.
pub struct DispatchLoop<H> {
    rank: usize,
    inbox: Receiver<Envelope>,
    superior: (usize, Sender<Reply>),
    handler: H,
    state: DispatchState,
}

impl<H: WorkHandler> DispatchLoop<H> {
    /// Create a loop for `rank` answering to `superior`.
    pub fn new(rank: usize, inbox: Receiver<Envelope>, superior: (usize, Sender<Reply>), handler: H) -> Self {
        Self {
            rank,
            inbox,
            superior,
            handler,
            state: DispatchState::Idle,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Serve commands until `Stop`.
    ///
    /// Returns an error if the superior disappeared without sending `Stop`,
    /// or if mobilizing or stopping this process's own subordinates failed.
    /// The loop always leaves in the `Stopped` state.
    pub fn run(&mut self) -> Result<(), OptimError> {
        let mut fault = None;
        loop {
            let Ok(envelope) = self.inbox.recv() else {
                self.state = DispatchState::Stopped;
                let abandoned = OptimError::WorkerUnreachable { rank: self.superior.0 };
                if let Err(e) = self.handler.on_stop() {
                    warn!(rank = self.rank, error = %e, "Failed to stop subordinates");
                }
                return Err(fault.unwrap_or(abandoned));
            };

            match (self.state, envelope) {
                (DispatchState::Idle, Envelope::Mobilize) => {
                    if let Err(e) = self.handler.on_mobilize() {
                        warn!(rank = self.rank, error = %e, "Mobilization incomplete");
                        fault.get_or_insert(e);
                    }
                    self.state = DispatchState::Waiting;
                    self.reply(Reply::Mobilized { rank: self.rank })?;
                }
                (_, Envelope::Mobilize) => {
                    debug!(rank = self.rank, "Already mobilized");
                }
                (DispatchState::Waiting, Envelope::Work(request)) => {
                    self.state = DispatchState::Executing;
                    let result = self.handler.on_work(request);
                    self.reply(Reply::Completed { rank: self.rank, result })?;
                    self.state = DispatchState::Waiting;
                }
                (_, Envelope::Work(request)) => {
                    let result = EvaluationResult::failure(request.id, "worker was not mobilized");
                    self.reply(Reply::Completed { rank: self.rank, result })?;
                }
                (_, Envelope::Stop) => {
                    if let Err(e) = self.handler.on_stop() {
                        warn!(rank = self.rank, error = %e, "Failed to stop subordinates");
                        fault.get_or_insert(e);
                    }
                    self.state = DispatchState::Stopped;
                    self.reply(Reply::Stopped { rank: self.rank })?;
                    return fault.map_or(Ok(()), Err);
                }
            }
        }
    }

    fn reply(&self, reply: Reply) -> Result<(), OptimError> {
        self.superior
            .1
            .send(reply)
            .map_err(|_| OptimError::WorkerUnreachable { rank: self.superior.0 })
    }
}
