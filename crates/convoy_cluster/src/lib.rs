//! # convoy_cluster
//!
//! Worker-group coordination and parallel evaluation for Convoy.
//!
//! A cluster is a fixed set of processes, each an OS thread with a rank,
//! that cooperate only through typed channels:
//! - [`Partition`] splits the processes into worker groups, each with a
//!   leader; the root (rank 0) leads one of them
//! - [`Dispatcher`] and [`DispatchLoop`] implement the mobilize / work /
//!   stop protocol between a superior and its subordinates
//! - [`ParallelEvaluator`] fans a batch of points out over the group
//!   leaders and returns the results in submission order
//! - [`WorkerGroup`] lets a leader split one evaluation into shares
//! - [`Cluster`] launches every process, runs the caller on the root and
//!   guarantees that every process is stopped and joined afterwards
//!
//! ## Architecture Position
//!
//! Sits on `convoy_core`. Knows nothing about optimisation algorithms; it
//! only evaluates points through [`convoy_core::BatchEvaluator`].

pub mod cluster;
pub mod dispatch;
pub mod evaluator;
pub mod partition;
pub mod schedule;
pub mod transport;
pub mod worker;

pub use cluster::Cluster;
pub use dispatch::{DispatchLoop, DispatchState, Dispatcher, WorkHandler};
pub use evaluator::ParallelEvaluator;
pub use partition::{Partition, ProcessView, RemainderPolicy};
pub use transport::{Endpoint, Envelope, Link, Reply};
pub use worker::WorkerGroup;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{Cluster, ParallelEvaluator, Partition, RemainderPolicy};
}
