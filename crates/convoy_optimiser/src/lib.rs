//! # convoy_optimiser
//!
//! Optimisation algorithms for Convoy and the driver that runs them over a
//! cluster.
//!
//! This crate provides:
//! - Finite-difference Jacobians and gradients, each computed as one
//!   parallel batch
//! - The [`SolveContext`] through which algorithms evaluate, record and
//!   track the best point
//! - The [`Optimiser`] contract and the built-in algorithms selected by
//!   [`AlgorithmId`]: Levenberg-Marquardt, implicit filtering and BFGS
//! - [`Problem`], which starts the cluster, runs an algorithm and stops
//!   every process afterwards
//! - [`Recorder`] hooks for the evaluation history
//!
//! ## Architecture Position
//!
//! Top library layer: depends on `convoy_core` for the problem vocabulary
//! and on `convoy_cluster` for parallel evaluation. Runtime crates depend
//! on this one.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use convoy_cluster::Partition;
//! use convoy_core::{Bounds, ProblemSpec, ScalarFunction};
//! use convoy_optimiser::{AlgorithmId, Problem};
//!
//! let bowl = ScalarFunction::new(|x: &[f64]| Ok((x[0] - 0.5).powi(2) + (x[1] + 0.25).powi(2)));
//! let spec = ProblemSpec::scalar(Arc::new(bowl), vec![0.0, 0.0])
//!     .with_bounds(Bounds::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap());
//!
//! let result = Problem::new(spec, Arc::new(Partition::create(3, 3).unwrap()))
//!     .optimise(AlgorithmId::Imfil)
//!     .unwrap();
//! assert!((result.parameters[0] - 0.5).abs() < 1e-4);
//! ```

pub mod algorithm;
pub mod context;
pub mod driver;
pub mod finite_difference;
pub mod recorder;
pub mod solvers;
pub mod state;

pub use algorithm::{
    check_compatibility, does_algorithm_exist, Algorithm, AlgorithmId, AlgorithmProperties, LeastSquaresOptimiser,
    Optimiser,
};
pub use context::SolveContext;
pub use driver::{OptimisationResult, Problem};
pub use finite_difference::Jacobian;
pub use recorder::{MemoryRecorder, NullRecorder, Recorder, TracingRecorder};
pub use solvers::{
    Bfgs, BfgsConfig, Damping, Imfil, ImfilConfig, LevenbergMarquardt, LevenbergMarquardtConfig,
};
pub use state::{AlgorithmOutcome, AlgorithmState, Termination};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AlgorithmId, MemoryRecorder, OptimisationResult, Optimiser, Problem, Recorder, Termination,
    };
}
