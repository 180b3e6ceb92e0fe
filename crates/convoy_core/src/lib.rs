//! # convoy_core
//!
//! Core types for Convoy, a group-parallel numerical optimiser.
//!
//! This crate defines the vocabulary shared by the cluster engine and the
//! optimisation algorithms:
//! - Problem description (`ProblemSpec`, bounds, finite-difference settings)
//! - The objective/residual callback (`VectorFunction`) and its view of the
//!   worker group (`GroupContext`)
//! - Evaluation requests, results and records
//! - The `BatchEvaluator` seam through which algorithms request evaluations
//! - The error taxonomy (`OptimError`)
//!
//! ## Architecture Position
//!
//! Bottom of the workspace. Must not depend on `convoy_cluster`,
//! `convoy_optimiser` or any runtime crate.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use convoy_core::{FunctionError, ProblemSpec, VectorFunction};
//!
//! let residuals: Arc<dyn VectorFunction> =
//!     Arc::new(|x: &[f64]| -> Result<Vec<f64>, FunctionError> { Ok(vec![x[0] - 1.0, x[1] + 2.0]) });
//! let problem = ProblemSpec::least_squares(residuals, vec![0.0, 0.0], 2);
//! assert!(problem.validate().is_ok());
//! assert_eq!(problem.objective(&[1.0, 1.0]), 2.0);
//! ```

pub mod error;
pub mod evaluation;
pub mod function;
pub mod linalg;
pub mod problem;

pub use error::{FunctionError, OptimError};
pub use evaluation::{
    guarded_evaluate, guarded_evaluate_share, BatchEvaluator, EvaluationRecord, EvaluationRequest,
    EvaluationResult, SerialEvaluator,
};
pub use function::{GroupContext, LocalGroup, ScalarFunction, VectorFunction};
pub use problem::{
    Bounds, FiniteDifferenceMode, FiniteDifferenceSettings, ProblemKind, ProblemSpec, RelativeBounds,
    StepScaling,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BatchEvaluator, Bounds, FiniteDifferenceMode, FiniteDifferenceSettings, FunctionError,
        OptimError, ProblemSpec, RelativeBounds, StepScaling, VectorFunction,
    };
}
