//! Optimisation errors.

use thiserror::Error;

/// Errors that can occur while setting up or running an optimisation.
///
/// Topology, step-size and problem errors are configuration errors and are
/// reported before any evaluation starts. `WorkerUnreachable` and
/// `EvaluationFailed` abort the running solve; the driver always releases
/// the worker processes afterwards.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimError {
    /// Malformed partition request
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Communication with a process failed during dispatch
    #[error("Worker process {rank} is unreachable")]
    WorkerUnreachable { rank: usize },

    /// The objective/residual callback failed for one request of a batch
    #[error("Evaluation {index} of the batch failed: {message}")]
    EvaluationFailed { index: usize, message: String },

    /// Finite-difference step must be strictly positive and finite
    #[error("Invalid finite-difference step size: {0}")]
    InvalidStepSize(f64),

    /// Inconsistent problem description (dimensions, bounds, sigmas)
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    /// Singular matrix encountered
    #[error("Singular matrix encountered during optimisation")]
    SingularMatrix,

    /// A least-squares algorithm was selected for a scalar objective
    #[error("Algorithm '{algorithm}' requires a least-squares problem")]
    AlgorithmMismatch { algorithm: String },

    /// Algorithm name not found in the registry
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The selected algorithm cannot run without bound constraints
    #[error("Algorithm '{0}' requires bound constraints")]
    BoundsRequired(String),
}

/// Error returned by a user objective or residual function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FunctionError {
    message: String,
}

impl FunctionError {
    /// Create a new function error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message supplied by the callback.
    pub fn message(&self) -> &str {
        &self.message
    }
}
