//! Built-in optimisation algorithms.
//!
//! This module implements:
//! - Levenberg-Marquardt for nonlinear least squares, with a parallel line
//!   search over the damping parameter
//! - Implicit filtering for bound-constrained problems without derivatives
//! - BFGS for general unconstrained optimisation

mod bfgs;
mod imfil;
mod levenberg_marquardt;

pub use bfgs::{Bfgs, BfgsConfig};
pub use imfil::{Imfil, ImfilConfig};
pub use levenberg_marquardt::{
    lambda_grid, lambda_increase_factor, Damping, LevenbergMarquardt, LevenbergMarquardtConfig,
};
