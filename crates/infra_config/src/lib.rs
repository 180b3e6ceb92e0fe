//! # infra_config
//!
//! Configuration and environment management for Convoy.
//!
//! This crate loads runtime settings (TOML files and environment variables)
//! and defines the process topology, the optimiser and
//! Levenberg-Marquardt defaults and the log filter.
//!
//! ## Architecture Position
//!
//! Part of the **I**nfra layer.
//! Must not depend on the `convoy_*` library crates; runtime crates translate
//! these settings into their types.
//!
//! ## Example
//!
//! ```rust,ignore
//! use infra_config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Worker groups: {}", settings.cluster.effective_worker_groups());
//! ```

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{
    BoundsConfig, ClusterConfig, DampingSetting, DifferenceModeSetting, FiniteDifferenceConfig,
    LevenbergMarquardtSettings, LoggingConfig, OptimiserConfig, RelativeBoundsConfig, RemainderPolicySetting,
    Settings, StepScalingSetting,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{ConfigError, Settings};
}
