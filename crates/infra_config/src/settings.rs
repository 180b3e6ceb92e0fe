//! Settings and configuration structures.

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application settings.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    /// Process topology
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Problem-independent optimiser settings
    #[serde(default)]
    pub optimiser: OptimiserConfig,
    /// Levenberg-Marquardt tuning
    #[serde(default)]
    pub levenberg_marquardt: LevenbergMarquardtSettings,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `CONVOY_ENV`)
    /// 3. Environment variables prefixed with `CONVOY__`, sections separated by `__`
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("CONVOY_ENV").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("CONVOY").separator("__").try_parsing(true))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a single TOML file. Missing sections take their
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cluster.validate()?;
        self.optimiser.validate()?;
        self.levenberg_marquardt.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }
}

/// How ranks left over after an even split are assigned to groups.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicySetting {
    /// First groups take one extra rank each
    #[default]
    FrontLoaded,
    /// `group = floor(rank * groups / processes)`
    Proportional,
}

/// Process topology.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Number of processes, the root included
    #[serde(default = "default_processes")]
    pub processes: usize,
    /// Number of worker groups; 0 means one group per process
    #[serde(default)]
    pub worker_groups: usize,
    /// Distribution of leftover ranks
    #[serde(default)]
    pub remainder_policy: RemainderPolicySetting,
    /// Seconds to wait for a reply before a process counts as unreachable
    #[serde(default)]
    pub reply_timeout_secs: Option<u64>,
}

impl ClusterConfig {
    /// Worker groups with the 0 default resolved.
    pub fn effective_worker_groups(&self) -> usize {
        if self.worker_groups == 0 {
            self.processes
        } else {
            self.worker_groups
        }
    }

    /// Reply timeout, if configured.
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.processes == 0 {
            return Err(ConfigError::invalid("cluster.processes", "must be at least 1"));
        }
        if self.worker_groups > self.processes {
            return Err(ConfigError::invalid(
                "cluster.worker_groups",
                format!("{} groups for {} processes", self.worker_groups, self.processes),
            ));
        }
        if self.reply_timeout_secs == Some(0) {
            return Err(ConfigError::invalid("cluster.reply_timeout_secs", "must be positive"));
        }
        Ok(())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            worker_groups: 0,
            remainder_policy: RemainderPolicySetting::default(),
            reply_timeout_secs: None,
        }
    }
}

fn default_processes() -> usize {
    num_cpus::get()
}

/// Finite-difference stencil.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceModeSetting {
    #[default]
    Forward,
    Centered,
}

/// Absolute or relative finite-difference step.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepScalingSetting {
    #[default]
    Absolute,
    Relative,
}

/// Finite-difference configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FiniteDifferenceConfig {
    #[serde(default)]
    pub mode: DifferenceModeSetting,
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default)]
    pub scaling: StepScalingSetting,
}

impl Default for FiniteDifferenceConfig {
    fn default() -> Self {
        Self {
            mode: DifferenceModeSetting::default(),
            step_size: default_step_size(),
            scaling: StepScalingSetting::default(),
        }
    }
}

fn default_step_size() -> f64 {
    1e-7
}

/// Bound constraints: either an explicit box (`lower`/`upper`) or a
/// `relative` rule applied to the initial point.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BoundsConfig {
    #[serde(default)]
    pub lower: Vec<f64>,
    #[serde(default)]
    pub upper: Vec<f64>,
    #[serde(default)]
    pub relative: Option<RelativeBoundsConfig>,
}

impl BoundsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(relative) = &self.relative {
            if !self.lower.is_empty() || !self.upper.is_empty() {
                return Err(ConfigError::invalid(
                    "optimiser.bounds",
                    "give either lower/upper or relative, not both",
                ));
            }
            return relative.validate();
        }
        if self.lower.is_empty() {
            return Err(ConfigError::invalid("optimiser.bounds", "no lower/upper or relative bounds given"));
        }
        if self.lower.len() != self.upper.len() {
            return Err(ConfigError::invalid(
                "optimiser.bounds",
                format!("{} lower but {} upper bounds", self.lower.len(), self.upper.len()),
            ));
        }
        if let Some(i) = self.lower.iter().zip(&self.upper).position(|(lo, hi)| lo > hi) {
            return Err(ConfigError::invalid(
                "optimiser.bounds",
                format!("lower bound {} exceeds upper bound", i),
            ));
        }
        Ok(())
    }
}

/// Bounds scaled from the initial point.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RelativeBoundsConfig {
    #[serde(default)]
    pub min_factor: f64,
    pub max_factor: f64,
    #[serde(default)]
    pub min_radius: f64,
    #[serde(default)]
    pub preserve_sign: bool,
}

impl RelativeBoundsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let key = "optimiser.bounds.relative";
        for (name, value) in [
            ("min_factor", self.min_factor),
            ("max_factor", self.max_factor),
            ("min_radius", self.min_radius),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(
                    key,
                    format!("{} = {} must be finite and non-negative", name, value),
                ));
            }
        }
        if self.max_factor < self.min_factor {
            return Err(ConfigError::invalid(key, "max_factor is below min_factor"));
        }
        Ok(())
    }
}

/// Problem-independent optimiser settings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OptimiserConfig {
    /// Algorithm name, e.g. `levenberg_marquardt`
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Evaluation budget
    #[serde(default = "default_max_function_evaluations")]
    pub max_function_evaluations: usize,
    #[serde(default)]
    pub finite_difference: FiniteDifferenceConfig,
    /// Overrides the bounds of the problem being solved
    #[serde(default)]
    pub bounds: Option<BoundsConfig>,
}

impl OptimiserConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithm.trim().is_empty() {
            return Err(ConfigError::invalid("optimiser.algorithm", "must not be empty"));
        }
        if self.max_function_evaluations == 0 {
            return Err(ConfigError::invalid("optimiser.max_function_evaluations", "must be positive"));
        }
        let step = self.finite_difference.step_size;
        if !(step.is_finite() && step > 0.0) {
            return Err(ConfigError::invalid(
                "optimiser.finite_difference.step_size",
                format!("{} is not a positive finite step", step),
            ));
        }
        if let Some(bounds) = &self.bounds {
            bounds.validate()?;
        }
        Ok(())
    }
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            max_function_evaluations: default_max_function_evaluations(),
            finite_difference: FiniteDifferenceConfig::default(),
            bounds: None,
        }
    }
}

fn default_algorithm() -> String {
    "levenberg_marquardt".to_string()
}

fn default_max_function_evaluations() -> usize {
    10_000
}

/// Damping matrix of the Levenberg-Marquardt normal equations.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DampingSetting {
    #[default]
    Identity,
    Marquardt,
}

/// Levenberg-Marquardt tuning.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LevenbergMarquardtSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_initial_lambda")]
    pub initial_lambda: f64,
    #[serde(default = "default_lambda_decrease")]
    pub lambda_decrease: f64,
    #[serde(default = "default_max_lambda")]
    pub max_lambda: f64,
    #[serde(default = "default_max_rejections")]
    pub max_rejections: usize,
    /// Trial points per line search; defaults to the number of worker groups
    #[serde(default)]
    pub line_search_points: Option<usize>,
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,
    #[serde(default = "default_objective_tolerance")]
    pub objective_tolerance: f64,
    #[serde(default)]
    pub acceptance_tolerance: f64,
    #[serde(default)]
    pub damping: DampingSetting,
}

impl LevenbergMarquardtSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_lambda > 0.0 && self.initial_lambda.is_finite()) {
            return Err(ConfigError::invalid("levenberg_marquardt.initial_lambda", "must be positive"));
        }
        if !(self.lambda_decrease > 0.0 && self.lambda_decrease < 1.0) {
            return Err(ConfigError::invalid(
                "levenberg_marquardt.lambda_decrease",
                "must lie strictly between 0 and 1",
            ));
        }
        if self.max_lambda < self.initial_lambda {
            return Err(ConfigError::invalid(
                "levenberg_marquardt.max_lambda",
                "must not be below initial_lambda",
            ));
        }
        if self.line_search_points == Some(0) {
            return Err(ConfigError::invalid("levenberg_marquardt.line_search_points", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.acceptance_tolerance) {
            return Err(ConfigError::invalid(
                "levenberg_marquardt.acceptance_tolerance",
                "must lie in [0, 1)",
            ));
        }
        Ok(())
    }
}

impl Default for LevenbergMarquardtSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            initial_lambda: default_initial_lambda(),
            lambda_decrease: default_lambda_decrease(),
            max_lambda: default_max_lambda(),
            max_rejections: default_max_rejections(),
            line_search_points: None,
            step_tolerance: default_step_tolerance(),
            objective_tolerance: default_objective_tolerance(),
            acceptance_tolerance: 0.0,
            damping: DampingSetting::default(),
        }
    }
}

fn default_max_iterations() -> usize {
    1000
}

fn default_initial_lambda() -> f64 {
    0.01
}

fn default_lambda_decrease() -> f64 {
    0.1
}

fn default_max_lambda() -> f64 {
    1e12
}

fn default_max_rejections() -> usize {
    4
}

fn default_step_tolerance() -> f64 {
    1e-10
}

fn default_objective_tolerance() -> f64 {
    1e-20
}

/// Log output.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `convoy_cluster=debug`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.cluster.processes > 0);
        assert_eq!(settings.cluster.effective_worker_groups(), settings.cluster.processes);
        assert_eq!(settings.optimiser.algorithm, "levenberg_marquardt");
        assert_eq!(settings.levenberg_marquardt.max_rejections, 4);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [cluster]
            processes = 8
            worker_groups = 3
            remainder_policy = "proportional"
            reply_timeout_secs = 20

            [optimiser.finite_difference]
            mode = "centered"
            scaling = "relative"

            [levenberg_marquardt]
            damping = "marquardt"
            line_search_points = 5
            "#,
        )
        .unwrap();

        assert_eq!(settings.cluster.processes, 8);
        assert_eq!(settings.cluster.effective_worker_groups(), 3);
        assert_eq!(settings.cluster.remainder_policy, RemainderPolicySetting::Proportional);
        assert_eq!(settings.cluster.reply_timeout(), Some(Duration::from_secs(20)));
        assert_eq!(settings.optimiser.finite_difference.mode, DifferenceModeSetting::Centered);
        assert_eq!(settings.optimiser.finite_difference.scaling, StepScalingSetting::Relative);
        assert_eq!(settings.optimiser.finite_difference.step_size, 1e-7);
        assert_eq!(settings.levenberg_marquardt.damping, DampingSetting::Marquardt);
        assert_eq!(settings.levenberg_marquardt.line_search_points, Some(5));
        assert_eq!(settings.levenberg_marquardt.initial_lambda, 0.01);
        assert_eq!(settings.logging, LoggingConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            ("[cluster]\nprocesses = 2\nworker_groups = 3", "cluster.worker_groups"),
            ("[optimiser.finite_difference]\nstep_size = 0.0", "optimiser.finite_difference.step_size"),
            ("[optimiser.bounds]\nlower = [0.0, 1.0]\nupper = [1.0]", "optimiser.bounds"),
            ("[optimiser.bounds]\nlower = [0.0]", "optimiser.bounds"),
            (
                "[optimiser.bounds]\nlower = [0.0]\nupper = [1.0]\n[optimiser.bounds.relative]\nmax_factor = 2.0",
                "optimiser.bounds",
            ),
            (
                "[optimiser.bounds.relative]\nmin_factor = 3.0\nmax_factor = 2.0",
                "optimiser.bounds.relative",
            ),
            ("[optimiser.bounds.relative]\nmax_factor = -1.0", "optimiser.bounds.relative"),
            ("[levenberg_marquardt]\nlambda_decrease = 1.5", "levenberg_marquardt.lambda_decrease"),
            ("[levenberg_marquardt]\nline_search_points = 0", "levenberg_marquardt.line_search_points"),
        ];
        for (text, expected) in cases {
            match Settings::from_toml_str(text) {
                Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, expected),
                other => panic!("{} accepted: {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_relative_bounds_section() {
        let text = "[optimiser.bounds.relative]\nmin_factor = 0.5\nmax_factor = 2.0\npreserve_sign = true";
        let settings = Settings::from_toml_str(text).unwrap();
        let bounds = settings.optimiser.bounds.unwrap();
        assert!(bounds.lower.is_empty());
        assert_eq!(
            bounds.relative,
            Some(RelativeBoundsConfig {
                min_factor: 0.5,
                max_factor: 2.0,
                min_radius: 0.0,
                preserve_sign: true,
            })
        );
    }

    #[test]
    fn test_unknown_enum_value_is_parse_error() {
        let err = Settings::from_toml_str("[levenberg_marquardt]\ndamping = \"fletcher\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("convoy-settings-{}.toml", std::process::id()));
        std::fs::write(&path, "[optimiser]\nalgorithm = \"imfil\"\n[optimiser.bounds]\nlower = [0.0]\nupper = [1.0]\n")
            .unwrap();
        let settings = Settings::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.optimiser.algorithm, "imfil");
        assert_eq!(
            settings.optimiser.bounds,
            Some(BoundsConfig {
                lower: vec![0.0],
                upper: vec![1.0],
                relative: None,
            })
        );
        assert!(matches!(
            Settings::from_file(&path),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
