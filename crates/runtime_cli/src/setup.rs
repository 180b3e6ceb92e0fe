//! Translation of loaded settings into library types.

use std::sync::Arc;

use convoy_cluster::{Partition, RemainderPolicy};
use convoy_core::{Bounds, FiniteDifferenceMode, FiniteDifferenceSettings, RelativeBounds, StepScaling};
use convoy_optimiser::{Algorithm, AlgorithmId, Damping, LevenbergMarquardt, LevenbergMarquardtConfig};
use infra_config::{
    BoundsConfig, ClusterConfig, DampingSetting, DifferenceModeSetting, FiniteDifferenceConfig,
    LevenbergMarquardtSettings, RemainderPolicySetting, Settings, StepScalingSetting,
};

use crate::Result;

/// Partition described by the cluster section.
pub fn partition(cluster: &ClusterConfig) -> Result<Arc<Partition>> {
    let policy = match cluster.remainder_policy {
        RemainderPolicySetting::FrontLoaded => RemainderPolicy::FrontLoaded,
        RemainderPolicySetting::Proportional => RemainderPolicy::Proportional,
    };
    let partition = Partition::create_with_policy(cluster.processes, cluster.effective_worker_groups(), policy)?;
    Ok(Arc::new(partition))
}

pub fn finite_difference(config: &FiniteDifferenceConfig) -> FiniteDifferenceSettings {
    FiniteDifferenceSettings {
        mode: match config.mode {
            DifferenceModeSetting::Forward => FiniteDifferenceMode::Forward,
            DifferenceModeSetting::Centered => FiniteDifferenceMode::Centered,
        },
        step_size: config.step_size,
        scaling: match config.scaling {
            StepScalingSetting::Absolute => StepScaling::Absolute,
            StepScalingSetting::Relative => StepScaling::Relative,
        },
    }
}

/// Bounds from the settings; relative rules are applied around `initial`.
pub fn bounds(config: &BoundsConfig, initial: &[f64]) -> Result<Bounds> {
    let bounds = match &config.relative {
        Some(relative) => Bounds::relative(
            initial,
            &RelativeBounds {
                min_factor: relative.min_factor,
                max_factor: relative.max_factor,
                min_radius: relative.min_radius,
                preserve_sign: relative.preserve_sign,
            },
        )?,
        None => Bounds::new(config.lower.clone(), config.upper.clone())?,
    };
    Ok(bounds)
}

pub fn levenberg_marquardt(settings: &LevenbergMarquardtSettings) -> LevenbergMarquardtConfig {
    LevenbergMarquardtConfig {
        max_iterations: settings.max_iterations,
        initial_lambda: settings.initial_lambda,
        lambda_decrease: settings.lambda_decrease,
        max_lambda: settings.max_lambda,
        max_rejections: settings.max_rejections,
        line_search_points: settings.line_search_points,
        step_tolerance: settings.step_tolerance,
        objective_tolerance: settings.objective_tolerance,
        acceptance_tolerance: settings.acceptance_tolerance,
        damping: match settings.damping {
            DampingSetting::Identity => Damping::Identity,
            DampingSetting::Marquardt => Damping::Marquardt,
        },
    }
}

/// The algorithm `id`, configured from the settings where they apply.
pub fn algorithm(id: AlgorithmId, settings: &Settings) -> Algorithm {
    match id {
        AlgorithmId::LevenbergMarquardt => Algorithm::LevenbergMarquardt(LevenbergMarquardt::with_config(
            levenberg_marquardt(&settings.levenberg_marquardt),
        )),
        other => other.create(),
    }
}
