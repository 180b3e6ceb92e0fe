//! Check command implementation
//!
//! Validates the configuration and prints the process topology it describes.

use std::io::Write;

use tracing::info;

use crate::setup;
use crate::Result;

/// Run the check command
pub fn run(settings: &infra_config::Settings) -> Result<()> {
    info!("Checking configuration...");
    settings.validate()?;
    let partition = setup::partition(&settings.cluster)?;

    let mut out = std::io::stdout().lock();
    writeln!(out, "Convoy Configuration Check")?;
    writeln!(out, "==========================\n")?;

    writeln!(out, "Cluster:")?;
    writeln!(out, "  Processes: {}", partition.world_size())?;
    writeln!(out, "  Worker groups: {}", partition.n_groups())?;
    writeln!(out, "  Group sizes: {:?}", partition.group_sizes())?;
    writeln!(out, "  Leaders: {:?}", partition.leaders())?;
    match settings.cluster.reply_timeout() {
        Some(timeout) => writeln!(out, "  Reply timeout: {:?}", timeout)?,
        None => writeln!(out, "  Reply timeout: none")?,
    }
    writeln!(out, "  CPU cores: {}", std::thread::available_parallelism().map_or(1, |n| n.get()))?;
    writeln!(out)?;

    writeln!(out, "Optimiser:")?;
    writeln!(out, "  Algorithm: {}", settings.optimiser.algorithm)?;
    writeln!(out, "  Evaluation budget: {}", settings.optimiser.max_function_evaluations)?;
    writeln!(out, "  Finite differences: {:?}", setup::finite_difference(&settings.optimiser.finite_difference))?;
    writeln!(out)?;

    writeln!(out, "Partition:")?;
    write!(out, "{}", partition.describe())?;
    writeln!(out)?;

    writeln!(out, "All checks passed!")?;
    Ok(())
}
