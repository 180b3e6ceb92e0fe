//! Algorithms command implementation
//!
//! Lists the built-in algorithms and their properties.

use std::io::Write;

use convoy_optimiser::AlgorithmId;

use crate::Result;

fn flag(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Run the algorithms command
pub fn run() -> Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(
        out,
        "{:<22} {:>13} {:>12} {:>15} {:>14}",
        "name", "least squares", "derivatives", "requires bounds", "allows bounds"
    )?;
    for id in AlgorithmId::ALL {
        let p = id.properties();
        writeln!(
            out,
            "{:<22} {:>13} {:>12} {:>15} {:>14}",
            p.name,
            flag(p.least_squares),
            flag(p.uses_derivatives),
            flag(p.requires_bounds),
            flag(p.allows_bounds)
        )?;
    }
    Ok(())
}
