//! # runtime_cli
//!
//! The `convoy` command-line tool.
//!
//! ## Commands
//!
//! - `check`: validate the settings and print the process topology
//! - `algorithms`: list the built-in algorithms
//! - `run`: solve a demonstration problem over the configured cluster
//!
//! Settings come from `config/*.toml` and `CONVOY__*` environment variables,
//! or from the file given with `--config`.

mod commands;
mod error;
mod problems;
mod setup;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use infra_config::Settings;
use tracing::error;
use tracing_subscriber::EnvFilter;

use error::Result;

#[derive(Debug, Parser)]
#[command(name = "convoy", version, about = "Group-parallel numerical optimisation")]
struct Cli {
    /// Settings file; replaces the `config/` directory lookup
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override `cluster.processes`
    #[arg(long, global = true)]
    processes: Option<usize>,

    /// Override `cluster.worker_groups`
    #[arg(long, global = true)]
    groups: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the settings and print the process topology
    Check,
    /// List the built-in algorithms
    Algorithms,
    /// Solve a demonstration problem
    Run(commands::run::RunArgs),
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };
    if let Some(processes) = cli.processes {
        settings.cluster.processes = processes;
    }
    if let Some(groups) = cli.groups {
        settings.cluster.worker_groups = groups;
    }
    settings.validate()?;
    Ok(settings)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn execute(cli: &Cli, settings: &Settings) -> Result<()> {
    match &cli.command {
        Command::Check => commands::check::run(settings),
        Command::Algorithms => commands::algorithms::run(),
        Command::Run(args) => commands::run::run(settings, args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            init_tracing("info");
            error!(error = %e, "Failed to load settings");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.logging.level);

    match execute(&cli, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let argv = ["convoy", "run", "--problem", "linear-fit", "-a", "bfgs", "--groups", "2"];
        let cli = Cli::try_parse_from(argv).unwrap();
        assert_eq!(cli.groups, Some(2));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.problem, problems::DemoProblem::LinearFit);
                assert_eq!(args.algorithm.as_deref(), Some("bfgs"));
                assert_eq!(args.delay_ms, 0);
            }
            other => panic!("parsed {:?}", other),
        }
    }
}
