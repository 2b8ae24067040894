//! Scenario-driven simulator CLI.

mod config;
mod driver;
mod logging;
mod setup;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use flowsim_core::SimClock;

use crate::config::{ConfigError, SimConfig};

#[derive(Debug, Parser)]
#[command(name = "flowsim", about = "Run a forwarding-plane simulation scenario")]
struct Args {
    /// Path to the TOML scenario file.
    scenario: PathBuf,

    /// Override the configured simulation duration.
    #[arg(long)]
    duration_ms: Option<u64>,
}

fn run(args: &Args) -> Result<(), ConfigError> {
    let mut config = SimConfig::load(&args.scenario)?;
    if let Some(duration_ms) = args.duration_ms {
        config.simulation.duration_ms = duration_ms;
    }
    info!(
        scenario = %args.scenario.display(),
        duration_ms = config.simulation.duration_ms,
        "starting simulation"
    );

    let clock = SimClock::new();
    let mut sim = setup::build(&config, clock.clone())?;
    driver::run(&mut sim, &clock, &config.simulation);

    info!(simulated = %clock.now(), "simulation finished");
    Ok(())
}

fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "simulation failed");
            ExitCode::FAILURE
        }
    }
}
