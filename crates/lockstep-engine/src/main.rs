//! Engine binary for the lockstep runtime.
//!
//! Wires together configuration, the built-in model registry and the
//! command front-end. Commands arrive on standard input, one per line;
//! status and errors go to standard error, so snapshots piped through
//! the filesystem stay clean.
//!
//! # Startup sequence
//!
//! 1. Parse binary arguments.
//! 2. Load `lockstep.yaml` (or defaults when absent).
//! 3. Initialize structured logging (tracing, stderr).
//! 4. Load the configured model into a catalog and behavior table.
//! 5. Read and execute commands until `quit`.

mod config;
mod error;
mod front_end;
mod models;

use std::io::BufRead;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::front_end::{parse_command, FrontEnd, Outcome};

/// Distributed lock-step agent-simulation engine.
#[derive(Debug, Parser)]
#[command(name = "lockstep-engine", version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured tracing filter.
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from("lockstep.yaml"));
    let config = load_config(&config_path)?;

    let filter = args
        .log
        .clone()
        .unwrap_or_else(|| config.logging.filter.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    info!(
        model = config.model.name,
        masters = config.cluster.masters,
        "lockstep-engine starting"
    );

    let mut front_end = FrontEnd::new(config)?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(command)) => match front_end.handle(command) {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Quit) => break,
                Err(e) => error!(error = %e, "command failed"),
            },
            Err(e) => error!(error = %e, "command rejected"),
        }
    }

    info!("lockstep-engine shutdown complete");
    Ok(())
}

/// Load the engine configuration, falling back to defaults when the
/// file does not exist.
fn load_config(path: &Path) -> Result<EngineConfig, error::EngineError> {
    if path.exists() {
        Ok(EngineConfig::from_file(path)?)
    } else {
        info!(file = %path.display(), "config file not found, using defaults");
        Ok(EngineConfig::default())
    }
}
