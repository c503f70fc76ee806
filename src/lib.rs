//! # CamOrder
//!
//! Unattended order pipeline for parametric CAD/CAM hosts:
//! - Applies per-component parameter values from a JSON order
//! - Regenerates every toolpath and classifies each CAM setup
//! - Posts regenerated setups as numbered G-code programs
//! - Records a structured per-stage result for every component
//!
//! ## Architecture
//!
//! CamOrder is organized as a workspace with multiple crates:
//!
//! 1. **camorder-core** - Order model, host abstraction, result types, simulated host
//! 2. **camorder-settings** - Pipeline configuration and the program counter store
//! 3. **camorder-pipeline** - Parameter, regeneration, and post stages plus orchestration
//! 4. **camorder** - Main binary that wires configuration, logging, and a host together

use chrono::Local;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use camorder_core::{
    ComponentResult, HostSession, Order, OrderResult, RunStatus, SimulatedHost,
};
pub use camorder_pipeline::{PipelineError, PipelineOptions, PipelineOrchestrator};
pub use camorder_settings::{FileCounterStore, PipelineConfig, ProgramCounterStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Name of the run log file for a run starting now
pub fn run_log_file_name() -> String {
    format!("pipeline_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Process exit code for an order outcome
pub fn exit_code(status: RunStatus) -> u8 {
    match status {
        RunStatus::Success => 0,
        RunStatus::Failed => 1,
        RunStatus::PartialSuccess => 2,
    }
}

/// Initialize logging for a pipeline run
///
/// Sets up structured logging with:
/// - Console output
/// - RUST_LOG environment variable support, falling back to `level`
/// - An append-only run log in `log_dir`, when given
///
/// Returns the path of the run log.
pub fn init_logging(log_dir: Option<&Path>, level: &str) -> anyhow::Result<Option<PathBuf>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e))?;

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_level(true);

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .try_init()?;
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(run_log_file_name());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(Some(log_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_file_name() {
        let name = run_log_file_name();
        assert!(name.starts_with("pipeline_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "pipeline_YYYYMMDD_HHMMSS.log".len());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(RunStatus::Success), 0);
        assert_eq!(exit_code(RunStatus::Failed), 1);
        assert_eq!(exit_code(RunStatus::PartialSuccess), 2);
    }
}
