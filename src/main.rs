//! CamOrder command line
//!
//! # Usage
//!
//! ```bash
//! # Run an order against a simulated host
//! camorder run order.json --host-fixture host.json
//!
//! # Same, with a config file and machine-readable output
//! camorder --config camorder.toml run order.json --host-fixture host.json --json
//!
//! # Show the next program number without consuming it
//! camorder counter
//! ```

use anyhow::Context;
use camorder::{
    exit_code, init_logging, FileCounterStore, PipelineConfig, PipelineOptions,
    PipelineOrchestrator, ProgramCounterStore, SimulatedHost, BUILD_DATE, VERSION,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "camorder")]
#[command(version)]
#[command(about = "Drive a parametric CAD/CAM host from JSON orders to numbered G-code programs")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration file (.json or .toml)
    #[arg(long, short, global = true, env = "CAMORDER_CONFIG")]
    config: Option<PathBuf>,

    /// Program counter file, overriding the configuration
    #[arg(long, global = true)]
    counter_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an order
    Run {
        /// Order document
        order: PathBuf,

        /// JSON description of the host to drive
        #[arg(long)]
        host_fixture: PathBuf,

        /// Output directory when the order names none
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Directory for the run log, overriding the configuration
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Print the full result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show the next program number without consuming it
    Counter,
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(counter_file) = &cli.counter_file {
        config.counter.file = counter_file.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Counter => {
            let store = FileCounterStore::with_initial_value(
                &config.counter.file,
                config.counter.initial_value,
            );
            let next = store.peek().context("Failed to read program counter")?;
            println!("{}", next);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            order,
            host_fixture,
            output_dir,
            log_dir,
            json,
        } => {
            if let Some(dir) = output_dir {
                config.output.directory = dir;
            }
            if let Some(dir) = log_dir {
                config.logging.directory = dir;
            }
            config.validate().context("Invalid configuration")?;

            let log_path = init_logging(Some(&config.logging.directory), &config.logging.level)?;
            tracing::info!("CamOrder {} (built {})", VERSION, BUILD_DATE);
            if let Some(path) = log_path {
                tracing::info!("Run log: {}", path.display());
            }

            let host = SimulatedHost::load(&host_fixture)
                .with_context(|| format!("Failed to load host fixture {}", host_fixture.display()))?;
            let counter = FileCounterStore::with_initial_value(
                &config.counter.file,
                config.counter.initial_value,
            );
            let mut pipeline =
                PipelineOrchestrator::new(host, counter, PipelineOptions::from_config(&config));

            let result = pipeline
                .process_order_file(&order)
                .with_context(|| format!("Failed to process order {}", order.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.summary_message());
            }

            Ok(ExitCode::from(exit_code(result.status)))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
