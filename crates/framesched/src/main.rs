//! framesched CLI
//!
//! Runs the producer/display simulation against a chosen scheduler variant
//! and prints what happened to every frame.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use framesched_core::config::{Config, LogFormat, SchedulerVariant, SimulationConfig};
use framesched_core::logging::{LogLevel, init_logging};
use framesched_core::simulation;

#[derive(Parser, Debug)]
#[command(
    name = "framesched",
    version,
    about = "Deadline-based frame display scheduling simulator"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true, env = "FRAMESCHED_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FRAMESCHED_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce frames on one thread and display them on another
    Simulate(SimulateArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Producer frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Number of frames to produce
    #[arg(long)]
    frames: Option<u64>,

    /// Schedule each frame this many milliseconds before its deadline
    #[arg(long)]
    lead_ms: Option<u64>,

    /// Stall the display thread after every N displayed frames
    #[arg(long, requires = "stall_ms")]
    stall_every: Option<u64>,

    /// Length of each display stall in milliseconds
    #[arg(long)]
    stall_ms: Option<u64>,

    /// Scheduler variant (core, clockless)
    #[arg(long)]
    variant: Option<SchedulerVariant>,

    /// Run the scheduler's clock ahead of the producer's by this much
    #[arg(long)]
    clock_offset_ms: Option<u64>,

    /// Give up after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl SimulateArgs {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if let Some(lead_ms) = self.lead_ms {
            config.lead_ms = lead_ms;
        }
        if let Some(stall_every) = self.stall_every {
            config.stall_every = stall_every;
        }
        if let Some(stall_ms) = self.stall_ms {
            config.stall_ms = stall_ms;
        }
        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some(clock_offset_ms) = self.clock_offset_ms {
            config.clock_offset_ms = clock_offset_ms;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
    }
}

impl Cli {
    /// File values, then command-line overrides.
    fn effective_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(level) = self.log_level {
            config.logging.level = level.to_string();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        if let Command::Simulate(args) = &self.command {
            args.apply(&mut config.simulation);
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.effective_config()?;

    match &cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Simulate(args) => {
            init_logging(&config.logging)?;
            tracing::debug!(config = ?config.simulation, "effective simulation config");
            let report = simulation::run(&config.simulation).context("simulation failed")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }
    }
    Ok(())
}
