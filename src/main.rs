//! CLI entry point for jfstream.
//!
//! ```bash
//! # Full in-process session: mock capture, loopback fabric, local peer
//! jfstream simulate --config config/jfstream.toml
//!
//! # Load, validate and print the effective configuration
//! jfstream check-config --config config/jfstream.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jfstream::config::{JfConfig, DEFAULT_CONFIG_PATH};
use jfstream::telemetry::{self, TracingConfig};
use std::path::PathBuf;
use tracing::info;

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "jfstream")]
#[command(about = "Detector frame transport pipeline", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a complete session against mock capture and a local peer
    Simulate {
        /// Override the number of output frames
        #[arg(long)]
        frames: Option<u64>,

        /// Override the worker count
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = JfConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let tracing_config = TracingConfig::from_logging(&config.logging).map_err(anyhow::Error::msg)?;
    telemetry::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Simulate { frames, workers } => {
            if let Some(frames) = frames {
                config.experiment.nframes_to_write = frames;
            }
            if let Some(workers) = workers {
                config.receiver.workers = workers;
            }
            run_simulation(&config).await
        }
        Commands::CheckConfig => check_config(&config),
    }
}

async fn run_simulation(config: &JfConfig) -> Result<()> {
    let report = jfstream::simulate(config).await.context("simulation failed")?;

    match report.run {
        Some(run) => {
            info!(
                frames_sent = run.frames_sent,
                blank_frames = run.blank_frames,
                trigger_frame = run.trigger_frame,
                peak_buffers = run.peak_buffers,
                queue_full_retries = run.queue_full_retries,
                elapsed_ms = run.elapsed.as_millis() as u64,
                "run complete"
            );
            let seconds = run.elapsed.as_secs_f64().max(f64::EPSILON);
            println!(
                "sent {} frames ({} MiB) in {:.3} s, {:.1} frames/s",
                report.peer.frames_received,
                report.peer.bytes_received / (1024 * 1024),
                seconds,
                run.frames_sent as f64 / seconds
            );
        }
        None => println!("peer requested quit; no frames sent"),
    }
    Ok(())
}

fn check_config(config: &JfConfig) -> Result<()> {
    config.validate().map_err(anyhow::Error::msg)?;
    let layout = config.layout().map_err(anyhow::Error::msg)?;
    println!("{}", serde_json::to_string_pretty(config)?);
    println!(
        "composite image: {} x {} pixels, {} modules",
        layout.composite_width(),
        layout.composite_height(),
        layout.modules()
    );
    Ok(())
}
