//! CLI entry point for bore-daq
//!
//! Provides command-line interface for:
//! - Running one supervised acquisition (Ctrl+C cancels it)
//! - Checking a configuration file
//! - Showing the next archive identifier
//!
//! # Usage
//!
//! ```bash
//! bore-daq run --config config/bore_daq.toml
//! bore-daq check-config --config config/bore_daq.toml
//! bore-daq next-id /data/holes/archive --row 1
//! ```

use anyhow::{Context, Result};
use bore_daq::archive::next_destination_id;
use bore_daq::config::{PipelineConfig, DEFAULT_CONFIG_PATH};
use bore_daq::events::PipelineEvent;
use bore_daq::supervisor::ProcessSupervisor;
use bore_daq::tracing_setup;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "bore-daq")]
#[command(about = "Borehole diameter acquisition pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition until the control script finishes or Ctrl+C
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Print every event as JSON instead of status lines
        #[arg(long)]
        json: bool,
    },

    /// Load and validate a configuration file, then print it
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print the identifier the next archived run would get
    NextId {
        /// Archive root
        root: PathBuf,

        /// Row number
        #[arg(long, default_value = "1")]
        row: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, json } => run(config, json).await,
        Commands::CheckConfig { config } => check_config(config),
        Commands::NextId { root, row } => {
            let id = next_destination_id(&root, row)
                .with_context(|| format!("scanning {}", root.display()))?;
            println!("{id}");
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load(&path)?;
    println!("Configuration OK: {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn run(path: PathBuf, json: bool) -> Result<()> {
    let config = load(&path)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let supervisor = Arc::new(ProcessSupervisor::with_logging_sink(config));
    let mut events = supervisor.subscribe();

    let starter = supervisor.clone();
    let run_id = tokio::task::spawn_blocking(move || starter.start_configured()).await??;
    tracing::info!(%run_id, "Press Ctrl+C to stop");

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PipelineEvent::Finished(outcome)) => break outcome,
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer fell behind");
                }
                Err(RecvError::Closed) => anyhow::bail!("event bus closed before the run finished"),
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Ctrl+C received, stopping run");
                let stopper = supervisor.clone();
                let stopped = tokio::task::spawn_blocking(move || stopper.stop()).await?;
                match stopped.or_else(|| supervisor.wait_for_outcome(Duration::from_secs(1))) {
                    Some(outcome) => break outcome,
                    None => anyhow::bail!("run ended without an outcome"),
                }
            }
        }
    };

    if json {
        println!("{}", serde_json::to_string(&PipelineEvent::Finished(outcome.clone()))?);
    } else {
        println!(
            "{}: {} (started {}, ran {:.1?})",
            outcome.kind,
            outcome.message,
            outcome.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            outcome.duration
        );
    }

    if supervisor.config().archive.enabled {
        let waiter = supervisor.clone();
        let archived =
            tokio::task::spawn_blocking(move || waiter.wait_for_archive(Duration::from_secs(30)))
                .await?;
        match archived {
            Some(Ok(record)) => println!(
                "Archived as {} ({})",
                record.destination_id,
                record.destination_path.display()
            ),
            Some(Err(e)) => eprintln!("Archival failed: {e}"),
            None => {}
        }
    }

    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!("run {}: {}", outcome.kind, outcome.message)
    }
}

fn print_event(event: &PipelineEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        PipelineEvent::ParseFailure {
            line_number,
            line,
            reason,
        } => println!("  line {line_number}: {reason}: {line}"),
        PipelineEvent::ControlOutput(line) => println!("  [control] {line}"),
        // Status lines already go through the log.
        _ => {}
    }
    Ok(())
}
