//! CLI Entry Point for bridgebrain
//!
//! # Usage
//!
//! Run the ingestion loop until Ctrl+C:
//! ```bash
//! bridgebrain run --config config/bridgebrain.toml
//! ```
//!
//! List serial ports and show which one would be picked:
//! ```bash
//! bridgebrain ports
//! ```
//!
//! Copy the durable log somewhere else:
//! ```bash
//! bridgebrain export --out /tmp/bridge_data.csv
//! ```

use anyhow::{Context, Result};
use bridgebrain::config::{BridgeConfig, DEFAULT_CONFIG_PATH};
use bridgebrain::history::HistoryBuffer;
use bridgebrain::ingest::IngestionLoop;
use bridgebrain::locator::{select_port, DeviceLocator, SystemPorts};
use bridgebrain::query::PipelineQuery;
use bridgebrain::serial::TokioSerialConnector;
use bridgebrain::sink::CsvLogSink;
use bridgebrain::tracing_init::{self, TracingConfig};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "bridgebrain")]
#[command(about = "Serial sensor ingestion for bridge load monitoring", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log span open and close events
    #[arg(long, global = true)]
    log_spans: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest from the controller until interrupted
    Run,

    /// List serial ports and mark the one matching the identity markers
    Ports,

    /// Copy the durable log to another file
    Export {
        /// Destination path
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BridgeConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    tracing_init::init(
        TracingConfig::from_config(&config)?
            .with_span_events(cli.log_spans)
            .with_ansi(std::io::stdout().is_terminal()),
    )?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Ports => list_ports(&config),
        Commands::Export { out } => export(&config, out),
    }
}

async fn run(config: BridgeConfig) -> Result<()> {
    info!(
        app = %config.application.name,
        log = %config.storage.log_path.display(),
        history = config.history.max_records,
        "Starting ingestion"
    );

    let handle = IngestionLoop::from_config(&config, SystemPorts, TokioSerialConnector).spawn();

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    let stats = handle.stats();
    handle.shutdown().await?;
    info!(
        frames = stats.frames,
        decode_failures = stats.decode_failures,
        persisted = stats.persisted,
        sink_failures = stats.sink_failures,
        connections = stats.connections,
        "Ingestion stopped"
    );
    Ok(())
}

fn list_ports(config: &BridgeConfig) -> Result<()> {
    let locator = DeviceLocator::new(SystemPorts, config.serial.identity_markers.clone());
    let ports = locator.ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    let selected = select_port(&ports, locator.markers()).map(|p| p.name.clone());
    for port in &ports {
        let mark = if selected.as_deref() == Some(port.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{mark} {:<20} {}", port.name, port.description);
    }
    if selected.is_none() {
        println!("No port matches markers {:?}", locator.markers());
    }
    Ok(())
}

fn export(config: &BridgeConfig, out: PathBuf) -> Result<()> {
    let query = PipelineQuery::new(
        Arc::new(HistoryBuffer::new(config.history.max_records)),
        Arc::new(CsvLogSink::new(config.storage.log_path.clone())),
    );
    let bytes = query
        .export_log(&out)
        .with_context(|| format!("exporting {}", config.storage.log_path.display()))?;
    println!("Exported {bytes} bytes to {}", out.display());
    Ok(())
}
