//! # BridgeBrain Ingestion Library
//!
//! Reads JSON telemetry frames from a bridge-monitoring controller board over a
//! USB serial link, keeps a bounded window of recent readings in memory and
//! appends every reading to a durable CSV log.
//!
//! ## Crate Structure
//!
//! - **`locator`**: finds the controller among the attached serial ports.
//! - **`serial`**: opens the port and frames its byte stream into lines.
//! - **`decoder`**: turns one text frame into a [`record::SensorRecord`].
//! - **`history`**: thread-safe bounded window of recent records.
//! - **`sink`**: append-only CSV log with rewrite recovery.
//! - **`ingest`**: the background loop tying the above together, with
//!   reconnect on any failure.
//! - **`query`**: read-only access for outer layers (live snapshot, export).
//! - **`config`**, **`error`**, **`tracing_init`**: ambient infrastructure.
//!
//! ## Example
//!
//! ```no_run
//! use bridgebrain::config::BridgeConfig;
//! use bridgebrain::ingest::IngestionLoop;
//! use bridgebrain::locator::SystemPorts;
//! use bridgebrain::serial::TokioSerialConnector;
//!
//! # async fn run() -> bridgebrain::error::AppResult<()> {
//! let config = BridgeConfig::load()?;
//! let handle = IngestionLoop::from_config(&config, SystemPorts, TokioSerialConnector).spawn();
//! let recent = handle.query().snapshot();
//! println!("{} readings so far", recent.len());
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod history;
pub mod ingest;
pub mod locator;
pub mod query;
pub mod record;
pub mod serial;
pub mod sink;
pub mod tracing_init;

pub use error::{AppResult, BridgeError};
