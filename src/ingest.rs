//! Ingestion loop: discovery, connection lifecycle and record fan-out.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──device found──> Connecting ──opened──> Connected
//!      ▲                              │                     │
//!      │                        open failed           read error / EOF
//!      │                              ▼                     ▼
//!      └────────── retry delay ◄──────┴─────────────────────┘
//! ```
//!
//! Each decoded record goes to the history window first and then to the durable
//! log. The log append runs on the blocking pool and its failures never stop
//! the loop; a record lost from the log stays in the window.
//!
//! Nothing runs until [`IngestionLoop::spawn`] is called, and the returned
//! [`IngestionHandle`] is the only way to stop it. Dropping the handle without
//! calling [`IngestionHandle::shutdown`] also stops the loop.

use crate::config::BridgeConfig;
use crate::decoder::decode;
use crate::error::{AppResult, BridgeError};
use crate::history::HistoryBuffer;
use crate::locator::{DeviceLocator, PortEnumerator, PortInfo};
use crate::query::PipelineQuery;
use crate::serial::{DynSerial, LineReader, LinkSettings, ReadOutcome, SerialConnector};
use crate::sink::{AppendOutcome, CsvLogSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{debug, error, info, instrument, trace, warn};

/// Link state of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device open; discovery runs after the retry delay.
    Disconnected,
    /// A device was located and its port is being opened.
    Connecting,
    /// Reading frames from the device.
    Connected,
}

impl ConnectionState {
    /// Short status label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
        }
    }
}

/// Timing and line settings for the loop.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Baud rate and read timeout for the device
    pub link: LinkSettings,
    /// Fixed delay applied on every return to `Disconnected`
    pub retry_delay: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            link: LinkSettings::default(),
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl From<&BridgeConfig> for IngestionConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            link: LinkSettings {
                baud_rate: config.serial.baud_rate,
                read_timeout: config.serial.read_timeout(),
            },
            retry_delay: config.serial.retry_delay(),
        }
    }
}

/// Running counters, shared between the loop and its handle.
#[derive(Debug, Default)]
pub struct IngestStats {
    frames: AtomicU64,
    decode_failures: AtomicU64,
    records: AtomicU64,
    persisted: AtomicU64,
    sink_recoveries: AtomicU64,
    sink_failures: AtomicU64,
    connections: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Non-empty lines read from the device
    pub frames: u64,
    /// Lines discarded because they did not decode
    pub decode_failures: u64,
    /// Records pushed to the history window
    pub records: u64,
    /// Records written to the durable log
    pub persisted: u64,
    /// Appends that went through the rewrite recovery
    pub sink_recoveries: u64,
    /// Records the durable log failed to store
    pub sink_failures: u64,
    /// Successful connections, reconnects included
    pub connections: u64,
}

impl IngestStats {
    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            sink_recoveries: self.sink_recoveries.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The background worker that owns the device connection.
pub struct IngestionLoop<E, C> {
    locator: Arc<DeviceLocator<E>>,
    connector: C,
    history: Arc<HistoryBuffer>,
    sink: Arc<CsvLogSink>,
    config: IngestionConfig,
    stats: Arc<IngestStats>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<E, C> IngestionLoop<E, C>
where
    E: PortEnumerator + 'static,
    C: SerialConnector + 'static,
{
    /// Assemble a loop from its parts. Nothing runs until [`Self::spawn`].
    pub fn new(
        locator: DeviceLocator<E>,
        connector: C,
        history: Arc<HistoryBuffer>,
        sink: Arc<CsvLogSink>,
        config: IngestionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            locator: Arc::new(locator),
            connector,
            history,
            sink,
            config,
            stats: Arc::new(IngestStats::default()),
            state_tx,
        }
    }

    /// Build the loop, its history window and its sink from configuration.
    pub fn from_config(config: &BridgeConfig, enumerator: E, connector: C) -> Self {
        Self::new(
            DeviceLocator::new(enumerator, config.serial.identity_markers.clone()),
            connector,
            Arc::new(HistoryBuffer::new(config.history.max_records)),
            Arc::new(CsvLogSink::new(config.storage.log_path.clone())),
            IngestionConfig::from(config),
        )
    }

    /// Start the loop on the current tokio runtime.
    pub fn spawn(self) -> IngestionHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state_rx = self.state_tx.subscribe();
        let query = PipelineQuery::new(self.history.clone(), self.sink.clone());
        let stats = self.stats.clone();
        let task = tokio::spawn(self.run(shutdown_rx));

        IngestionHandle {
            task,
            shutdown_tx,
            state_rx,
            query,
            stats,
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            baud = self.config.link.baud_rate,
            markers = ?self.locator.markers(),
            "Ingestion loop started"
        );
        tokio::select! {
            _ = &mut shutdown => {}
            _ = self.run_forever() => {}
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Ingestion loop stopped");
    }

    async fn run_forever(&mut self) {
        loop {
            let Some(port) = self.discover().await else {
                debug!("Controller not detected, retrying");
                self.back_off().await;
                continue;
            };

            self.set_state(ConnectionState::Connecting);
            info!(port = %port.name, description = %port.description, "Controller detected");

            let stream = match self.connector.open(&port, &self.config.link).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(port = %port.name, error = %e, "Failed to open serial port");
                    self.set_state(ConnectionState::Disconnected);
                    self.back_off().await;
                    continue;
                }
            };

            self.set_state(ConnectionState::Connected);
            IngestStats::bump(&self.stats.connections);
            info!(port = %port.name, "Serial connected");

            let cause = self.pump(&port, stream).await;
            warn!(
                port = %port.name,
                error = %cause,
                retriable = cause.is_retriable(),
                "Lost connection, waiting for controller"
            );
            self.set_state(ConnectionState::Disconnected);
            self.back_off().await;
        }
    }

    /// Run discovery on the blocking pool; enumeration may touch the OS.
    async fn discover(&self) -> Option<PortInfo> {
        let locator = self.locator.clone();
        match spawn_blocking(move || locator.locate()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Device discovery task failed");
                None
            }
        }
    }

    /// Read frames until the connection fails. The stream is closed on return.
    #[instrument(skip_all, fields(port = %port.name))]
    async fn pump(&self, port: &PortInfo, stream: DynSerial) -> BridgeError {
        let mut reader = LineReader::new(stream, self.config.link.read_timeout);
        loop {
            match reader.next_line().await {
                Ok(ReadOutcome::Idle) => continue,
                Ok(ReadOutcome::Line(line)) if line.is_empty() => continue,
                Ok(ReadOutcome::Line(line)) => self.ingest_line(&line).await,
                Err(e) => return e,
            }
        }
    }

    async fn ingest_line(&self, line: &str) {
        IngestStats::bump(&self.stats.frames);

        let record = match decode(line) {
            Ok(record) => record,
            Err(e) => {
                IngestStats::bump(&self.stats.decode_failures);
                debug!(error = %e, frame = line, "Discarding undecodable frame");
                return;
            }
        };

        self.history.push(record.clone());
        IngestStats::bump(&self.stats.records);
        trace!(?record, "Record received");

        let sink = self.sink.clone();
        match spawn_blocking(move || sink.append(&record)).await {
            Ok(Ok(outcome)) => {
                IngestStats::bump(&self.stats.persisted);
                if let AppendOutcome::Recovered { .. } = outcome {
                    IngestStats::bump(&self.stats.sink_recoveries);
                }
            }
            Ok(Err(e)) => {
                IngestStats::bump(&self.stats.sink_failures);
                error!(error = %e, "Record kept in memory but lost from durable log");
            }
            Err(e) => {
                IngestStats::bump(&self.stats.sink_failures);
                error!(error = %e, "Durable log append task failed");
            }
        }
    }

    async fn back_off(&self) {
        tokio::time::sleep(self.config.retry_delay).await;
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = previous.label(), to = state.label(), "Connection state changed");
        }
    }
}

/// Handle to a running ingestion loop.
pub struct IngestionHandle {
    task: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
    state_rx: watch::Receiver<ConnectionState>,
    query: PipelineQuery,
    stats: Arc<IngestStats>,
}

impl std::fmt::Debug for IngestionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionHandle")
            .field("task", &"<JoinHandle>")
            .field("shutdown_tx", &"<oneshot::Sender>")
            .field("state", &*self.state_rx.borrow())
            .field("query", &self.query)
            .finish()
    }
}

impl IngestionHandle {
    /// Read-only query interface for outer layers.
    pub fn query(&self) -> PipelineQuery {
        self.query.clone()
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every link state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request graceful shutdown and wait for the loop to exit.
    pub async fn shutdown(self) -> AppResult<()> {
        let _ = self.shutdown_tx.send(());
        self.task.await?;
        Ok(())
    }
}
