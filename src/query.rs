//! Read-only view of the pipeline for outer layers (HTTP routes, CLI export).
//!
//! A `PipelineQuery` is cheap to clone and never blocks on serial I/O: it only
//! copies the history window or touches the log file.

use crate::error::{AppResult, BridgeError};
use crate::history::HistoryBuffer;
use crate::record::SensorRecord;
use crate::sink::CsvLogSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle on the history window and the durable log.
#[derive(Debug, Clone)]
pub struct PipelineQuery {
    history: Arc<HistoryBuffer>,
    sink: Arc<CsvLogSink>,
}

impl PipelineQuery {
    /// Query over an existing window and log.
    pub fn new(history: Arc<HistoryBuffer>, sink: Arc<CsvLogSink>) -> Self {
        Self { history, sink }
    }

    /// Copy of the recent readings, oldest first.
    pub fn snapshot(&self) -> Vec<SensorRecord> {
        self.history.snapshot()
    }

    /// Recent readings as a JSON array keyed by the log column names.
    pub fn snapshot_json(&self) -> AppResult<serde_json::Value> {
        Ok(serde_json::to_value(self.snapshot())?)
    }

    /// Most recent reading, if any.
    pub fn latest(&self) -> Option<SensorRecord> {
        self.history.latest()
    }

    /// Path of the durable log, or `None` until the first record was written.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.sink.exists().then(|| self.sink.path().to_path_buf())
    }

    /// Copy the durable log to `dest`.
    ///
    /// Not coordinated with the writer. A recovery rewrite replaces the file by
    /// rename, so the copy is either the log before or after that append.
    pub fn export_log(&self, dest: &Path) -> AppResult<u64> {
        if !self.sink.exists() {
            return Err(BridgeError::LogNotCreated);
        }
        Ok(self.sink.export_to(dest)?)
    }
}
