//! Custom error types for the ingestion pipeline.
//!
//! This module defines the primary error type, `BridgeError`, together with the
//! narrower errors raised by the decoder and the durable log sink. Using the
//! `thiserror` crate, it provides a centralized way to tell transient conditions
//! (a malformed frame, a pulled USB cable) apart from faults that lose data.
//!
//! ## Error Hierarchy
//!
//! - **`DecodeError`**: a single frame could not be turned into a record. Always
//!   transient: the frame is discarded and the loop keeps reading.
//! - **`AppendFault`**: the incremental append path of the sink refused the
//!   existing file. Never surfaced on its own, it only triggers recovery.
//! - **`SinkError`**: the sink could not persist a record at all, including the
//!   full-rewrite recovery. Fatal for that one append.
//! - **`BridgeError`**: everything else (configuration, serial I/O, task joins)
//!   plus `#[from]` wrappers for the two errors above.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, BridgeError>;

/// Reasons a single text frame could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The line held no text
    #[error("empty frame")]
    Empty,

    /// Not a JSON object, or a known field had the wrong type
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Why the incremental append path rejected the existing log file.
#[derive(Error, Debug)]
pub enum AppendFault {
    /// The first line is not the expected header
    #[error("header mismatch: found {found:?}")]
    HeaderMismatch {
        /// First line of the file as read
        found: String,
    },

    /// The last row is missing its newline
    #[error("log file does not end with a record terminator")]
    TruncatedTail,

    /// Reading or appending failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the row failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure to persist a record in the durable log.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The log did not exist and could not be created
    #[error("failed to create log file {}: {source}", path.display())]
    Create {
        /// Log file path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// The incremental append failed and so did the rewrite
    #[error("recovery of {} failed after append fault ({fault}): {reason}", path.display())]
    RecoveryFailed {
        /// Log file path
        path: PathBuf,
        /// Why the incremental append was abandoned
        fault: AppendFault,
        /// Why the rewrite failed
        reason: String,
    },
}

/// Primary error type for the crate.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Loading or extracting configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds an invalid value
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Read failure on the serial stream or a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port enumeration or open failed
    #[error("Serial error: {0}")]
    Serial(String),

    /// The device closed the stream
    #[error("Serial port closed by device")]
    SerialUnexpectedEof,

    /// A frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The durable log could not store a record
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Records could not be rendered as JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Export was requested before the first record was written
    #[error("Log file has not been created yet")]
    LogNotCreated,

    /// A spawned task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl BridgeError {
    /// Whether the ingestion loop should treat this error as an expected,
    /// locally-retried condition rather than a lost record or a setup fault.
    pub fn is_retriable(&self) -> bool {
        match self {
            BridgeError::Io(_)
            | BridgeError::Serial(_)
            | BridgeError::SerialUnexpectedEof
            | BridgeError::Decode(_) => true,
            BridgeError::Config(_)
            | BridgeError::Configuration(_)
            | BridgeError::Sink(_)
            | BridgeError::Serialization(_)
            | BridgeError::LogNotCreated
            | BridgeError::Task(_) => false,
        }
    }
}

impl From<figment::Error> for BridgeError {
    fn from(value: figment::Error) -> Self {
        BridgeError::Config(Box::new(value))
    }
}

impl From<tokio::task::JoinError> for BridgeError {
    fn from(value: tokio::task::JoinError) -> Self {
        BridgeError::Task(value.to_string())
    }
}
