//! Serial link: opening the controller's port and framing its output into lines.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`SerialConnector`]: opens a [`DynSerial`] for a located port
//! - [`LineReader`]: newline framing with a per-read timeout
//!
//! Any `AsyncRead + AsyncWrite` works as a port, so tests drive the pipeline
//! with `tokio::io::duplex` instead of hardware.

use crate::error::{AppResult, BridgeError};
use crate::locator::PortInfo;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

/// Longest frame kept while waiting for a newline; longer input is dropped.
pub const MAX_FRAME_LEN: usize = 4096;

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Line settings for the controller link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Line speed (8N1, no flow control)
    pub baud_rate: u32,
    /// How long a single line read may wait before reporting an idle read
    pub read_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Opens a serial connection to a located device.
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Open `port` with `settings`.
    async fn open(&self, port: &PortInfo, settings: &LinkSettings) -> AppResult<DynSerial>;
}

/// Opens real ports through `tokio-serial` (8N1, no flow control).
#[cfg(feature = "serial")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSerialConnector;

#[cfg(feature = "serial")]
#[async_trait]
impl SerialConnector for TokioSerialConnector {
    async fn open(&self, port: &PortInfo, settings: &LinkSettings) -> AppResult<DynSerial> {
        use tokio::task::spawn_blocking;
        use tokio_serial::SerialPortBuilderExt;

        let path = port.name.clone();
        let settings = settings.clone();

        // Opening can block on some drivers; keep it off the async workers.
        let stream = spawn_blocking(move || {
            tokio_serial::new(&path, settings.baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .timeout(settings.read_timeout)
                .open_native_async()
                .map_err(|e| BridgeError::Serial(format!("failed to open {path}: {e}")))
        })
        .await??;

        Ok(Box::new(stream))
    }
}

/// Result of one framed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, terminator and surrounding whitespace removed
    Line(String),
    /// The read timeout passed without a complete line
    Idle,
}

/// Splits a byte stream into newline-terminated frames.
///
/// Partial input survives an idle read and is completed by the next call.
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Frame `inner`, giving each read at most `timeout`.
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
            timeout,
        }
    }

    /// Read the next frame.
    ///
    /// End of stream and I/O failures are errors: both mean the device is gone.
    pub async fn next_line(&mut self) -> AppResult<ReadOutcome> {
        let read = tokio::time::timeout(
            self.timeout,
            self.inner.read_until(b'\n', &mut self.pending),
        )
        .await;

        match read {
            Err(_elapsed) => {
                if self.pending.len() > MAX_FRAME_LEN {
                    warn!(
                        bytes = self.pending.len(),
                        "Dropping oversized frame without terminator"
                    );
                    self.pending.clear();
                }
                Ok(ReadOutcome::Idle)
            }
            Ok(Ok(0)) => Err(BridgeError::SerialUnexpectedEof),
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                Ok(ReadOutcome::Line(line))
            }
            Ok(Err(e)) => Err(BridgeError::Io(e)),
        }
    }
}
