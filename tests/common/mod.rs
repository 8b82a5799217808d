//! Mock hardware shared by the integration tests.
//!
//! `MockPorts` stands in for the OS port list and `MockConnector` hands out
//! `tokio::io::duplex` streams, one per successful open, so a test plays the
//! controller board by writing to the other end.

#![allow(dead_code)]

use async_trait::async_trait;
use bridgebrain::error::{AppResult, BridgeError};
use bridgebrain::history::HistoryBuffer;
use bridgebrain::ingest::{IngestionConfig, IngestionLoop};
use bridgebrain::locator::{DeviceLocator, PortEnumerator, PortInfo};
use bridgebrain::serial::{DynSerial, LinkSettings, SerialConnector};
use bridgebrain::sink::CsvLogSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;

pub const TICK: Duration = Duration::from_millis(20);

/// Port list the test can change while the loop runs.
#[derive(Clone, Default)]
pub struct MockPorts {
    ports: Arc<Mutex<Vec<PortInfo>>>,
}

impl MockPorts {
    pub fn with_board() -> Self {
        let ports = Self::default();
        ports.plug(PortInfo::new("/dev/ttyACM0", "Arduino Uno"));
        ports
    }

    pub fn plug(&self, port: PortInfo) {
        self.ports.lock().push(port);
    }
}

impl PortEnumerator for MockPorts {
    fn available_ports(&self) -> AppResult<Vec<PortInfo>> {
        Ok(self.ports.lock().clone())
    }
}

/// Connector that serves queued duplex streams and fails once the queue is empty.
#[derive(Clone, Default)]
pub struct MockConnector {
    streams: Arc<Mutex<VecDeque<DuplexStream>>>,
    opens: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Queue a device-side stream and return the host side the test writes to.
    pub fn queue_device(&self) -> DuplexStream {
        let (host, device) = tokio::io::duplex(4096);
        self.streams.lock().push_back(device);
        host
    }

    pub fn open_attempts(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialConnector for MockConnector {
    async fn open(&self, port: &PortInfo, _settings: &LinkSettings) -> AppResult<DynSerial> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().pop_front() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(BridgeError::Serial(format!("{} is busy", port.name))),
        }
    }
}

pub fn fast_config() -> IngestionConfig {
    IngestionConfig {
        link: LinkSettings {
            baud_rate: 9600,
            read_timeout: TICK,
        },
        retry_delay: TICK,
    }
}

/// Build a loop over mock hardware that logs to `log_path`.
pub fn mock_loop(
    ports: MockPorts,
    connector: MockConnector,
    log_path: &Path,
    capacity: usize,
) -> IngestionLoop<MockPorts, MockConnector> {
    IngestionLoop::new(
        DeviceLocator::new(ports, vec!["Arduino".to_string(), "CH340".to_string()]),
        connector,
        Arc::new(HistoryBuffer::new(capacity)),
        Arc::new(CsvLogSink::new(log_path)),
        fast_config(),
    )
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
