//! Bounded in-memory window of the most recent records.
//!
//! Single writer (the ingestion loop), many readers (the façade). Readers only
//! ever get an owned copy, so nothing outside this type holds a reference into
//! the window.

use crate::record::SensorRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Default cap on the number of records kept in memory.
pub const MAX_HISTORY: usize = 2000;

/// Thread-safe FIFO window capped at a fixed number of records.
#[derive(Debug)]
pub struct HistoryBuffer {
    records: Mutex<VecDeque<SensorRecord>>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}

impl HistoryBuffer {
    /// Create an empty window holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `record`, evicting the oldest entries beyond capacity.
    pub fn push(&self, record: SensorRecord) {
        let mut records = self.records.lock();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Independent copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<SensorRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Option<SensorRecord> {
        self.records.lock().back().cloned()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no record has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Maximum number of records kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
