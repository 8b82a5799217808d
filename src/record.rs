//! The sensor record and its fixed column layout.
//!
//! A `SensorRecord` is identical wherever it appears: in the history window, in
//! the JSON snapshot handed to the façade, and as a row of the durable log. The
//! column names and order in [`COLUMNS`] are the wire contract for anyone
//! consuming an exported log file.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Serialize, Serializer};
use serde_json::Number;

/// Durable log columns, in order. Changing this breaks downstream consumers.
pub const COLUMNS: [&str; 8] = [
    "Time",
    "event",
    "vehicleWeight",
    "vibration",
    "tilt",
    "vehicleCount",
    "totalLoad",
    "ts_ms",
];

/// Format of the `Time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One decoded sensor event.
///
/// Every field has a deterministic default, so a record is always fully
/// populated even when the device sent only part of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorRecord {
    /// Wall-clock time at which the frame was received (not device time).
    #[serde(rename = "Time", serialize_with = "serialize_time")]
    pub captured_at: DateTime<Local>,
    /// Event label reported by the device, empty when absent.
    pub event: String,
    /// Weight of the vehicle on the span
    #[serde(rename = "vehicleWeight")]
    pub vehicle_weight: f64,
    /// Vibration reading
    pub vibration: f64,
    /// Tilt reading
    pub tilt: f64,
    /// Vehicles counted by the device
    #[serde(rename = "vehicleCount")]
    pub vehicle_count: f64,
    /// Cumulative load reported by the device
    #[serde(rename = "totalLoad")]
    pub total_load: f64,
    /// Device monotonic counter, passed through exactly as sent.
    #[serde(rename = "ts_ms", serialize_with = "serialize_ts")]
    pub device_timestamp_ms: Option<Number>,
}

fn serialize_time<S: Serializer>(t: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&t.format(TIME_FORMAT))
}

// Absent counters serialize as "" to match the log's empty cell.
fn serialize_ts<S: Serializer>(ts: &Option<Number>, s: S) -> Result<S::Ok, S::Error> {
    match ts {
        Some(n) => n.serialize(s),
        None => s.serialize_str(""),
    }
}

impl SensorRecord {
    /// A record with every measurement at its default, captured at `captured_at`.
    pub fn empty(captured_at: DateTime<Local>) -> Self {
        Self {
            captured_at,
            event: String::new(),
            vehicle_weight: 0.0,
            vibration: 0.0,
            tilt: 0.0,
            vehicle_count: 0.0,
            total_load: 0.0,
            device_timestamp_ms: None,
        }
    }

    /// Render the record as a log row in [`COLUMNS`] order.
    pub fn to_row(&self) -> [String; 8] {
        [
            self.captured_at.format(TIME_FORMAT).to_string(),
            self.event.clone(),
            self.vehicle_weight.to_string(),
            self.vibration.to_string(),
            self.tilt.to_string(),
            self.vehicle_count.to_string(),
            self.total_load.to_string(),
            self.device_timestamp_ms
                .as_ref()
                .map(Number::to_string)
                .unwrap_or_default(),
        ]
    }

    /// Parse a log row back into a record.
    ///
    /// Returns `None` if the row does not have exactly eight cells or a cell
    /// cannot be parsed. Empty numeric cells read as `0`.
    pub fn from_row<S: AsRef<str>>(row: &[S]) -> Option<Self> {
        if row.len() != COLUMNS.len() {
            return None;
        }
        let cell = |i: usize| row[i].as_ref().trim();
        let number = |i: usize| -> Option<f64> {
            match cell(i) {
                "" => Some(0.0),
                text => text.parse().ok(),
            }
        };

        let naive = NaiveDateTime::parse_from_str(cell(0), TIME_FORMAT).ok()?;
        let captured_at = Local.from_local_datetime(&naive).earliest()?;
        let device_timestamp_ms = match cell(7) {
            "" => None,
            text => Some(text.parse::<Number>().ok()?),
        };

        Some(Self {
            captured_at,
            event: row[1].as_ref().to_string(),
            vehicle_weight: number(2)?,
            vibration: number(3)?,
            tilt: number(4)?,
            vehicle_count: number(5)?,
            total_load: number(6)?,
            device_timestamp_ms,
        })
    }
}
