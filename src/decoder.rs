//! Frame decoding: one line of device text into a [`SensorRecord`].

use crate::error::DecodeError;
use crate::record::SensorRecord;
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{Map, Number, Value};

/// Wire shape of a device frame. Unknown keys are ignored; `null` reads as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Frame {
    ts_ms: Option<Number>,
    event: Option<String>,
    #[serde(rename = "vehicleWeight")]
    vehicle_weight: Option<f64>,
    vibration: Option<f64>,
    tilt: Option<f64>,
    #[serde(rename = "vehicleCount")]
    vehicle_count: Option<f64>,
    #[serde(rename = "totalLoad")]
    total_load: Option<f64>,
}

/// Decode a trimmed frame, stamping it with the current wall clock.
pub fn decode(line: &str) -> Result<SensorRecord, DecodeError> {
    decode_at(line, Local::now())
}

/// Decode a trimmed frame with an explicit capture time.
///
/// A known key carrying the wrong JSON type fails the whole frame instead of
/// being coerced to its default.
pub fn decode_at(line: &str, captured_at: DateTime<Local>) -> Result<SensorRecord, DecodeError> {
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    // Going through a map first keeps JSON arrays from filling the struct positionally.
    let object: Map<String, Value> = serde_json::from_str(line)?;
    let frame: Frame = serde_json::from_value(Value::Object(object))?;

    Ok(SensorRecord {
        captured_at,
        event: frame.event.unwrap_or_default(),
        vehicle_weight: frame.vehicle_weight.unwrap_or_default(),
        vibration: frame.vibration.unwrap_or_default(),
        tilt: frame.tilt.unwrap_or_default(),
        vehicle_count: frame.vehicle_count.unwrap_or_default(),
        total_load: frame.total_load.unwrap_or_default(),
        device_timestamp_ms: frame.ts_ms,
    })
}
