//! Per-cycle reading results
//!
//! A [`Reading`] is the transient output of one polling cycle for one
//! sensor. Readings are created fresh each cycle and never mutated
//! afterwards; the buffer simply replaces them wholesale. Failed
//! sensors still produce a reading, with [`ReadingStatus::Error`] and
//! the failure message, so consumers see failures instead of gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::SensorDefinition;

/// Processing stage a reading reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadingStatus {
    /// Raw code captured, not yet scaled
    Raw,
    /// Scaled to voltage, not yet converted
    Validated,
    /// Final engineering value
    Processed,
    /// Acquisition or conversion failed; see `error`
    Error,
}

/// One sensor's result for one polling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Id of the sensor that produced this reading
    pub sensor_id: String,
    /// Display name, copied from the definition
    pub name: String,
    /// Engineering unit, copied from the definition
    pub unit: String,
    /// Engineering value; `0.0` for error readings
    pub value: f64,
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Processing stage reached
    pub status: ReadingStatus,
    /// Failure message for `Error` readings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw ADC code, physical sensors only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_code: Option<u32>,
    /// Measured voltage, physical sensors only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
}

impl Reading {
    /// Successful reading with a final engineering value
    pub fn processed(def: &SensorDefinition, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            sensor_id: def.id.clone(),
            name: def.name.clone(),
            unit: def.unit.clone(),
            value,
            timestamp,
            status: ReadingStatus::Processed,
            error: None,
            raw_code: None,
            voltage: None,
        }
    }

    /// Failed reading carrying the failure message
    pub fn error(
        def: &SensorDefinition,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_id: def.id.clone(),
            name: def.name.clone(),
            unit: def.unit.clone(),
            value: 0.0,
            timestamp,
            status: ReadingStatus::Error,
            error: Some(message.into()),
            raw_code: None,
            voltage: None,
        }
    }

    /// Attach the raw code and measured voltage of a hardware read
    pub fn with_signal(mut self, raw_code: u32, voltage: f64) -> Self {
        self.raw_code = Some(raw_code);
        self.voltage = Some(voltage);
        self
    }

    /// Whether this reading carries a usable value
    pub fn is_ok(&self) -> bool {
        self.status != ReadingStatus::Error
    }
}
