//! Sensor configuration model
//!
//! A [`SensorDefinition`] is the unit of configuration: identity, display
//! metadata, and a kind-specific payload. Physical sensors carry ADC
//! calibration, virtual sensors carry a conversion expression. Putting the
//! payload in the [`SensorKind`] variant means a physical sensor cannot
//! exist without calibration data, nor a virtual one without an
//! expression; changing a sensor's kind means recreating the entry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::expr;

/// Identity and behavior of one configured sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDefinition {
    /// Unique id, `[A-Za-z0-9_]+`. Derived from `name` when left empty.
    #[serde(default)]
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Engineering unit for display ("°C", "bar", ...)
    #[serde(default)]
    pub unit: String,
    /// Desired sampling rate; informational, the scheduler runs one
    /// global interval
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate_ms: u32,
    /// Kind-specific payload
    #[serde(flatten)]
    pub kind: SensorKind,
}

fn default_sampling_rate() -> u32 {
    1000
}

/// Kind-specific sensor payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SensorKind {
    /// Value derives from an actual ADC channel reading
    #[serde(rename_all = "camelCase")]
    Physical {
        /// ADC channel, 0..=31
        channel: u8,
        /// Voltage at the low end of the calibrated range
        min_voltage: f64,
        /// Voltage at the high end of the calibrated range
        max_voltage: f64,
        /// Engineering value at `min_voltage`
        min_value: f64,
        /// Engineering value at `max_voltage`
        max_value: f64,
        /// Optional expression overriding the linear mapping, with the
        /// measured voltage bound as `x`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversion: Option<String>,
    },
    /// Value computed purely from other sensors' current values
    #[serde(rename_all = "camelCase")]
    Virtual {
        /// Arithmetic expression referencing other sensors as `{id}`
        expression: String,
    },
}

impl SensorDefinition {
    /// Whether this sensor reads a hardware channel
    pub fn is_physical(&self) -> bool {
        matches!(self.kind, SensorKind::Physical { .. })
    }

    /// Ids of the sensors this definition's expression references
    ///
    /// Empty for physical sensors without a conversion expression.
    pub fn references(&self) -> BTreeSet<String> {
        match &self.kind {
            SensorKind::Physical { conversion: Some(src), .. } => expr::extract_references(src),
            SensorKind::Physical { conversion: None, .. } => BTreeSet::new(),
            SensorKind::Virtual { expression } => expr::extract_references(expression),
        }
    }

    /// The conversion expression, if any kind of one is configured
    pub fn expression(&self) -> Option<&str> {
        match &self.kind {
            SensorKind::Physical { conversion, .. } => conversion.as_deref(),
            SensorKind::Virtual { expression } => Some(expression.as_str()),
        }
    }

    /// Map a measured voltage onto the calibrated engineering range
    ///
    /// Returns `None` for virtual sensors, which have no calibration.
    pub fn calibrate(&self, voltage: f64) -> Option<f64> {
        match self.kind {
            SensorKind::Physical {
                min_voltage,
                max_voltage,
                min_value,
                max_value,
                ..
            } => Some(
                (voltage - min_voltage) / (max_voltage - min_voltage) * (max_value - min_value)
                    + min_value,
            ),
            SensorKind::Virtual { .. } => None,
        }
    }
}

/// Check an id against the `[A-Za-z0-9_]+` shape
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derive an id from a display name
///
/// Lowercases and collapses every run of non-id characters to a single
/// underscore: `"Cooling Water (inlet)"` → `"cooling_water_inlet"`.
pub fn derive_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut gap = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            id.push(c.to_ascii_lowercase());
            gap = false;
        } else if !gap && !id.is_empty() {
            id.push('_');
            gap = true;
        }
    }
    while id.ends_with('_') {
        id.pop();
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn physical(id: &str, channel: u8) -> SensorDefinition {
        SensorDefinition {
            id: id.into(),
            name: id.into(),
            unit: "V".into(),
            sampling_rate_ms: 1000,
            kind: SensorKind::Physical {
                channel,
                min_voltage: 0.0,
                max_voltage: 3.3,
                min_value: -40.0,
                max_value: 125.0,
                conversion: None,
            },
        }
    }

    #[test]
    fn linear_calibration() {
        // 0..3.3 V onto -40..125: mid-scale lands at 42.5
        let def = physical("temp", 0);
        let value = def.calibrate(1.65).unwrap();
        assert!((value - 42.5).abs() < 1e-9);

        assert_eq!(def.calibrate(0.0), Some(-40.0));
        assert_eq!(def.calibrate(3.3), Some(125.0));
    }

    #[test]
    fn virtual_sensor_has_no_calibration() {
        let def = SensorDefinition {
            id: "avg".into(),
            name: "Average".into(),
            unit: String::new(),
            sampling_rate_ms: 1000,
            kind: SensorKind::Virtual {
                expression: "({a} + {b}) / 2".into(),
            },
        };
        assert_eq!(def.calibrate(1.0), None);
        let refs = def.references();
        assert!(refs.contains("a") && refs.contains("b"));
    }

    #[test]
    fn id_validation() {
        assert!(is_valid_id("physical_temp_1"));
        assert!(is_valid_id("T42"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("bad id"));
        assert!(!is_valid_id("pressure-2"));
    }

    #[test]
    fn id_derivation() {
        assert_eq!(derive_id("Cooling Water (inlet)"), "cooling_water_inlet");
        assert_eq!(derive_id("Temp#1"), "temp_1");
        assert_eq!(derive_id("already_fine"), "already_fine");
    }

    #[test]
    fn tagged_json_representation() {
        let def = physical("temp", 3);
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["kind"], "physical");
        assert_eq!(json["channel"], 3);

        let back: SensorDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn missing_id_defaults_to_empty() {
        let def: SensorDefinition = serde_json::from_str(
            r#"{"name": "Inlet Pressure", "kind": "virtual", "expression": "{p1} * 2"}"#,
        )
        .unwrap();
        assert!(def.id.is_empty());
        assert_eq!(def.sampling_rate_ms, 1000);
    }
}
