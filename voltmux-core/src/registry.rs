//! Validated Sensor Registry
//!
//! ## Overview
//!
//! The registry is the single authority over which sensors exist. The
//! only way to change it is [`SensorRegistry::upsert_all`], which
//! validates an entire proposed set and applies it atomically: either
//! every definition is accepted and replaces the previous set, or the
//! call returns the full list of per-sensor problems and nothing
//! changes. The polling scheduler therefore never observes a partially
//! valid configuration, and a rejected update leaves the last good set
//! authoritative.
//!
//! Validation is structural only. Reference resolution (unknown ids,
//! cycles) is the dependency resolver's job at cycle time, because it
//! depends on the set as a whole rather than any single definition.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::expr;
use crate::protocol::MAX_CHANNEL;
use crate::sensor::{self, SensorDefinition, SensorKind};

/// One validation problem, attributed to one sensor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{sensor_id}: {message}")]
pub struct SensorIssue {
    /// Id of the offending definition (derived id if one was derived)
    pub sensor_id: String,
    /// Human-readable description of the problem
    pub message: String,
}

impl SensorIssue {
    fn new(sensor_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            message: message.into(),
        }
    }
}

/// Registry update failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The proposed set was rejected; no definitions were applied
    #[error("sensor set rejected with {} issue(s)", .0.len())]
    Rejected(Vec<SensorIssue>),
}

/// In-memory store of sensor definitions, insertion-ordered
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: Vec<SensorDefinition>,
}

impl SensorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and atomically replace the whole sensor set
    ///
    /// Ids left empty are derived from the display name before
    /// validation. On any violation the previous set stays in place and
    /// all problems are returned at once, so a caller can fix a
    /// configuration in one round trip.
    pub fn upsert_all(
        &mut self,
        definitions: Vec<SensorDefinition>,
    ) -> Result<(), RegistryError> {
        let mut proposed = definitions;
        for def in &mut proposed {
            if def.id.is_empty() {
                def.id = sensor::derive_id(&def.name);
            }
        }

        let mut issues = Vec::new();
        for def in &proposed {
            validate_definition(def, &mut issues);
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_channels: HashMap<u8, &str> = HashMap::new();
        for def in &proposed {
            if !seen_ids.insert(def.id.as_str()) {
                issues.push(SensorIssue::new(&def.id, "duplicate sensor id"));
            }
            if let SensorKind::Physical { channel, .. } = def.kind {
                if let Some(other) = seen_channels.insert(channel, def.id.as_str()) {
                    issues.push(SensorIssue::new(
                        &def.id,
                        format!("channel {channel} already used by sensor '{other}'"),
                    ));
                }
            }
        }

        if !issues.is_empty() {
            return Err(RegistryError::Rejected(issues));
        }

        self.sensors = proposed;
        Ok(())
    }

    /// Look up one definition by id
    pub fn get(&self, id: &str) -> Option<&SensorDefinition> {
        self.sensors.iter().find(|def| def.id == id)
    }

    /// Iterate definitions in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &SensorDefinition> {
        self.sensors.iter()
    }

    /// Owned copy of the current set, insertion order preserved
    pub fn snapshot(&self) -> Vec<SensorDefinition> {
        self.sensors.clone()
    }

    /// Number of configured sensors
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Whether no sensors are configured
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

fn validate_definition(def: &SensorDefinition, issues: &mut Vec<SensorIssue>) {
    let id = if def.id.is_empty() { &def.name } else { &def.id };

    if !sensor::is_valid_id(&def.id) {
        issues.push(SensorIssue::new(
            id,
            format!("invalid sensor id '{}': expected [A-Za-z0-9_]+", def.id),
        ));
    }
    if def.sampling_rate_ms == 0 {
        issues.push(SensorIssue::new(id, "sampling rate must be positive"));
    }

    match &def.kind {
        SensorKind::Physical {
            channel,
            min_voltage,
            max_voltage,
            conversion,
            ..
        } => {
            if *channel > MAX_CHANNEL {
                issues.push(SensorIssue::new(
                    id,
                    format!("channel {channel} outside supported range 0..={MAX_CHANNEL}"),
                ));
            }
            if !(min_voltage.is_finite() && max_voltage.is_finite() && min_voltage < max_voltage) {
                issues.push(SensorIssue::new(
                    id,
                    format!("voltage range [{min_voltage}, {max_voltage}] is not ascending"),
                ));
            }
            if let Some(src) = conversion {
                if let Err(e) = expr::compile(src) {
                    issues.push(SensorIssue::new(id, format!("conversion expression: {e}")));
                }
            }
        }
        SensorKind::Virtual { expression } => {
            if expression.trim().is_empty() {
                issues.push(SensorIssue::new(id, "conversion expression must not be empty"));
            } else if let Err(e) = expr::compile(expression) {
                issues.push(SensorIssue::new(id, format!("conversion expression: {e}")));
            }
        }
    }
}
