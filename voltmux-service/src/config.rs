//! Configuration persistence
//!
//! The scheduler initializes from a [`ConfigStore`] and configuration
//! updates are written back through it. The contract is deliberately
//! flat: one versionless document holding the ADC setup and the sensor
//! definition list. "Nothing stored yet" is an ordinary `Ok(None)`,
//! never an error; only I/O and malformed content fail.
//!
//! [`JsonConfigStore`] keeps the document in a single JSON file and
//! replaces it atomically (write to a sibling temp file, then rename),
//! so a crash mid-save leaves the previous document intact.
//! [`MemoryConfigStore`] backs tests and ephemeral deployments.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use voltmux_core::protocol::AdcProtocolDescriptor;
use voltmux_core::sensor::SensorDefinition;

use crate::bus::BusParameters;

/// ADC setup: wire format plus the bus that carries it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdcConfig {
    /// Wire-format descriptor
    pub descriptor: AdcProtocolDescriptor,
    /// Serial bus parameters
    pub bus: BusParameters,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            descriptor: AdcProtocolDescriptor::default(),
            bus: BusParameters::default(),
        }
    }
}

/// Store-level failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration store holds malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The flat on-disk document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigDocument {
    adc: Option<AdcConfig>,
    sensors: Option<Vec<SensorDefinition>>,
}

/// Atomic load/save of the two configuration records
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load the ADC setup; `Ok(None)` when none is stored
    async fn load_adc(&self) -> Result<Option<AdcConfig>, StoreError>;

    /// Load the sensor set; `Ok(None)` when none is stored
    async fn load_sensors(&self) -> Result<Option<Vec<SensorDefinition>>, StoreError>;

    /// Persist the ADC setup
    async fn save_adc(&self, config: &AdcConfig) -> Result<(), StoreError>;

    /// Persist the sensor set
    async fn save_sensors(&self, sensors: &[SensorDefinition]) -> Result<(), StoreError>;
}

/// Single-file JSON store
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    /// Store backed by `path`; the file is created on first save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ConfigDocument, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, document: &ConfigDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;

        // Write-then-rename keeps the previous document intact on crash
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load_adc(&self) -> Result<Option<AdcConfig>, StoreError> {
        Ok(self.load().await?.adc)
    }

    async fn load_sensors(&self) -> Result<Option<Vec<SensorDefinition>>, StoreError> {
        Ok(self.load().await?.sensors)
    }

    async fn save_adc(&self, config: &AdcConfig) -> Result<(), StoreError> {
        let mut document = self.load().await?;
        document.adc = Some(config.clone());
        self.save(&document).await
    }

    async fn save_sensors(&self, sensors: &[SensorDefinition]) -> Result<(), StoreError> {
        let mut document = self.load().await?;
        document.sensors = Some(sensors.to_vec());
        self.save(&document).await
    }
}

/// In-memory store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: Mutex<ConfigDocument>,
}

impl MemoryConfigStore {
    /// Empty store: both records load as `None`
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the ADC record
    pub fn with_adc(self, config: AdcConfig) -> Self {
        self.lock().adc = Some(config);
        self
    }

    /// Pre-seed the sensor record
    pub fn with_sensors(self, sensors: Vec<SensorDefinition>) -> Self {
        self.lock().sensors = Some(sensors);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConfigDocument> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_adc(&self) -> Result<Option<AdcConfig>, StoreError> {
        Ok(self.lock().adc.clone())
    }

    async fn load_sensors(&self) -> Result<Option<Vec<SensorDefinition>>, StoreError> {
        Ok(self.lock().sensors.clone())
    }

    async fn save_adc(&self, config: &AdcConfig) -> Result<(), StoreError> {
        self.lock().adc = Some(config.clone());
        Ok(())
    }

    async fn save_sensors(&self, sensors: &[SensorDefinition]) -> Result<(), StoreError> {
        self.lock().sensors = Some(sensors.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltmux_core::sensor::SensorKind;

    fn sensor(id: &str) -> SensorDefinition {
        SensorDefinition {
            id: id.into(),
            name: id.into(),
            unit: "°C".into(),
            sampling_rate_ms: 500,
            kind: SensorKind::Virtual {
                expression: "1 + 1".into(),
            },
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("config.json"));

        assert!(store.load_adc().await.unwrap().is_none());
        assert!(store.load_sensors().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_store_round_trips_both_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("config.json"));

        let adc = AdcConfig::default();
        store.save_adc(&adc).await.unwrap();
        store.save_sensors(&[sensor("a"), sensor("b")]).await.unwrap();

        // Saving one record must not clobber the other
        assert_eq!(store.load_adc().await.unwrap(), Some(adc));
        let sensors = store.load_sensors().await.unwrap().unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].id, "a");
    }

    #[tokio::test]
    async fn malformed_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let store = JsonConfigStore::new(&path);
        assert!(matches!(
            store.load_sensors().await,
            Err(StoreError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryConfigStore::new().with_sensors(vec![sensor("x")]);
        assert_eq!(store.load_sensors().await.unwrap().unwrap()[0].id, "x");
        assert!(store.load_adc().await.unwrap().is_none());

        store.save_adc(&AdcConfig::default()).await.unwrap();
        assert!(store.load_adc().await.unwrap().is_some());
    }
}
