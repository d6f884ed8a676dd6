//! Background Polling Scheduler
//!
//! ## Overview
//!
//! [`PollService`] is the long-lived task that turns configuration into
//! readings. Once per interval it snapshots the sensor registry,
//! rebuilds the dependency order, walks every sensor (hardware channels
//! through the codec, virtual sensors through the evaluator) and
//! publishes a fresh snapshot to the shared reading buffer.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized → Initializing → Running ⟳ → Stopping → Stopped
//!                     ↑   |
//!                     └───┘ retry on store/bus failure
//! ```
//!
//! Initialization loads the persisted ADC setup and sensor set. A store
//! or bus-claim failure is retried indefinitely with a configured
//! delay; an *absent* configuration is not a failure. The service
//! comes up empty and waits for one. The current state is published on
//! a watch channel so callers can tell "not ready" from "ready but
//! empty".
//!
//! ## Fault isolation
//!
//! Failures are contained at the smallest unit that preserves the
//! invariants of the larger ones:
//!
//! - one sensor: hardware and evaluation failures become an `Error`
//!   reading; the cycle continues with the next sensor.
//! - one cycle: an unorderable configuration (cycle, unknown reference)
//!   skips the cycle and is retried at the next interval.
//! - the service: only internal invariant violations terminate the
//!   task, and they are distinguishable from clean shutdown.
//!
//! ## Locking
//!
//! One async mutex guards the engine (registry + codec); configuration
//! updates through [`EngineHandle`] take the same mutex, so a cycle
//! never observes a half-applied update. The published buffer lives in
//! its own `RwLock`, written once per cycle by swapping in the complete
//! cycle buffer. Readers never see a partially built cycle; at worst
//! they see the previous one for a few hundred milliseconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use voltmux_core::buffer::ReadingBuffer;
use voltmux_core::expr::{self, Bindings};
use voltmux_core::graph;
use voltmux_core::reading::Reading;
use voltmux_core::registry::{RegistryError, SensorRegistry};
use voltmux_core::sensor::{self, SensorDefinition, SensorKind};

use crate::bus::BusFactory;
use crate::codec::{AdcCodec, CodecError};
use crate::config::{AdcConfig, ConfigStore, StoreError};

/// Lifecycle state, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, not yet spawned
    Uninitialized,
    /// Loading configuration and claiming the bus
    Initializing,
    /// Polling at the configured interval
    Running,
    /// Shutdown observed, finishing up
    Stopping,
    /// Task has exited
    Stopped,
}

/// Scheduler timing knobs
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay between polling cycles
    pub poll_interval: Duration,
    /// Delay between initialization attempts
    pub init_retry_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            init_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Fatal scheduler failures, distinct from clean shutdown
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler invariant violated: {0}")]
    Internal(String),
}

/// Read-API failures
#[derive(Debug, Error)]
pub enum ReadError {
    /// The id does not even have the right shape; checked without
    /// consulting the registry
    #[error("malformed sensor id '{0}'")]
    InvalidId(String),

    /// No reading for this id in the current snapshot
    #[error("no reading for sensor '{0}'")]
    NotFound(String),
}

/// Configuration-update failures
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The proposed sensor set was rejected; nothing was applied
    #[error(transparent)]
    Rejected(#[from] RegistryError),

    /// The new ADC setup could not be brought up
    #[error("ADC reconfiguration failed: {0}")]
    Codec(#[from] CodecError),

    /// The accepted configuration could not be persisted
    #[error("failed to persist configuration: {0}")]
    Store(#[from] StoreError),
}

struct EngineState {
    registry: SensorRegistry,
    codec: AdcCodec,
}

struct Shared {
    engine: Mutex<EngineState>,
    buffer: RwLock<ReadingBuffer>,
    store: Arc<dyn ConfigStore>,
    settings: PollSettings,
    state_tx: watch::Sender<ServiceState>,
}

/// The background acquisition service
///
/// Constructed once by the process's lifecycle manager and spawned with
/// the process-wide shutdown signal. All shared access goes through
/// [`EngineHandle`] clones.
pub struct PollService {
    shared: Arc<Shared>,
}

impl PollService {
    /// Build a service around a configuration store and bus factory
    pub fn new(store: Arc<dyn ConfigStore>, bus_factory: BusFactory, settings: PollSettings) -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Uninitialized);
        Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(EngineState {
                    registry: SensorRegistry::new(),
                    codec: AdcCodec::new(bus_factory),
                }),
                buffer: RwLock::new(ReadingBuffer::new()),
                store,
                settings,
                state_tx,
            }),
        }
    }

    /// A handle for readers and configuration updates
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: self.shared.clone(),
        }
    }

    /// Start the background task
    ///
    /// The task runs until `shutdown` flips to `true` (or its sender is
    /// dropped). Clean shutdown resolves to `Ok(())`; a fatal internal
    /// failure resolves to `Err`.
    pub fn spawn(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> (EngineHandle, JoinHandle<Result<(), SchedulerError>>) {
        let handle = self.handle();
        let task = tokio::spawn(run(self.shared, shutdown));
        (handle, task)
    }
}

/// Shared access to readings, configuration and lifecycle state
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Snapshot of the latest cycle, `Error` readings included
    pub async fn readings(&self) -> Vec<Reading> {
        self.shared.buffer.read().await.snapshot()
    }

    /// Latest reading for one sensor
    pub async fn reading(&self, id: &str) -> Result<Reading, ReadError> {
        if !sensor::is_valid_id(id) {
            return Err(ReadError::InvalidId(id.to_string()));
        }
        self.shared
            .buffer
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ReadError::NotFound(id.to_string()))
    }

    /// Current sensor definitions, insertion-ordered
    pub async fn sensors(&self) -> Vec<SensorDefinition> {
        self.shared.engine.lock().await.registry.snapshot()
    }

    /// Active ADC setup (descriptor + bus parameters)
    pub async fn adc_config(&self) -> AdcConfig {
        let engine = self.shared.engine.lock().await;
        AdcConfig {
            descriptor: engine.codec.descriptor().clone(),
            bus: engine.codec.bus_parameters().clone(),
        }
    }

    /// Validate, apply and persist a new sensor set
    ///
    /// All-or-nothing: a rejected set changes nothing and returns the
    /// itemized per-sensor issues. Applied sets take effect at the next
    /// polling cycle.
    pub async fn update_sensors(&self, sensors: Vec<SensorDefinition>) -> Result<(), UpdateError> {
        let mut engine = self.shared.engine.lock().await;
        engine.registry.upsert_all(sensors)?;

        let accepted = engine.registry.snapshot();
        self.shared.store.save_sensors(&accepted).await?;
        info!("sensor set replaced: {} definition(s)", accepted.len());
        Ok(())
    }

    /// Validate, apply and persist a new ADC setup
    ///
    /// Reconfigures the codec under the engine lock, which reopens the
    /// bus; the previous handle is released first.
    pub async fn update_adc(&self, config: AdcConfig) -> Result<(), UpdateError> {
        let mut engine = self.shared.engine.lock().await;
        engine
            .codec
            .configure(config.descriptor.clone(), config.bus.clone())?;

        self.shared.store.save_adc(&config).await?;
        Ok(())
    }

    /// Watch the service lifecycle state
    pub fn state(&self) -> watch::Receiver<ServiceState> {
        self.shared.state_tx.subscribe()
    }

    /// The state at this instant
    pub fn current_state(&self) -> ServiceState {
        *self.shared.state_tx.subscribe().borrow()
    }
}

#[derive(Debug, Error)]
enum InitError {
    #[error("configuration store: {0}")]
    Store(#[from] StoreError),

    #[error("ADC bring-up: {0}")]
    Codec(#[from] CodecError),
}

async fn run(
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SchedulerError> {
    shared.state_tx.send_replace(ServiceState::Initializing);
    info!("poll service initializing");

    loop {
        if *shutdown.borrow() {
            return finish(&shared);
        }
        match initialize(&shared).await {
            Ok(()) => break,
            Err(e) => {
                warn!(
                    "initialization failed, retrying in {:?}: {e}",
                    shared.settings.init_retry_delay
                );
                if wait_or_shutdown(shared.settings.init_retry_delay, &mut shutdown).await {
                    return finish(&shared);
                }
            }
        }
    }

    shared.state_tx.send_replace(ServiceState::Running);
    info!(
        "poll service running, interval {:?}",
        shared.settings.poll_interval
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = run_cycle(&shared).await {
            error!("fatal scheduler failure: {e}");
            shared.state_tx.send_replace(ServiceState::Stopped);
            return Err(e);
        }
        if wait_or_shutdown(shared.settings.poll_interval, &mut shutdown).await {
            break;
        }
    }

    finish(&shared)
}

fn finish(shared: &Shared) -> Result<(), SchedulerError> {
    shared.state_tx.send_replace(ServiceState::Stopping);
    shared.state_tx.send_replace(ServiceState::Stopped);
    info!("poll service stopped");
    Ok(())
}

/// Sleep `delay`, waking early on the shutdown signal. Returns `true`
/// when shutdown was requested.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => match changed {
            Ok(()) => *shutdown.borrow(),
            // Sender dropped: nobody can ask us to stop anymore, so stop
            Err(_) => true,
        },
    }
}

async fn initialize(shared: &Shared) -> Result<(), InitError> {
    let adc = shared.store.load_adc().await?;
    let sensors = shared.store.load_sensors().await?;

    let mut engine = shared.engine.lock().await;

    match adc {
        Some(config) => engine.codec.configure(config.descriptor, config.bus)?,
        None => info!("no ADC configuration stored; codec stays down until one arrives"),
    }

    match sensors {
        Some(defs) => {
            let count = defs.len();
            // A rejected persisted set will not improve by retrying:
            // log it and come up empty instead of wedging initialization.
            if let Err(RegistryError::Rejected(issues)) = engine.registry.upsert_all(defs) {
                error!("stored sensor set rejected, starting empty:");
                for issue in &issues {
                    error!("  {issue}");
                }
            } else {
                info!("loaded {count} sensor definition(s)");
            }
        }
        None => info!("no sensor definitions stored"),
    }

    Ok(())
}

async fn run_cycle(shared: &Shared) -> Result<(), SchedulerError> {
    let mut engine = shared.engine.lock().await;
    let engine = &mut *engine;

    let defs = engine.registry.snapshot();
    let order = match graph::resolve_order(&defs) {
        Ok(order) => order,
        Err(e) => {
            // Configuration error: skip this cycle, keep the service up
            error!("cycle skipped, dependency resolution failed: {e}");
            return Ok(());
        }
    };

    let by_id: HashMap<&str, &SensorDefinition> =
        defs.iter().map(|def| (def.id.as_str(), def)).collect();

    let mut cycle = ReadingBuffer::new();
    for id in &order {
        let def = *by_id.get(id.as_str()).ok_or_else(|| {
            SchedulerError::Internal(format!("resolved order contains unknown sensor '{id}'"))
        })?;

        let reading = read_sensor(&mut engine.codec, def, &cycle).await;
        if let Some(message) = &reading.error {
            warn!("sensor '{}': {message}", def.id);
        }
        cycle.upsert(reading);
    }

    debug!("cycle complete: {} reading(s)", cycle.len());

    // Swap in the finished cycle; readers never see a partial buffer
    *shared.buffer.write().await = cycle;
    Ok(())
}

async fn read_sensor(codec: &mut AdcCodec, def: &SensorDefinition, cycle: &ReadingBuffer) -> Reading {
    let now = Utc::now();

    match &def.kind {
        SensorKind::Physical {
            channel,
            conversion,
            ..
        } => {
            let (raw, voltage) = match codec.read_voltage(*channel).await {
                Ok(pair) => pair,
                Err(e) => return Reading::error(def, e.to_string(), now),
            };

            let value = match conversion {
                // Linear calibration onto the engineering range
                None => def
                    .calibrate(voltage)
                    .ok_or_else(|| "sensor has no calibration data".to_string()),
                // Custom curve with the measured voltage bound as `x`
                Some(src) => evaluate_against_cycle(src, Some(voltage), cycle),
            };

            match value {
                Ok(v) => Reading::processed(def, v, now).with_signal(raw, voltage),
                Err(message) => Reading::error(def, message, now),
            }
        }
        SensorKind::Virtual { expression } => {
            match evaluate_against_cycle(expression, None, cycle) {
                Ok(v) => Reading::processed(def, v, now),
                Err(message) => Reading::error(def, message, now),
            }
        }
    }
}

/// Bind every `{id}` reference from this cycle's buffer and evaluate
///
/// A reference whose reading is missing or failed makes the dependent
/// sensor fail too; a broken chain must not masquerade as a value.
fn evaluate_against_cycle(
    src: &str,
    voltage: Option<f64>,
    cycle: &ReadingBuffer,
) -> Result<f64, String> {
    let mut bindings = Bindings::new();
    if let Some(v) = voltage {
        bindings.insert("x".into(), v);
    }

    for reference in expr::extract_references(src) {
        match cycle.get(&reference) {
            Some(reading) if reading.is_ok() => {
                bindings.insert(reference, reading.value);
            }
            Some(_) => return Err(format!("dependency '{reference}' failed in this cycle")),
            None => return Err(format!("dependency '{reference}' has no reading in this cycle")),
        }
    }

    expr::evaluate_str(src, &bindings).map_err(|e| e.to_string())
}
