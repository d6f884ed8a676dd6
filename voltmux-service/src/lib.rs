//! Polling scheduler and hardware I/O for voltmux
//!
//! ## Overview
//!
//! This crate is the impure half of voltmux: it owns the serial bus,
//! the configuration store and the background polling task. The pure
//! engine logic (wire-format math, registry, dependency resolution,
//! expression evaluation) lives in `voltmux-core`.
//!
//! A deployment wires three things together and spawns the service:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use voltmux_service::{
//!     bus::serial_bus_factory, config::JsonConfigStore, scheduler::{PollService, PollSettings},
//! };
//!
//! # async fn start() {
//! let store = Arc::new(JsonConfigStore::new("/etc/voltmux/config.json"));
//! let service = PollService::new(store, serial_bus_factory(), PollSettings::default());
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let (handle, task) = service.spawn(shutdown_rx);
//!
//! // hand `handle` to the presentation layer...
//! let readings = handle.readings().await;
//! # let _ = (readings, shutdown_tx, task);
//! # }
//! ```
//!
//! The [`scheduler::EngineHandle`] returned by `spawn` is the full
//! external contract: reading snapshots, per-id lookup, and validated
//! configuration updates. A transport layer (HTTP or otherwise) is a
//! thin veneer over it and is deliberately not part of this crate.

pub mod bus;
pub mod codec;
pub mod config;
pub mod scheduler;

// Re-export common types
pub use bus::{AdcBus, BusError, BusFactory, BusParameters, ReplayBus, SerialBus};
pub use codec::{AdcCodec, CodecError};
pub use config::{AdcConfig, ConfigStore, JsonConfigStore, MemoryConfigStore, StoreError};
pub use scheduler::{
    EngineHandle, PollService, PollSettings, ReadError, SchedulerError, ServiceState, UpdateError,
};
