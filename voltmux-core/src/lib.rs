//! Sensor orchestration core for voltmux
//!
//! Turns raw ADC channel reads into engineering values and derives
//! "virtual" sensors from arithmetic expressions over other sensors.
//! This crate is the pure half of the system: wire-format math, the
//! sensor configuration model, dependency resolution and expression
//! evaluation. Everything that touches hardware or the filesystem
//! lives in `voltmux-service`.
//!
//! Data flow through the engine:
//!
//! ```text
//! SensorRegistry → resolve_order → [ordered ids] → per-sensor conversion
//!                                                        ↓
//!                codec math (raw → voltage)        Expr::evaluate
//!                                                        ↓
//!                                  ReadingBuffer (latest value per sensor)
//! ```
//!
//! ```
//! use voltmux_core::expr;
//!
//! let refs = expr::extract_references("{cooling_water} * 0.8");
//! assert!(refs.contains("cooling_water"));
//! ```

#![deny(unsafe_code)]

pub mod buffer;
pub mod expr;
pub mod graph;
pub mod protocol;
pub mod reading;
pub mod registry;
pub mod sensor;

// Public API
pub use buffer::ReadingBuffer;
pub use graph::{resolve_order, ResolveError};
pub use protocol::AdcProtocolDescriptor;
pub use reading::{Reading, ReadingStatus};
pub use registry::{RegistryError, SensorIssue, SensorRegistry};
pub use sensor::{SensorDefinition, SensorKind};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
