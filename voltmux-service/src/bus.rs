//! Serial Bus Abstraction for the ADC
//!
//! ## Overview
//!
//! The codec talks to hardware through one narrow seam: [`AdcBus`], a
//! full-duplex transfer of a fixed number of bytes. Everything above it
//! (frame layout, result extraction) is pure descriptor math in
//! `voltmux-core`; everything below it is transport detail.
//!
//! Two implementations ship here:
//!
//! - [`SerialBus`] drives a real port through `tokio-serial`, with the
//!   data-ready wait bounded by the configured timeout.
//! - [`ReplayBus`] is a scripted transport for tests and bench rigs: it
//!   records transmitted frames and answers from a canned script,
//!   wrapping around when the script is shorter than the run.
//!
//! The service takes a [`BusFactory`] rather than a bus instance, so
//! reconfiguration can claim a fresh handle and tests can inject a
//! replay transport without touching the scheduler.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

/// How to claim and drive the serial port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusParameters {
    /// Device path, e.g. `/dev/ttyACM0`
    pub path: String,
    /// Baud rate for the port
    pub baud_rate: u32,
    /// Bound on the data-ready wait for one transfer
    pub timeout_ms: u64,
}

impl Default for BusParameters {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".into(),
            baud_rate: 115_200,
            timeout_ms: 250,
        }
    }
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum BusError {
    /// The port could not be claimed at configuration time
    #[error("failed to claim bus {path}: {reason}")]
    Claim {
        path: String,
        reason: String,
    },

    /// The transfer itself failed
    #[error("bus transfer failed: {0}")]
    Io(#[from] std::io::Error),

    /// The device did not produce data within the bounded wait
    #[error("bus transfer timed out after {0} ms")]
    Timeout(u64),
}

/// Full-duplex byte transfer against the ADC
#[async_trait]
pub trait AdcBus: Send {
    /// Clock `tx` out and fill `rx` with the same number of bytes
    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError>;
}

/// Opens a bus from parameters; injected into the service so transports
/// are swappable
pub type BusFactory =
    Box<dyn Fn(&BusParameters) -> Result<Box<dyn AdcBus>, BusError> + Send + Sync>;

/// Factory claiming real serial ports
pub fn serial_bus_factory() -> BusFactory {
    Box::new(|params| Ok(Box::new(SerialBus::open(params)?) as Box<dyn AdcBus>))
}

/// Live serial transport over `tokio-serial`
pub struct SerialBus {
    port: tokio_serial::SerialStream,
    timeout: Duration,
}

impl SerialBus {
    /// Claim the port described by `params`
    pub fn open(params: &BusParameters) -> Result<Self, BusError> {
        let port = tokio_serial::new(&params.path, params.baud_rate)
            .open_native_async()
            .map_err(|e| BusError::Claim {
                path: params.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            port,
            timeout: Duration::from_millis(params.timeout_ms),
        })
    }
}

#[async_trait]
impl AdcBus for SerialBus {
    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        self.port.write_all(tx).await?;
        self.port.flush().await?;

        match tokio::time::timeout(self.timeout, self.port.read_exact(rx)).await {
            Ok(read) => {
                read?;
                Ok(())
            }
            Err(_) => Err(BusError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// One scripted answer of a [`ReplayBus`]
#[derive(Debug, Clone)]
enum ReplayStep {
    Respond(Vec<u8>),
    Timeout,
    Fault(String),
}

#[derive(Debug, Default)]
struct ReplayState {
    script: VecDeque<ReplayStep>,
    cursor: usize,
    sent: Vec<Vec<u8>>,
}

/// Scripted transport for tests and bench rigs
///
/// Clones share the same script and transmit log, so a test can keep a
/// handle while the service owns the bus. The script wraps around,
/// which keeps multi-cycle runs deterministic: a two-entry script
/// answers every odd transfer with entry 0 and every even transfer
/// with entry 1.
#[derive(Debug, Clone, Default)]
pub struct ReplayBus {
    inner: Arc<Mutex<ReplayState>>,
}

impl ReplayBus {
    /// Create a bus with an empty script; every transfer times out
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a canned response frame to the script
    pub fn push_response(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().script.push_back(ReplayStep::Respond(bytes.into()));
    }

    /// Append a timeout to the script
    pub fn push_timeout(&self) {
        self.lock().script.push_back(ReplayStep::Timeout);
    }

    /// Append a transfer fault to the script
    pub fn push_fault(&self, reason: impl Into<String>) {
        self.lock().script.push_back(ReplayStep::Fault(reason.into()));
    }

    /// All frames transmitted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// A factory handing out clones of this bus
    pub fn factory(&self) -> BusFactory {
        let bus = self.clone();
        Box::new(move |_| Ok(Box::new(bus.clone()) as Box<dyn AdcBus>))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AdcBus for ReplayBus {
    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        let step = {
            let mut state = self.lock();
            state.sent.push(tx.to_vec());
            if state.script.is_empty() {
                None
            } else {
                let idx = state.cursor % state.script.len();
                state.cursor += 1;
                state.script.get(idx).cloned()
            }
        };

        match step {
            Some(ReplayStep::Respond(bytes)) => {
                rx.fill(0);
                let n = bytes.len().min(rx.len());
                rx[..n].copy_from_slice(&bytes[..n]);
                Ok(())
            }
            Some(ReplayStep::Timeout) | None => Err(BusError::Timeout(0)),
            Some(ReplayStep::Fault(reason)) => Err(BusError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                reason,
            ))),
        }
    }
}
