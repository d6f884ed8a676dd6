//! Live ADC codec driver
//!
//! [`AdcCodec`] binds a wire-format descriptor to an open bus handle.
//! It owns the handle exclusively: reconfiguration closes the previous
//! port before claiming a new one, and dropping the codec releases it.
//! The frame math itself lives in `voltmux_core::protocol`; this type
//! only moves bytes and maps transport failures into the codec's error
//! taxonomy.

use log::{debug, info};
use thiserror::Error;

use voltmux_core::protocol::{AdcProtocolDescriptor, DescriptorError, ProtocolError};

use crate::bus::{AdcBus, BusError, BusFactory, BusParameters};

/// Channel-read and configuration failures
#[derive(Debug, Error)]
pub enum CodecError {
    /// `read_channel` was called before `configure`
    #[error("ADC codec is not configured")]
    NotConfigured,

    /// The bus could not be claimed or the transfer failed
    #[error("hardware fault: {0}")]
    Hardware(String),

    /// The device did not answer within the bounded wait
    #[error("{0}")]
    Timeout(String),

    /// The descriptor cannot encode the request
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The proposed descriptor is structurally invalid
    #[error("invalid protocol descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
}

impl From<BusError> for CodecError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(_) => CodecError::Timeout(err.to_string()),
            other => CodecError::Hardware(other.to_string()),
        }
    }
}

/// Descriptor-driven ADC driver owning the bus handle
pub struct AdcCodec {
    factory: BusFactory,
    descriptor: AdcProtocolDescriptor,
    params: BusParameters,
    bus: Option<Box<dyn AdcBus>>,
}

impl AdcCodec {
    /// Create an unconfigured codec; `read_channel` fails until
    /// [`configure`](Self::configure) succeeds
    pub fn new(factory: BusFactory) -> Self {
        Self {
            factory,
            descriptor: AdcProtocolDescriptor::default(),
            params: BusParameters::default(),
            bus: None,
        }
    }

    /// Validate the descriptor and (re)claim the bus
    ///
    /// Idempotent: any previously held handle is released before the
    /// new one is opened, so repeated configuration never leaks ports.
    pub fn configure(
        &mut self,
        descriptor: AdcProtocolDescriptor,
        params: BusParameters,
    ) -> Result<(), CodecError> {
        descriptor.validate()?;

        // Release the old handle first so reopening the same device works
        self.bus = None;

        let bus = (self.factory)(&params)?;
        info!("ADC codec configured on {} ({} bit)", params.path, descriptor.resolution);

        self.bus = Some(bus);
        self.descriptor = descriptor;
        self.params = params;
        Ok(())
    }

    /// Whether a bus handle is currently held
    pub fn is_configured(&self) -> bool {
        self.bus.is_some()
    }

    /// The active wire-format descriptor
    pub fn descriptor(&self) -> &AdcProtocolDescriptor {
        &self.descriptor
    }

    /// The parameters of the claimed bus
    pub fn bus_parameters(&self) -> &BusParameters {
        &self.params
    }

    /// Read one channel's raw conversion code
    pub async fn read_channel(&mut self, channel: u8) -> Result<u32, CodecError> {
        let bus = self.bus.as_mut().ok_or(CodecError::NotConfigured)?;

        let tx = self.descriptor.command_frame(channel)?;
        let mut rx = vec![0u8; self.descriptor.read_byte_count];
        bus.transfer(&tx, &mut rx).await?;

        let raw = self.descriptor.unpack(&rx)?;
        debug!("channel {channel}: raw code {raw}");
        Ok(raw)
    }

    /// Read one channel and scale the code against the reference voltage
    pub async fn read_voltage(&mut self, channel: u8) -> Result<(u32, f64), CodecError> {
        let raw = self.read_channel(channel).await?;
        Ok((raw, self.descriptor.raw_to_voltage(raw)))
    }
}
