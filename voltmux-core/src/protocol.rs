//! ADC Wire-Protocol Descriptor and Frame Codec
//!
//! ## Overview
//!
//! Different serial ADCs speak structurally similar protocols: push a
//! command byte that selects a channel, clock a fixed number of bytes
//! through the bus, and pick the conversion result out of the response
//! with a shift and a mask. Rather than one driver per chip, voltmux
//! describes the wire format as data ([`AdcProtocolDescriptor`]) and
//! derives the codec from it.
//!
//! ## Frame Layout
//!
//! For a descriptor with `command_prefix = [0x01]`, `channel_mask = 0x07`,
//! `channel_bit_shift = 4` and `read_byte_count = 3`, reading channel 2
//! produces:
//!
//! ```text
//! TX:  ┌──────────────┬──────┬──────┐
//!      │ 0x01 | 2<<4  │ 0x00 │ 0x00 │   prefix[0] carries the channel,
//!      └──────────────┴──────┴──────┘   remainder zero-padded
//! RX:  ┌──────┬──────┬──────┐
//!      │  b0  │  b1  │  b2  │           big-endian packed, then
//!      └──────┴──────┴──────┘           (packed >> shift) & mask
//! ```
//!
//! The descriptor also owns the raw→voltage scaling:
//! `voltage = raw * reference_voltage / (2^resolution - 1)`.
//!
//! This module is pure math; the live driver that pushes frames over an
//! actual bus lives in `voltmux-service`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest channel number any descriptor may address
pub const MAX_CHANNEL: u8 = 31;

/// Frame-level codec failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Requested channel cannot be encoded by the descriptor's mask
    #[error("channel {channel} exceeds the protocol's channel mask (max {max})")]
    ChannelOutOfRange {
        channel: u8,
        max: u8,
    },

    /// Response byte count does not match the descriptor
    #[error("expected {expected} response bytes, got {got}")]
    ResponseLength {
        expected: usize,
        got: usize,
    },
}

/// Structural problems with a descriptor, caught before it goes live
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    #[error("command prefix must not be empty")]
    EmptyPrefix,

    #[error("command prefix ({prefix} bytes) does not fit in {frame} frame bytes")]
    PrefixTooLong { prefix: usize, frame: usize },

    #[error("resolution {0} outside supported range 1..=24 bits")]
    Resolution(u8),

    #[error("read byte count {0} outside supported range 1..=8")]
    ReadByteCount(usize),

    #[error("reference voltage {0} must be positive and finite")]
    ReferenceVoltage(f64),

    #[error("channel bit shift {0} pushes the channel outside the command byte")]
    ChannelShift(u8),
}

/// Immutable description of one ADC's wire format
///
/// Supplied once at configuration time; replacing it re-derives the live
/// codec state in the service layer. `Default` is a generic 10-bit,
/// 3.3 V reference part with the channel packed into the high nibble of
/// a single command byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdcProtocolDescriptor {
    /// Leading command bytes; byte 0 is OR-ed with the encoded channel
    pub command_prefix: Vec<u8>,
    /// Mask applied to the channel number before shifting
    pub channel_mask: u8,
    /// Left shift placing the channel inside command byte 0
    pub channel_bit_shift: u8,
    /// Mask isolating the conversion result after shifting
    pub result_bit_mask: u32,
    /// Right shift applied to the big-endian packed response
    pub result_bit_shift: u8,
    /// Bytes clocked through the bus per conversion
    pub read_byte_count: usize,
    /// ADC resolution in bits, used for voltage scaling
    pub resolution: u8,
    /// Full-scale reference voltage
    pub reference_voltage: f64,
}

impl Default for AdcProtocolDescriptor {
    fn default() -> Self {
        Self {
            command_prefix: vec![0x01],
            channel_mask: 0x07,
            channel_bit_shift: 4,
            result_bit_mask: 0x03FF,
            result_bit_shift: 0,
            read_byte_count: 3,
            resolution: 10,
            reference_voltage: 3.3,
        }
    }
}

impl AdcProtocolDescriptor {
    /// Check structural invariants before the descriptor goes live
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.command_prefix.is_empty() {
            return Err(DescriptorError::EmptyPrefix);
        }
        if !(1..=8).contains(&self.read_byte_count) {
            return Err(DescriptorError::ReadByteCount(self.read_byte_count));
        }
        if self.command_prefix.len() > self.read_byte_count {
            return Err(DescriptorError::PrefixTooLong {
                prefix: self.command_prefix.len(),
                frame: self.read_byte_count,
            });
        }
        if !(1..=24).contains(&self.resolution) {
            return Err(DescriptorError::Resolution(self.resolution));
        }
        if !self.reference_voltage.is_finite() || self.reference_voltage <= 0.0 {
            return Err(DescriptorError::ReferenceVoltage(self.reference_voltage));
        }
        // The shifted mask must stay within the single command byte.
        if self.channel_bit_shift >= 8
            || (self.channel_mask as u32) << self.channel_bit_shift > 0xFF
        {
            return Err(DescriptorError::ChannelShift(self.channel_bit_shift));
        }
        Ok(())
    }

    /// Largest raw code this ADC can produce
    pub fn max_code(&self) -> u32 {
        (1u32 << self.resolution) - 1
    }

    /// Highest channel the descriptor can encode
    pub fn max_channel(&self) -> u8 {
        self.channel_mask.min(MAX_CHANNEL)
    }

    /// Build the full-duplex transfer frame selecting `channel`
    ///
    /// The frame is always `read_byte_count` bytes: command byte with the
    /// channel folded in, remaining prefix bytes, zero padding.
    pub fn command_frame(&self, channel: u8) -> Result<Vec<u8>, ProtocolError> {
        if channel > self.max_channel() {
            return Err(ProtocolError::ChannelOutOfRange {
                channel,
                max: self.max_channel(),
            });
        }

        let mut frame = vec![0u8; self.read_byte_count];
        let select = ((channel & self.channel_mask) as u32) << self.channel_bit_shift;
        frame[0] = self.command_prefix[0] | select as u8;
        for (slot, byte) in frame[1..].iter_mut().zip(self.command_prefix[1..].iter()) {
            *slot = *byte;
        }
        Ok(frame)
    }

    /// Extract the raw conversion code from a response
    ///
    /// Packs the response big-endian into an integer, then applies the
    /// descriptor's result shift and mask.
    pub fn unpack(&self, response: &[u8]) -> Result<u32, ProtocolError> {
        if response.len() != self.read_byte_count {
            return Err(ProtocolError::ResponseLength {
                expected: self.read_byte_count,
                got: response.len(),
            });
        }

        let packed = response.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        Ok(((packed >> self.result_bit_shift) & self.result_bit_mask as u64) as u32)
    }

    /// Scale a raw code to volts against the reference
    pub fn raw_to_voltage(&self, raw: u32) -> f64 {
        raw as f64 * self.reference_voltage / self.max_code() as f64
    }
}
