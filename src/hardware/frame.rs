//! DMA frame record format.
//!
//! The sample provider delivers frames of fixed-size little-endian records,
//! one per conversion. Each record carries the raw converter count in its low
//! half-word and the channel tag above it. A healthy conversion never exceeds
//! [ADC_MAX](super::design_parameters::ADC_MAX); anything larger indicates a
//! corrupted record.

use num_enum::TryFromPrimitive;

use super::design_parameters::ADC_MAX;

/// Size of one sample record in a DMA frame.
pub const RECORD_BYTES: usize = 4;

/// Conversion channel a record belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Channel {
    Voltage = 0,
    Current = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The channel tag does not name a configured conversion channel.
    UnknownChannel,
    /// The raw value exceeds the converter's full-scale count.
    OutOfRange,
}

/// One decoded ADC conversion.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AdcSample {
    pub channel: Channel,
    pub raw: u16,
}

impl AdcSample {
    /// Decode a single record.
    ///
    /// Layout: bits 0..16 raw value (12 significant bits), bits 16..20
    /// channel tag, upper bits reserved.
    pub fn parse(record: [u8; RECORD_BYTES]) -> Result<Self, RecordError> {
        let word = u32::from_le_bytes(record);

        let raw = (word & 0xFFFF) as u16;
        if raw > ADC_MAX {
            return Err(RecordError::OutOfRange);
        }

        let tag = ((word >> 16) & 0xF) as u8;
        let channel =
            Channel::try_from(tag).map_err(|_| RecordError::UnknownChannel)?;

        Ok(AdcSample { channel, raw })
    }
}
