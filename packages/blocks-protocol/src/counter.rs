use core::fmt;

use crate::{BitDecode, BitEncode, BitReader, BitWriter, DecodeError};

/// A 10-bit wrapping packet sequence number.
///
/// Every acknowledged host packet advances the counter by one, and the device
/// reports the last counter value it processed in its ack messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketCounter(u16);

impl PacketCounter {
    /// Largest representable counter value.
    pub const MAX: u16 = 0x3FF;

    pub const BITS: u32 = 10;

    /// Creates a counter, discarding any bits above the 10-bit range.
    pub const fn new(value: u16) -> Self {
        Self(value & Self::MAX)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// The counter value following this one, wrapping from 1023 to 0.
    #[must_use]
    pub const fn next(self) -> Self {
        Self::new(self.0.wrapping_add(1))
    }

    /// Returns `true` if `self` is exactly one step after `previous`.
    pub const fn follows(self, previous: Self) -> bool {
        self.0 == previous.next().0
    }
}

impl From<u16> for PacketCounter {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

impl From<PacketCounter> for u16 {
    fn from(counter: PacketCounter) -> Self {
        counter.0
    }
}

impl fmt::Display for PacketCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl BitDecode for PacketCounter {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self::new(reader.read(Self::BITS)? as u16))
    }
}

impl BitEncode for PacketCounter {
    fn bit_size(&self) -> usize {
        Self::BITS as usize
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_bits(u32::from(self.0), Self::BITS);
    }
}
