use core::{
    fmt,
    ops::Deref,
    str::{self, FromStr},
};

use thiserror::Error;

use crate::{BitDecode, BitEncode, BitReader, BitWriter, DecodeError};

/// A fixed-capacity ASCII string carried as `N` 7-bit characters.
///
/// Strings shorter than `N` are padded with zero characters on the wire.
///
/// # Invariants
///
/// - Every byte is in `0..=0x7F`.
/// - All bytes past the end of the string are zeroed.
#[derive(Debug, PartialEq, PartialOrd, Eq, Ord, Clone, Copy, Hash)]
pub struct AsciiString<const N: usize>([u8; N]);

/// The 16-character serial number reported for each block in a topology.
pub type SerialNumber = AsciiString<16>;

impl<const N: usize> AsciiString<N> {
    /// Creates a new [`AsciiString`] from the given string slice.
    ///
    /// # Errors
    ///
    /// Returns [`AsciiStringError`] if the string is longer than `N` bytes or
    /// contains a non-ASCII character.
    pub fn new(s: impl AsRef<str>) -> Result<Self, AsciiStringError> {
        let bytes = s.as_ref().as_bytes();

        if bytes.len() > N {
            return Err(AsciiStringError::TooLong {
                input_size: bytes.len(),
                max_size: N,
            });
        }

        if let Some(position) = bytes.iter().position(|b| !b.is_ascii()) {
            return Err(AsciiStringError::NotAscii {
                byte: bytes[position],
                position,
            });
        }

        let mut buf = [0; N];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(N);

        // SAFETY: Every byte is ASCII, which is always valid UTF-8.
        unsafe { str::from_utf8_unchecked(&self.0[..len]) }
    }
}

impl<const N: usize> Deref for AsciiString<N> {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl<const N: usize> Default for AsciiString<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> AsRef<str> for AsciiString<N> {
    fn as_ref(&self) -> &str {
        self
    }
}

impl<const N: usize> TryFrom<&str> for AsciiString<N> {
    type Error = AsciiStringError;

    fn try_from(value: &str) -> Result<Self, AsciiStringError> {
        Self::new(value)
    }
}

impl<const N: usize> FromStr for AsciiString<N> {
    type Err = AsciiStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<const N: usize> fmt::Display for AsciiString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl<const N: usize> BitDecode for AsciiString<N> {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        let mut buf = [0; N];
        for byte in &mut buf {
            *byte = reader.read(7)? as u8;
        }

        // Anything after the first terminator is padding.
        if let Some(end) = buf.iter().position(|&b| b == 0) {
            buf[end..].fill(0);
        }

        Ok(Self(buf))
    }
}

impl<const N: usize> BitEncode for AsciiString<N> {
    fn bit_size(&self) -> usize {
        N * 7
    }

    fn encode(&self, writer: &mut BitWriter) {
        for byte in self.0 {
            writer.write_bits(u32::from(byte), 7);
        }
    }
}

/// Returned when a string cannot be stored in an [`AsciiString`].
#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum AsciiStringError {
    #[error("string with size {input_size} exceeds the maximum size of {max_size}")]
    TooLong { input_size: usize, max_size: usize },

    #[error("byte {byte:#04x} at position {position} is not ASCII")]
    NotAscii { byte: u8, position: usize },
}

#[cfg(test)]
mod tests {
    use super::{AsciiString, AsciiStringError, SerialNumber};
    use crate::{BitEncode, BitReader, BitWriter};

    #[test]
    fn pads_short_strings() {
        let serial = AsciiString::<6>::new("LPB").unwrap();
        let mut writer = BitWriter::new();
        serial.encode(&mut writer);

        assert_eq!(writer.as_bytes(), b"LPB\0\0\0");
        assert_eq!(
            BitReader::new(writer.as_bytes()).decode::<AsciiString<6>>(),
            Ok(serial)
        );
    }

    #[test]
    fn rejects_invalid_input() {
        assert_eq!(
            SerialNumber::new("LPB25LUZSJCV5BMNX"),
            Err(AsciiStringError::TooLong {
                input_size: 17,
                max_size: 16
            })
        );
        assert!(matches!(
            SerialNumber::new("LPB→"),
            Err(AsciiStringError::NotAscii { position: 3, .. })
        ));
    }
}
