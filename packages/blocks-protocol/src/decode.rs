use thiserror::Error;

use crate::bits::BitReader;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    kind: DecodeErrorKind,
    type_name: &'static str,
}

impl DecodeError {
    pub fn new<T>(kind: DecodeErrorKind) -> Self {
        Self {
            kind,
            type_name: core::any::type_name::<T>(),
        }
    }

    pub const fn kind(&self) -> DecodeErrorKind {
        self.kind
    }

    /// Name of the type that failed to decode.
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to decode {}: {}", self.type_name, self.kind)
    }
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    #[error("Needed {needed} bits at bit {position}, but only {available} remain.")]
    UnexpectedEnd {
        position: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unknown message type {0:#04x}.")]
    UnknownMessageType(u8),

    #[error("Expected message type {expected:#04x}, found {found:#04x}.")]
    UnexpectedMessageType { found: u8, expected: u8 },
}

/// A type that can be read from a 7-bit packed bit stream.
///
/// Implementors read their fields in wire order from the provided
/// [`BitReader`], which is advanced by the number of bits consumed.
pub trait BitDecode {
    /// Attempts to decode `Self` at the reader's current position.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the stream ends before every field could
    /// be read or contains an unexpected tag.
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

impl BitDecode for bool {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(reader.read(1)? != 0)
    }
}
