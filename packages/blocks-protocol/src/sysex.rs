//! SysEx framing.
//!
//! # Encoding
//!
//! | Field          | Size | Description                                  |
//! |----------------|------|----------------------------------------------|
//! | `header`       | 5    | Must be [`SYSEX_HEADER`] (includes `0xF0`).  |
//! | `device_index` | 1    | Topology index of the addressed block.       |
//! | `payload`      | n    | 7-bit packed message data.                   |
//! | `checksum`     | 1    | See [`checksum`].                            |
//! | `end`          | 1    | `0xF7`.                                      |

use alloc::vec::Vec;

use log::warn;
use thiserror::Error;

use crate::{
    MESSAGE_START_BIT, SYSEX_HEADER,
    message::{Messages, Topology},
};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Bytes surrounding the payload: header, device index, checksum and end.
pub const FRAME_OVERHEAD: usize = SYSEX_HEADER.len() + 3;

/// Largest inbound frame [`SysExAssembler`] buffers by default.
///
/// Sized to hold the largest possible topology report, which is the biggest
/// message a device sends.
pub const DEFAULT_MAX_FRAME_LEN: usize =
    SYSEX_HEADER.len() + (MESSAGE_START_BIT + Topology::MAX_BITS).div_ceil(7) + 2;

/// Computes the 7-bit checksum of a frame payload.
///
/// The running value is seeded with the payload length and updated as
/// `c = (3c + byte) mod 256` for every payload byte.
pub fn checksum(payload: &[u8]) -> u8 {
    let mut sum = payload.len() as u8;
    for byte in payload {
        sum = sum.wrapping_mul(3).wrapping_add(*byte);
    }
    sum & 0x7F
}

/// Wraps a payload in a SysEx frame addressed to `device_index`.
pub fn build_frame(device_index: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(
        payload.iter().all(|b| *b < 0x80),
        "SysEx payload must be 7-bit clean"
    );

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&SYSEX_HEADER);
    frame.push(device_index & 0x7F);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));
    frame.push(SYSEX_END);
    frame
}

/// Like [`build_frame`], but verifies the checksum against a known value.
///
/// # Panics
///
/// Panics if the computed checksum differs from `expected_checksum`. A
/// mismatch means the payload table itself is wrong.
pub fn build_frame_checked(device_index: u8, payload: &[u8], expected_checksum: u8) -> Vec<u8> {
    let frame = build_frame(device_index, payload);
    assert_eq!(
        frame[frame.len() - 2],
        expected_checksum,
        "checksum mismatch for payload {payload:02x?}"
    );
    frame
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame of {0} bytes is too short.")]
    TooShort(usize),

    #[error("Frame does not start with 0xF0.")]
    MissingStart,

    #[error("Frame does not end with 0xF7.")]
    MissingEnd,

    #[error("Frame did not have a valid BLOCKS header.")]
    InvalidHeader,

    #[error("Byte {value:#04x} at offset {offset} has its high bit set.")]
    NotSevenBitClean { offset: usize, value: u8 },

    #[error("Checksum mismatch. Found {found:#04x}, expected {expected:#04x}.")]
    Checksum { found: u8, expected: u8 },
}

/// A validated device-originated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundFrame<'a> {
    body: &'a [u8],
}

impl<'a> InboundFrame<'a> {
    /// Topology index of the block that sent this frame.
    pub fn device_index(&self) -> u8 {
        self.body[0] & 0x3F
    }

    /// The frame with its header and trailer removed. Starts with the raw
    /// device-index byte.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// The messages packed into this frame.
    pub fn messages(&self) -> Messages<'a> {
        crate::message::messages(self.body)
    }
}

/// Validates a complete SysEx frame received from a device.
///
/// # Errors
///
/// Returns a [`FrameError`] if the frame is truncated, has the wrong header
/// or terminator, contains a byte with its high bit set, or fails its
/// checksum.
pub fn parse_frame(frame: &[u8]) -> Result<InboundFrame<'_>, FrameError> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(FrameError::TooShort(frame.len()));
    }

    if frame[0] != SYSEX_START {
        return Err(FrameError::MissingStart);
    }
    if frame[frame.len() - 1] != SYSEX_END {
        return Err(FrameError::MissingEnd);
    }
    if frame[..SYSEX_HEADER.len()] != SYSEX_HEADER {
        return Err(FrameError::InvalidHeader);
    }

    let inner = &frame[1..frame.len() - 1];
    if let Some(offset) = inner.iter().position(|b| *b >= 0x80) {
        return Err(FrameError::NotSevenBitClean {
            offset: offset + 1,
            value: inner[offset],
        });
    }

    let payload = &frame[SYSEX_HEADER.len() + 1..frame.len() - 2];
    let found = frame[frame.len() - 2];
    let expected = checksum(payload);
    if found != expected {
        return Err(FrameError::Checksum { found, expected });
    }

    Ok(InboundFrame {
        body: &frame[SYSEX_HEADER.len()..frame.len() - 2],
    })
}

/// Reassembles SysEx frames from a stream of MIDI bytes.
///
/// Bytes outside a frame are ignored, as are real-time status bytes inside
/// one. Any other status byte aborts the frame in progress.
#[derive(Debug, Clone)]
pub struct SysExAssembler {
    buffer: Vec<u8>,
    max_len: usize,
    in_frame: bool,
    oversized: bool,
}

impl Default for SysExAssembler {
    fn default() -> Self {
        Self::with_max_len(DEFAULT_MAX_FRAME_LEN)
    }
}

impl SysExAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an assembler that drops frames longer than `max_len` bytes.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_len,
            in_frame: false,
            oversized: false,
        }
    }

    /// Feeds one byte, returning a frame when `byte` completes one.
    pub fn push(&mut self, byte: u8) -> Option<&[u8]> {
        match byte {
            SYSEX_START => {
                if self.in_frame {
                    warn!("dropping unterminated SysEx frame of {} bytes", self.buffer.len());
                }
                self.buffer.clear();
                self.buffer.push(byte);
                self.in_frame = true;
                self.oversized = false;
                None
            }
            _ if !self.in_frame => None,
            // Real-time messages may be interleaved with SysEx data.
            0xF8..=0xFF => None,
            SYSEX_END => {
                self.in_frame = false;
                if self.oversized {
                    warn!("dropping SysEx frame longer than {} bytes", self.max_len);
                    return None;
                }
                self.buffer.push(byte);
                Some(&self.buffer)
            }
            0x80..=0xF6 => {
                warn!("SysEx frame interrupted by status byte {byte:#04x}");
                self.in_frame = false;
                None
            }
            _ => {
                if self.buffer.len() + 1 < self.max_len {
                    self.buffer.push(byte);
                } else {
                    self.oversized = true;
                }
                None
            }
        }
    }

    /// Feeds a chunk of bytes, returning every frame it completes.
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for byte in bytes {
            if let Some(frame) = self.push(*byte) {
                frames.push(frame.to_vec());
            }
        }
        frames
    }
}
