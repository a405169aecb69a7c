//! Implementation of the ROLI BLOCKS SysEx protocol in Rust.
//!
//! Every byte inside a SysEx body must have its high bit clear, so all
//! messages on this wire are bit-packed into 7-bit slots. This crate contains
//! the packed bit cursors, the inbound message layouts, the change-list
//! (delta) packetizer used to update device memory, and the SysEx framing
//! shared by both directions.

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod cmds;
pub mod delta;
pub mod message;
pub mod schema;
pub mod sysex;

mod bits;
mod counter;
mod decode;
mod encode;
mod string;

pub use bits::{BitReader, BitWriter, WriterState, message_type, read_bits};
pub use counter::PacketCounter;
pub use decode::{BitDecode, DecodeError, DecodeErrorKind};
pub use encode::BitEncode;
pub use string::{AsciiString, AsciiStringError, SerialNumber};

/// Starting byte sequence of every BLOCKS SysEx frame (start byte plus the
/// ROLI manufacturer and device-type header).
pub const SYSEX_HEADER: [u8; 5] = [0xF0, 0x00, 0x21, 0x10, 0x77];

/// Bit offset of the first message in a device-originated body.
///
/// The body handed to the decoder starts with the device-index byte, which is
/// followed by a 32-bit timestamp.
pub const MESSAGE_START_BIT: usize = 39;

/// API version reported in topology messages by current firmware.
pub const PROTOCOL_VERSION: u8 = 1;
