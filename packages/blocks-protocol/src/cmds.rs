//! Host-to-device command payloads.
//!
//! Commands are bit-packed like every other payload: a 7-bit message type
//! (`0x01` for device commands, `0x10` for configuration) followed by the
//! command's fields. Each entry carries the checksum of its payload so that
//! a wrong table entry is caught the first time it is framed.
//!
//! | Command                | Payload          | Checksum |
//! |------------------------|------------------|----------|
//! | [`BEGIN_API_MODE`]     | `01 00 00`       | `0x5A`   |
//! | [`REQUEST_TOPOLOGY`]   | `01 01 00`       | `0x5D`   |
//! | [`END_API_MODE`]       | `01 02 00`       | `0x60`   |
//! | [`PING`]               | `01 03 00`       | `0x63`   |
//! | [`SAVE_PROGRAM`]       | `01 05 00`       | `0x69`   |
//! | [`ENABLE_MPE`]         | `10 02`          | `0x44`   |

use alloc::vec::Vec;

use crate::sysex::build_frame_checked;

/// Device index that host-wide requests such as [`REQUEST_TOPOLOGY`] are
/// addressed to.
pub const TOPOLOGY_DEVICE_INDEX: u8 = 0;

/// A fixed command payload and its known checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    pub name: &'static str,
    pub payload: &'static [u8],
    pub checksum: u8,
}

impl DeviceCommand {
    /// Frames this command for `device_index`.
    ///
    /// # Panics
    ///
    /// Panics if the table checksum doesn't match the payload.
    pub fn frame(&self, device_index: u8) -> Vec<u8> {
        build_frame_checked(device_index, self.payload, self.checksum)
    }
}

pub const BEGIN_API_MODE: DeviceCommand = DeviceCommand {
    name: "begin API mode",
    payload: &[0x01, 0x00, 0x00],
    checksum: 0x5A,
};

pub const REQUEST_TOPOLOGY: DeviceCommand = DeviceCommand {
    name: "request topology",
    payload: &[0x01, 0x01, 0x00],
    checksum: 0x5D,
};

pub const END_API_MODE: DeviceCommand = DeviceCommand {
    name: "end API mode",
    payload: &[0x01, 0x02, 0x00],
    checksum: 0x60,
};

/// Keeps the device in API mode; sent periodically while a session is open.
pub const PING: DeviceCommand = DeviceCommand {
    name: "ping",
    payload: &[0x01, 0x03, 0x00],
    checksum: 0x63,
};

/// Persists the uploaded program as the device's default.
pub const SAVE_PROGRAM: DeviceCommand = DeviceCommand {
    name: "save program as default",
    payload: &[0x01, 0x05, 0x00],
    checksum: 0x69,
};

/// Switches the touch surface to multi-dimensional (MPE) reporting.
pub const ENABLE_MPE: DeviceCommand = DeviceCommand {
    name: "enable MPE",
    payload: &[0x10, 0x02],
    checksum: 0x44,
};

/// Every command in the table.
pub const ALL: [DeviceCommand; 6] = [
    BEGIN_API_MODE,
    REQUEST_TOPOLOGY,
    END_API_MODE,
    PING,
    SAVE_PROGRAM,
    ENABLE_MPE,
];

/// Packet counter value after [`LED_PROGRAM`] has been sent.
pub const LED_PROGRAM_NEXT_COUNTER: u16 = 3;

/// The bitmap-LED program uploaded during the handshake.
///
/// Both packets are change lists (indices 1 and 2) that write the program
/// into device memory starting at address 0.
pub const LED_PROGRAM: [&[u8]; 2] = [
    &[
        0x02, 0x01, 0x00, 0x30, 0x5A, 0x3E, 0x47, 0x0B, 0x20, 0x01, 0x3A, 0x00,
        0x10, 0x71, 0x01, 0x12, 0x4B, 0x31, 0x09, 0x08, 0x60, 0x46, 0x5F, 0x25,
        0x11, 0x40, 0x05, 0x02, 0x28, 0x61, 0x01, 0x17, 0x54, 0x11, 0x40, 0x10,
        0x36, 0x78, 0x21, 0x12, 0x6D, 0x1C, 0x30, 0x5B, 0x00, 0x2E, 0x28, 0x63,
        0x00, 0x23, 0x6C, 0x70, 0x43, 0x24, 0x5A, 0x39, 0x60, 0x32, 0x01, 0x28,
        0x09, 0x41, 0x0D, 0x3E, 0x28, 0x24, 0x10, 0x1B, 0x04, 0x51, 0x48, 0x1A,
        0x0A, 0x08, 0x22, 0x09, 0x1B, 0x2C, 0x30, 0x45, 0x0D, 0x2E, 0x08, 0x24,
        0x20, 0x1B, 0x1C, 0x00, 0x5B, 0x6C, 0x50, 0x41, 0x16, 0x36, 0x58, 0x20,
        0x10, 0x01, 0x6D, 0x50, 0x40, 0x2D, 0x36, 0x58, 0x60, 0x0B, 0x01, 0x6D,
        0x70, 0x40, 0x2D, 0x3A, 0x78, 0x3F, 0x00, 0x0F, 0x1C, 0x78, 0x4F, 0x07,
        0x2E, 0x28, 0x78, 0x08, 0x19, 0x04, 0x52, 0x06, 0x15, 0x01, 0x48, 0x24,
        0x00, 0x21, 0x64, 0x10, 0x48, 0x1A, 0x02, 0x18, 0x60, 0x0C, 0x01, 0x4C,
        0x70, 0x40, 0x05, 0x7C, 0x3F, 0x00, 0x7F, 0x0F, 0x60, 0x7F, 0x03, 0x78,
        0x7F, 0x00, 0x7E, 0x1F, 0x40, 0x7F, 0x07, 0x70, 0x7F, 0x01, 0x7C, 0x3F,
        0x00, 0x7F, 0x0F, 0x60, 0x7F, 0x03, 0x78, 0x7F, 0x00, 0x7E, 0x1F, 0x40,
        0x7F, 0x07, 0x70, 0x7F, 0x01, 0x7C, 0x3F, 0x00, 0x7F, 0x0F, 0x00, 0x00,
    ],
    &[
        0x02, 0x02, 0x00, 0x0C, 0x5C, 0x7F, 0x07, 0x70, 0x7F, 0x01, 0x7C, 0x3F,
        0x00, 0x7F, 0x0F, 0x60, 0x7F, 0x03, 0x78, 0x7F, 0x00, 0x7E, 0x1F, 0x40,
        0x7F, 0x07, 0x70, 0x7F, 0x01, 0x7C, 0x3F, 0x00, 0x7F, 0x0F, 0x60, 0x7F,
        0x03, 0x78, 0x7F, 0x00, 0x7E, 0x1F, 0x40, 0x7F, 0x07, 0x70, 0x7F, 0x01,
        0x7C, 0x3F, 0x00, 0x7F, 0x0F, 0x60, 0x7F, 0x03, 0x78, 0x7F, 0x00, 0x7E,
        0x1F, 0x40, 0x7F, 0x07, 0x70, 0x7F, 0x01, 0x7C, 0x3F, 0x00, 0x7F, 0x0F,
        0x60, 0x7F, 0x03, 0x78, 0x7F, 0x00, 0x1E, 0x19, 0x00, 0x4B, 0x00,
    ],
];
