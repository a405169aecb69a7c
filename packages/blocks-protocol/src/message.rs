//! Typed device-to-host messages.
//!
//! A device-originated SysEx body holds one or more bit-packed messages
//! back to back, starting at [`MESSAGE_START_BIT`]. Each message begins with
//! a 7-bit [`MessageKind`] tag. [`Messages`] walks such a body and stops at
//! the first tag it doesn't understand or the first message that runs past
//! the end of the buffer.

use alloc::vec::Vec;

use log::trace;

use crate::{
    BitDecode, BitEncode, BitReader, BitWriter, DecodeError, DecodeErrorKind, MESSAGE_START_BIT,
    PacketCounter, SerialNumber,
};

/// Message type tags sent by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Topology = 0x01,
    PacketAck = 0x02,
    TouchMove = 0x11,
    TouchStart = 0x13,
    TouchEnd = 0x15,
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        Ok(match value {
            0x01 => Self::Topology,
            0x02 => Self::PacketAck,
            0x11 => Self::TouchMove,
            0x13 => Self::TouchStart,
            0x15 => Self::TouchEnd,
            _ => {
                return Err(DecodeError::new::<Self>(
                    DecodeErrorKind::UnknownMessageType(value),
                ));
            }
        })
    }
}

impl BitDecode for MessageKind {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Self::try_from(reader.read(7)? as u8)
    }
}

impl BitEncode for MessageKind {
    fn bit_size(&self) -> usize {
        7
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_bits(*self as u32, 7);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TouchPosition {
    /// 12-bit horizontal position.
    pub x: u16,
    /// 12-bit vertical position.
    pub y: u16,
    /// Pressure.
    pub z: u8,
}

impl BitDecode for TouchPosition {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x: reader.read(12)? as u16,
            y: reader.read(12)? as u16,
            z: reader.read(8)? as u8,
        })
    }
}

impl BitEncode for TouchPosition {
    fn bit_size(&self) -> usize {
        32
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_bits(u32::from(self.x), 12);
        writer.write_bits(u32::from(self.y), 12);
        writer.write_bits(u32::from(self.z), 8);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TouchVelocity {
    pub vx: u8,
    pub vy: u8,
    pub vz: u8,
}

impl BitDecode for TouchVelocity {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            vx: reader.read(8)? as u8,
            vy: reader.read(8)? as u8,
            vz: reader.read(8)? as u8,
        })
    }
}

impl BitEncode for TouchVelocity {
    fn bit_size(&self) -> usize {
        24
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_bits(u32::from(self.vx), 8);
        writer.write_bits(u32::from(self.vy), 8);
        writer.write_bits(u32::from(self.vz), 8);
    }
}

/// A single touch event. Moves carry no velocity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub device_index: u8,
    pub touch_index: u8,
    pub position: TouchPosition,
    pub velocity: Option<TouchVelocity>,
}

impl Touch {
    fn decode_body(reader: &mut BitReader<'_>, with_velocity: bool) -> Result<Self, DecodeError> {
        Ok(Self {
            device_index: reader.read(5)? as u8,
            touch_index: reader.read(5)? as u8,
            position: reader.decode()?,
            velocity: if with_velocity {
                Some(reader.decode()?)
            } else {
                None
            },
        })
    }

    fn encode_body(&self, writer: &mut BitWriter, with_velocity: bool) {
        writer.write_bits(u32::from(self.device_index), 5);
        writer.write_bits(u32::from(self.touch_index), 5);
        self.position.encode(writer);
        if with_velocity {
            self.velocity.unwrap_or_default().encode(writer);
        }
    }
}

/// One block in a topology report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: SerialNumber,
    pub topology_index: u8,
    /// Battery level, 0 to 31.
    pub battery_level: u8,
    pub battery_charging: bool,
}

impl BitDecode for DeviceInfo {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            serial: reader.decode()?,
            topology_index: reader.read(7)? as u8,
            battery_level: reader.read(5)? as u8,
            battery_charging: reader.decode()?,
        })
    }
}

impl BitEncode for DeviceInfo {
    fn bit_size(&self) -> usize {
        self.serial.bit_size() + 13
    }

    fn encode(&self, writer: &mut BitWriter) {
        self.serial.encode(writer);
        writer.write_bits(u32::from(self.topology_index), 7);
        writer.write_bits(u32::from(self.battery_level), 5);
        self.battery_charging.encode(writer);
    }
}

/// A physical link between a port on one block and a port on another.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub device1: u8,
    pub port1: u8,
    pub device2: u8,
    pub port2: u8,
}

impl BitDecode for ConnectionInfo {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            device1: reader.read(7)? as u8,
            port1: reader.read(5)? as u8,
            device2: reader.read(7)? as u8,
            port2: reader.read(5)? as u8,
        })
    }
}

impl BitEncode for ConnectionInfo {
    fn bit_size(&self) -> usize {
        24
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_bits(u32::from(self.device1), 7);
        writer.write_bits(u32::from(self.port1), 5);
        writer.write_bits(u32::from(self.device2), 7);
        writer.write_bits(u32::from(self.port2), 5);
    }
}

/// The set of connected blocks and how they are wired together.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Topology {
    pub protocol_version: u8,
    pub devices: Vec<DeviceInfo>,
    pub connections: Vec<ConnectionInfo>,
}

impl Topology {
    /// Bits in the largest report the header can describe, tag included:
    /// 127 devices and 255 connections.
    pub const MAX_BITS: usize = 7 + 23 + 127 * (16 * 7 + 13) + 255 * 24;

    /// Looks up a block by its topology index.
    pub fn device(&self, topology_index: u8) -> Option<&DeviceInfo> {
        self.devices
            .iter()
            .find(|device| device.topology_index == topology_index)
    }

    /// Finds the block and port on the other side of `port` on `device`.
    pub fn neighbour(&self, device: u8, port: u8) -> Option<(u8, u8)> {
        self.connections.iter().find_map(|c| {
            if c.device1 == device && c.port1 == port {
                Some((c.device2, c.port2))
            } else if c.device2 == device && c.port2 == port {
                Some((c.device1, c.port1))
            } else {
                None
            }
        })
    }

    fn decode_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        let protocol_version = reader.read(8)? as u8;
        let device_count = reader.read(7)? as usize;
        let connection_count = reader.read(8)? as usize;

        let mut devices = Vec::with_capacity(device_count);
        for _ in 0..device_count {
            devices.push(reader.decode()?);
        }

        let mut connections = Vec::with_capacity(connection_count);
        for _ in 0..connection_count {
            connections.push(reader.decode()?);
        }

        Ok(Self {
            protocol_version,
            devices,
            connections,
        })
    }

    fn encode_body(&self, writer: &mut BitWriter) {
        writer.write_bits(u32::from(self.protocol_version), 8);
        writer.write_bits(self.devices.len() as u32, 7);
        writer.write_bits(self.connections.len() as u32, 8);
        self.devices.encode(writer);
        self.connections.encode(writer);
    }
}

/// A decoded device-to-host message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Topology(Topology),
    PacketAck(PacketCounter),
    TouchMove(Touch),
    TouchStart(Touch),
    TouchEnd(Touch),
}

impl Message {
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Topology(_) => MessageKind::Topology,
            Self::PacketAck(_) => MessageKind::PacketAck,
            Self::TouchMove(_) => MessageKind::TouchMove,
            Self::TouchStart(_) => MessageKind::TouchStart,
            Self::TouchEnd(_) => MessageKind::TouchEnd,
        }
    }

    /// Decodes a message that must be of kind `expected`.
    ///
    /// # Errors
    ///
    /// Fails with [`DecodeErrorKind::UnexpectedMessageType`] if the tag at the
    /// cursor names any other message, known or not.
    pub fn decode_expecting(
        reader: &mut BitReader<'_>,
        expected: MessageKind,
    ) -> Result<Self, DecodeError> {
        let found = reader.read(7)? as u8;
        if found != expected as u8 {
            return Err(DecodeError::new::<Self>(
                DecodeErrorKind::UnexpectedMessageType {
                    found,
                    expected: expected as u8,
                },
            ));
        }

        Self::decode_body(reader, expected)
    }

    fn decode_body(reader: &mut BitReader<'_>, kind: MessageKind) -> Result<Self, DecodeError> {
        Ok(match kind {
            MessageKind::Topology => Self::Topology(Topology::decode_body(reader)?),
            MessageKind::PacketAck => Self::PacketAck(reader.decode()?),
            MessageKind::TouchMove => Self::TouchMove(Touch::decode_body(reader, false)?),
            MessageKind::TouchStart => Self::TouchStart(Touch::decode_body(reader, true)?),
            MessageKind::TouchEnd => Self::TouchEnd(Touch::decode_body(reader, true)?),
        })
    }
}

impl BitDecode for Message {
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        let kind = reader.decode::<MessageKind>()?;
        Self::decode_body(reader, kind)
    }
}

impl BitEncode for Message {
    fn bit_size(&self) -> usize {
        7 + match self {
            Self::Topology(topology) => {
                23 + topology.devices.bit_size() + topology.connections.bit_size()
            }
            Self::PacketAck(counter) => counter.bit_size(),
            Self::TouchMove(_) => 42,
            Self::TouchStart(_) | Self::TouchEnd(_) => 66,
        }
    }

    fn encode(&self, writer: &mut BitWriter) {
        self.kind().encode(writer);
        match self {
            Self::Topology(topology) => topology.encode_body(writer),
            Self::PacketAck(counter) => counter.encode(writer),
            Self::TouchMove(touch) => touch.encode_body(writer, false),
            Self::TouchStart(touch) | Self::TouchEnd(touch) => touch.encode_body(writer, true),
        }
    }
}

/// Iterator over the messages packed into a device-originated body.
///
/// Yields `(message, bits_consumed)` pairs. Iteration ends silently at the
/// first unknown tag or truncated message, so trailing padding and message
/// kinds this crate doesn't know about are tolerated.
#[derive(Debug, Clone)]
pub struct Messages<'a> {
    reader: BitReader<'a>,
    done: bool,
}

impl<'a> Messages<'a> {
    /// Walks `body` starting at an explicit bit offset.
    pub const fn at(body: &'a [u8], bit_position: usize) -> Self {
        Self {
            reader: BitReader::at(body, bit_position),
            done: false,
        }
    }

    /// Bit offset of the next message.
    pub const fn position(&self) -> usize {
        self.reader.position()
    }
}

impl Iterator for Messages<'_> {
    type Item = (Message, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start = self.reader.position();
        match self.reader.decode::<Message>() {
            Ok(message) => {
                let bits = self.reader.position() - start;
                trace!("decoded {:?} ({bits} bits) at bit {start}", message.kind());
                Some((message, bits))
            }
            Err(err) => {
                trace!("stopped decoding at bit {start}: {err}");
                self.done = true;
                None
            }
        }
    }
}

/// Walks the messages of a device body whose first byte is the device index.
pub const fn messages(body: &[u8]) -> Messages<'_> {
    Messages::at(body, MESSAGE_START_BIT)
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::{
        ConnectionInfo, DeviceInfo, Message, MessageKind, Touch, TouchPosition, TouchVelocity,
        messages,
    };
    use crate::{
        BitEncode, BitReader, BitWriter, DecodeErrorKind, MESSAGE_START_BIT, PacketCounter,
        SerialNumber,
        schema::{self, decode_tagged},
    };

    /// A two-block topology report captured from a Lightpad connected to a
    /// Lightpad M, as a full SysEx frame.
    const TOPOLOGY_FRAME: [u8; 86] = [
        0xF0, 0x00, 0x21, 0x10, 0x77, 0x41, 0x00, 0x00, 0x00, 0x00, 0x10, 0x10, 0x40, 0x40, 0x00,
        0x26, 0x28, 0x21, 0x59, 0x1A, 0x66, 0x2A, 0x6D, 0x29, 0x65, 0x21, 0x6B, 0x1A, 0x61, 0x26,
        0x67, 0x40, 0x1F, 0x13, 0x34, 0x33, 0x6E, 0x6D, 0x34, 0x16, 0x54, 0x75, 0x6D, 0x33, 0x13,
        0x34, 0x51, 0x0C, 0x52, 0x6C, 0x1F, 0x40, 0x48, 0x05, 0x01, 0x45, 0x0C, 0x30, 0x08, 0x30,
        0x00, 0x73, 0x22, 0x73, 0x12, 0x03, 0x30, 0x10, 0x33, 0x00, 0x73, 0x22, 0x73, 0x12, 0x03,
        0x38, 0x08, 0x08, 0x00, 0x38, 0x10, 0x0B, 0x00, 0x00, 0x16, 0xF7,
    ];

    fn topology_body() -> &'static [u8] {
        &TOPOLOGY_FRAME[5..TOPOLOGY_FRAME.len() - 2]
    }

    fn body_with(messages: &[Message]) -> Vec<u8> {
        let mut writer = BitWriter::new();
        writer.write_bits(0x40, 7);
        writer.write_bits(0, 32);
        for message in messages {
            message.encode(&mut writer);
        }
        writer.into_bytes()
    }

    #[test]
    fn decodes_captured_topology() {
        let mut decoded = messages(topology_body());
        let (Message::Topology(topology), bits) = decoded.next().unwrap() else {
            panic!("expected a topology message");
        };

        assert_eq!(bits, 367 - MESSAGE_START_BIT);
        assert_eq!(topology.protocol_version, 1);
        assert_eq!(
            topology.devices,
            [
                DeviceInfo {
                    serial: SerialNumber::new("LPB25LUZSJCV5BMN").unwrap(),
                    topology_index: 1,
                    battery_level: 31,
                    battery_charging: true,
                },
                DeviceInfo {
                    serial: SerialNumber::new("LPM97SYPV7OMPE2H").unwrap(),
                    topology_index: 50,
                    battery_level: 31,
                    battery_charging: true,
                },
            ]
        );
        assert_eq!(
            topology.connections,
            [
                ConnectionInfo {
                    device1: 1,
                    port1: 4,
                    device2: 50,
                    port2: 1
                },
                ConnectionInfo {
                    device1: 1,
                    port1: 5,
                    device2: 50,
                    port2: 0
                },
            ]
        );
        assert_eq!(topology.neighbour(50, 0), Some((1, 5)));
        assert_eq!(topology.device(50).unwrap().serial.as_str(), "LPM97SYPV7OMPE2H");

        // The bits after the report don't form a known message.
        assert!(decoded.next().is_none());
        assert_eq!(decoded.position(), 367);
    }

    #[test]
    fn schema_dump_matches_typed_topology() {
        let dump = decode_tagged(topology_body(), MESSAGE_START_BIT).unwrap();

        assert_eq!(dump.schema, &schema::TOPOLOGY_HEADER);
        assert_eq!(dump.bits_consumed(), 367 - MESSAGE_START_BIT);
        assert_eq!(dump.int("deviceCount"), Some(2));

        let devices = dump.list("devices").unwrap();
        assert_eq!(devices[0].text("serial"), Some("LPB25LUZSJCV5BMN"));
        assert_eq!(devices[1].int("topologyIndex"), Some(50));

        let connections = dump.list("connections").unwrap();
        assert_eq!(connections[1].int("portIndex1"), Some(5));
        assert_eq!(connections[1].int("deviceIndex2"), Some(50));
    }

    #[test]
    fn stops_at_unknown_trailing_data() {
        let ack = Message::PacketAck(PacketCounter::new(7));
        let mut body = body_with(&[ack.clone()]);
        // Something that reads as tag 0x7F.
        body.extend([0x7F, 0x7F, 0x7F]);

        let mut decoded = messages(&body);
        assert_eq!(decoded.next(), Some((ack, 17)));
        assert_eq!(decoded.next(), None);
        assert_eq!(decoded.position(), MESSAGE_START_BIT + 17);
    }

    #[test]
    fn decodes_back_to_back_messages() {
        let touch = Touch {
            device_index: 1,
            touch_index: 3,
            position: TouchPosition {
                x: 0x7FF,
                y: 0x120,
                z: 200,
            },
            velocity: Some(TouchVelocity {
                vx: 1,
                vy: 2,
                vz: 90,
            }),
        };
        let sent = [
            Message::TouchStart(touch),
            Message::TouchMove(Touch {
                velocity: None,
                ..touch
            }),
            Message::TouchEnd(touch),
        ];

        let body = body_with(&sent);
        let received: Vec<_> = messages(&body).collect();

        assert_eq!(received.len(), 3);
        for ((message, bits), expected) in received.iter().zip(&sent) {
            assert_eq!(message, expected);
            assert_eq!(*bits, expected.bit_size());
            assert_eq!(*bits, schema::schema_for(expected.kind()).bit_size());
        }
    }

    #[test]
    fn truncated_message_stops_iteration() {
        let body = body_with(&[Message::TouchMove(Touch::default())]);

        assert_eq!(messages(&body[..body.len() - 2]).count(), 0);
    }

    #[test]
    fn unknown_kind() {
        assert!(MessageKind::try_from(0x03).is_err());
        assert_eq!(MessageKind::try_from(0x15), Ok(MessageKind::TouchEnd));
    }

    #[test]
    fn decode_expecting_checks_the_tag() {
        let ack = Message::PacketAck(PacketCounter::new(7));
        let body = body_with(&[ack.clone()]);

        let mut reader = BitReader::at(&body, MESSAGE_START_BIT);
        assert_eq!(Message::decode_expecting(&mut reader, MessageKind::PacketAck), Ok(ack));
        assert_eq!(reader.position(), MESSAGE_START_BIT + 17);

        let mut reader = BitReader::at(&body, MESSAGE_START_BIT);
        let err = Message::decode_expecting(&mut reader, MessageKind::Topology).unwrap_err();
        assert_eq!(
            err.kind(),
            DecodeErrorKind::UnexpectedMessageType {
                found: 0x02,
                expected: 0x01
            }
        );
    }
}
