//! Declarative field layouts for device-originated messages.
//!
//! Each layout is a static [`Schema`]: an ordered list of named fields that
//! are either fixed-width integers, fixed-length 7-bit strings, or another
//! schema decoded in place. [`decode`] interprets any schema against a
//! buffer, and [`decode_tagged`] picks the schema from the message tag.
//!
//! The typed structs in [`crate::message`] are the primary API; the schemas
//! are the wire reference they are tested against, and are useful for
//! generic dumps.
//!
//! | Tag    | Message                   | Layout                                  |
//! |--------|---------------------------|-----------------------------------------|
//! | `0x01` | Device topology           | [`TOPOLOGY_HEADER`], then repeated groups |
//! | `0x02` | Packet acknowledgement    | [`PACKET_ACK`]                          |
//! | `0x11` | Touch move                | [`TOUCH`]                               |
//! | `0x13` | Touch start with velocity | [`TOUCH_WITH_VELOCITY`]                 |
//! | `0x15` | Touch end with velocity   | [`TOUCH_WITH_VELOCITY`]                 |

use alloc::{string::String, vec::Vec};

use crate::{BitReader, DecodeError, message::MessageKind};

/// How many bits a field occupies and how to interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    /// An unsigned integer of the given width (1 to 32 bits).
    Bits(u32),
    /// A nested schema decoded in place.
    Nested(&'static Schema),
    /// A zero-padded string of this many 7-bit characters.
    Ascii(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub width: FieldWidth,
    /// Fields that are not present are declared for documentation and
    /// decode to their default value without consuming any bits.
    pub present: bool,
}

impl Field {
    pub const fn bits(name: &'static str, bits: u32) -> Self {
        Self {
            name,
            width: FieldWidth::Bits(bits),
            present: true,
        }
    }

    pub const fn nested(name: &'static str, schema: &'static Schema) -> Self {
        Self {
            name,
            width: FieldWidth::Nested(schema),
            present: true,
        }
    }

    pub const fn ascii(name: &'static str, len: usize) -> Self {
        Self {
            name,
            width: FieldWidth::Ascii(len),
            present: true,
        }
    }

    /// Marks this field as absent from the wire.
    pub const fn absent(self) -> Self {
        Self {
            present: false,
            ..self
        }
    }

    /// Bits this field consumes on the wire.
    pub fn bit_size(&self) -> usize {
        if !self.present {
            return 0;
        }

        match self.width {
            FieldWidth::Bits(bits) => bits as usize,
            FieldWidth::Nested(schema) => schema.bit_size(),
            FieldWidth::Ascii(len) => len * 7,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl Schema {
    /// Total number of bits consumed by one instance of this schema.
    pub fn bit_size(&self) -> usize {
        self.fields.iter().map(Field::bit_size).sum()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

pub static TOUCH_POSITION: Schema = Schema {
    name: "TouchPosition",
    fields: &[
        Field::bits("x", 12),
        Field::bits("y", 12),
        Field::bits("z", 8),
    ],
};

pub static TOUCH_VELOCITY: Schema = Schema {
    name: "TouchVelocity",
    fields: &[
        Field::bits("vx", 8),
        Field::bits("vy", 8),
        Field::bits("vz", 8),
    ],
};

pub static PACKET_ACK: Schema = Schema {
    name: "PacketAck",
    fields: &[Field::bits("messageType", 7), Field::bits("packetCounter", 10)],
};

/// Touch move. Moves carry no velocity, which the layout declares as absent.
pub static TOUCH: Schema = Schema {
    name: "Touch",
    fields: &[
        Field::bits("messageType", 7),
        Field::bits("deviceIndex", 5),
        Field::bits("touchIndex", 5),
        Field::nested("position", &TOUCH_POSITION),
        Field::nested("velocity", &TOUCH_VELOCITY).absent(),
    ],
};

pub static TOUCH_WITH_VELOCITY: Schema = Schema {
    name: "TouchWithVelocity",
    fields: &[
        Field::bits("messageType", 7),
        Field::bits("deviceIndex", 5),
        Field::bits("touchIndex", 5),
        Field::nested("position", &TOUCH_POSITION),
        Field::nested("velocity", &TOUCH_VELOCITY),
    ],
};

pub static TOPOLOGY_HEADER: Schema = Schema {
    name: "TopologyHeader",
    fields: &[
        Field::bits("messageType", 7),
        Field::bits("protocolVersion", 8),
        Field::bits("deviceCount", 7),
        Field::bits("connectionCount", 8),
    ],
};

pub static TOPOLOGY_DEVICE_INFO: Schema = Schema {
    name: "TopologyDeviceInfo",
    fields: &[
        Field::ascii("serial", 16),
        Field::bits("topologyIndex", 7),
        Field::bits("batteryLevel", 5),
        Field::bits("batteryCharging", 1),
    ],
};

pub static TOPOLOGY_CONNECTION_INFO: Schema = Schema {
    name: "TopologyConnectionInfo",
    fields: &[
        Field::bits("deviceIndex1", 7),
        Field::bits("portIndex1", 5),
        Field::bits("deviceIndex2", 7),
        Field::bits("portIndex2", 5),
    ],
};

/// The fixed part of each message kind.
///
/// For topology messages this is only the header; the device and connection
/// groups that follow are repeated according to the header's counts.
pub fn schema_for(kind: MessageKind) -> &'static Schema {
    match kind {
        MessageKind::Topology => &TOPOLOGY_HEADER,
        MessageKind::PacketAck => &PACKET_ACK,
        MessageKind::TouchMove => &TOUCH,
        MessageKind::TouchStart | MessageKind::TouchEnd => &TOUCH_WITH_VELOCITY,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(u32),
    Text(String),
    Message(DecodedMessage),
    List(Vec<DecodedMessage>),
}

/// The result of decoding a [`Schema`]: field values by name plus the number
/// of bits consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub schema: &'static Schema,
    fields: Vec<(&'static str, FieldValue)>,
    bits: usize,
}

impl DecodedMessage {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find_map(|(field, value)| (*field == name).then_some(value))
    }

    pub fn int(&self, name: &str) -> Option<u32> {
        match self.get(name)? {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn message(&self, name: &str) -> Option<&DecodedMessage> {
        match self.get(name)? {
            FieldValue::Message(value) => Some(value),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[DecodedMessage]> {
        match self.get(name)? {
            FieldValue::List(value) => Some(value),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    /// Number of bits consumed from the input.
    pub const fn bits_consumed(&self) -> usize {
        self.bits
    }
}

/// Decodes `schema` starting at `bit_position` of `data`.
///
/// # Errors
///
/// Fails if the buffer ends before every present field has been read.
pub fn decode(
    schema: &'static Schema,
    data: &[u8],
    bit_position: usize,
) -> Result<DecodedMessage, DecodeError> {
    let mut reader = BitReader::at(data, bit_position);
    decode_from(schema, &mut reader)
}

fn decode_from(
    schema: &'static Schema,
    reader: &mut BitReader<'_>,
) -> Result<DecodedMessage, DecodeError> {
    let start = reader.position();
    let mut fields = Vec::with_capacity(schema.fields.len());

    for field in schema.fields {
        let value = match (field.width, field.present) {
            (FieldWidth::Bits(bits), true) => FieldValue::Int(reader.read(bits)?),
            (FieldWidth::Bits(_), false) => FieldValue::Int(0),
            (FieldWidth::Nested(nested), true) => FieldValue::Message(decode_from(nested, reader)?),
            (FieldWidth::Nested(nested), false) => FieldValue::Message(DecodedMessage {
                schema: nested,
                fields: Vec::new(),
                bits: 0,
            }),
            (FieldWidth::Ascii(len), true) => {
                let mut text = String::with_capacity(len);
                for _ in 0..len {
                    let c = reader.read(7)? as u8;
                    if c != 0 {
                        text.push(char::from(c));
                    }
                }
                FieldValue::Text(text)
            }
            (FieldWidth::Ascii(_), false) => FieldValue::Text(String::new()),
        };
        fields.push((field.name, value));
    }

    Ok(DecodedMessage {
        schema,
        fields,
        bits: reader.position() - start,
    })
}

/// Reads the message tag at `bit_position` and decodes the matching layout.
///
/// Topology messages decode their header, then `deviceCount` device groups
/// (field `devices`) and `connectionCount` connection groups (field
/// `connections`).
///
/// # Errors
///
/// Fails on an unknown tag or if the buffer ends early.
pub fn decode_tagged(data: &[u8], bit_position: usize) -> Result<DecodedMessage, DecodeError> {
    let mut reader = BitReader::at(data, bit_position);
    let kind: MessageKind = reader.decode()?;
    let schema = schema_for(kind);

    let mut reader = BitReader::at(data, bit_position);
    let mut message = decode_from(schema, &mut reader)?;

    if kind == MessageKind::Topology {
        for (count_field, group, list_field) in [
            ("deviceCount", &TOPOLOGY_DEVICE_INFO, "devices"),
            ("connectionCount", &TOPOLOGY_CONNECTION_INFO, "connections"),
        ] {
            let count = message.int(count_field).unwrap_or_default();
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                entries.push(decode_from(group, &mut reader)?);
            }
            message.fields.push((list_field, FieldValue::List(entries)));
        }
        message.bits = reader.position() - bit_position;
    }

    Ok(message)
}
