//! Change-list (delta) messages.
//!
//! The host updates device memory by sending change lists: a tag, a 16-bit
//! packet index, then a stream of 3-bit commands that move a write pointer
//! forward and store bytes at it. The pointer starts at address 0 in every
//! packet, so each packet can be applied on its own.
//!
//! | Command | Name                 | Arguments                                    |
//! |---------|----------------------|----------------------------------------------|
//! | 0       | End of packet        | more packets follow                          |
//! | 1       | End of changes       | last packet of the update                    |
//! | 2       | Skip few             | 4-bit count                                  |
//! | 3       | Skip many            | 8-bit count                                  |
//! | 4       | Set sequence         | repeated (8-bit value, 1-bit continues)      |
//! | 5       | Set few with value   | 4-bit count, 8-bit value                     |
//! | 6       | Set few, last value  | 4-bit count                                  |
//! | 7       | Set many with value  | 8-bit count, 8-bit value                     |

use alloc::vec::Vec;

use log::debug;
use thiserror::Error;

use crate::{BitReader, BitWriter, DecodeError, PacketCounter};

/// Message tag of a change list.
pub const CHANGE_LIST_MESSAGE: u8 = 0x02;

/// Largest change-list packet the device accepts.
pub const DEFAULT_MAX_PACKET_BYTES: usize = 200;

const COMMAND_BITS: usize = 3;
const FEW_BITS: usize = 4;
const MANY_BITS: usize = 8;
const VALUE_BITS: usize = 8;
const MAX_FEW: usize = 0x0F;
const MAX_MANY: usize = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChangeCommand {
    EndOfPacket = 0,
    EndOfChanges = 1,
    SkipFew = 2,
    SkipMany = 3,
    SetSequence = 4,
    SetFewWithValue = 5,
    SetFewWithLastValue = 6,
    SetManyWithValue = 7,
}

impl From<u8> for ChangeCommand {
    /// Interprets the low three bits of `value`.
    fn from(value: u8) -> Self {
        match value & 0x07 {
            0 => Self::EndOfPacket,
            1 => Self::EndOfChanges,
            2 => Self::SkipFew,
            3 => Self::SkipMany,
            4 => Self::SetSequence,
            5 => Self::SetFewWithValue,
            6 => Self::SetFewWithLastValue,
            _ => Self::SetManyWithValue,
        }
    }
}

/// How runs of changed bytes are encoded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunEncoding {
    /// Every changed byte is sent as part of a literal sequence.
    #[default]
    Literal,
    /// Runs of equal changed bytes are sent as a count and a value.
    CollapseRepeats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOptions {
    /// Upper bound on the size of each packet. `None` produces a single
    /// packet regardless of length.
    pub max_packet_bytes: Option<usize>,
    pub run_encoding: RunEncoding,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            max_packet_bytes: Some(DEFAULT_MAX_PACKET_BYTES),
            run_encoding: RunEncoding::Literal,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeltaError {
    #[error("Frame lengths differ (new: {new}, old: {old}, compared: {length}).")]
    LengthMismatch {
        new: usize,
        old: usize,
        length: usize,
    },

    #[error("A {max_packet_bytes} byte packet cannot hold a single change.")]
    PacketTooSmall { max_packet_bytes: usize },

    #[error("Expected a change list, found message type {0:#04x}.")]
    NotAChangeList(u8),

    #[error("Change list writes address {address}, past the end of {len} bytes of memory.")]
    OutOfBounds { address: usize, len: usize },

    #[error("Change list repeats the last value before setting one.")]
    MissingLastValue,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A finished change-list packet, ready to be framed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePacket {
    pub index: PacketCounter,
    bytes: Vec<u8>,
}

impl ChangePacket {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Incrementally writes the commands of one change-list packet.
#[derive(Debug, Clone)]
pub struct ChangeListBuilder {
    writer: BitWriter,
    index: PacketCounter,
}

impl ChangeListBuilder {
    /// Starts a packet with the change-list tag and the given index.
    pub fn new(index: PacketCounter) -> Self {
        let mut writer = BitWriter::new();
        writer.write_bits(u32::from(CHANGE_LIST_MESSAGE), 7);
        writer.write_bits(u32::from(index.get()), 16);
        Self { writer, index }
    }

    pub fn index(&self) -> PacketCounter {
        self.index
    }

    pub fn writer(&self) -> &BitWriter {
        &self.writer
    }

    fn command(&mut self, command: ChangeCommand) {
        self.writer.write_bits(command as u32, COMMAND_BITS as u32);
    }

    /// Advances the write pointer by `count` bytes.
    ///
    /// Counts above 15 use the 8-bit form, in chunks of at most 255.
    pub fn append_skip(&mut self, mut count: usize) {
        while count > 0 {
            if count > MAX_MANY {
                self.command(ChangeCommand::SkipMany);
                self.writer.write_bits(MAX_MANY as u32, MANY_BITS as u32);
                count -= MAX_MANY;
            } else if count > MAX_FEW {
                self.command(ChangeCommand::SkipMany);
                self.writer.write_bits(count as u32, MANY_BITS as u32);
                count = 0;
            } else {
                self.command(ChangeCommand::SkipFew);
                self.writer.write_bits(count as u32, FEW_BITS as u32);
                count = 0;
            }
        }
    }

    pub fn begin_sequence(&mut self) {
        self.command(ChangeCommand::SetSequence);
    }

    /// Appends one value of a sequence started by [`Self::begin_sequence`].
    pub fn append_sequence_value(&mut self, value: u8, continues: bool) {
        self.writer.write_bits(u32::from(value), VALUE_BITS as u32);
        self.writer.write_bits(u32::from(continues), 1);
    }

    /// Appends a literal byte sequence as a single command.
    pub fn append_sequence(&mut self, values: &[u8]) {
        if values.is_empty() {
            return;
        }

        self.begin_sequence();
        for (i, value) in values.iter().enumerate() {
            self.append_sequence_value(*value, i + 1 < values.len());
        }
    }

    /// Stores `value` in the next `count` bytes (1 to 255).
    ///
    /// With `last_value` set to the value established by an earlier repeat in
    /// this packet, short runs of that value omit it.
    pub fn append_repeat(&mut self, value: u8, count: usize, last_value: Option<u8>) {
        debug_assert!((1..=MAX_MANY).contains(&count));

        if count <= MAX_FEW && last_value == Some(value) {
            self.command(ChangeCommand::SetFewWithLastValue);
            self.writer.write_bits(count as u32, FEW_BITS as u32);
        } else if count <= MAX_FEW {
            self.command(ChangeCommand::SetFewWithValue);
            self.writer.write_bits(count as u32, FEW_BITS as u32);
            self.writer.write_bits(u32::from(value), VALUE_BITS as u32);
        } else {
            self.command(ChangeCommand::SetManyWithValue);
            self.writer.write_bits(count as u32, MANY_BITS as u32);
            self.writer.write_bits(u32::from(value), VALUE_BITS as u32);
        }
    }

    /// Returns a copy of the packet terminated with `end`, leaving this
    /// builder open for further commands.
    pub fn finalized(&self, end: ChangeCommand) -> ChangePacket {
        debug_assert!(matches!(
            end,
            ChangeCommand::EndOfPacket | ChangeCommand::EndOfChanges
        ));

        let mut finished = self.clone();
        finished.command(end);
        ChangePacket {
            index: self.index,
            bytes: finished.writer.into_bytes(),
        }
    }
}

/// Bits needed to skip `count` bytes.
fn skip_bits(mut count: usize) -> usize {
    let mut bits = 0;
    while count > 0 {
        if count > MAX_MANY {
            bits += COMMAND_BITS + MANY_BITS;
            count -= MAX_MANY;
        } else {
            bits += COMMAND_BITS + if count > MAX_FEW { MANY_BITS } else { FEW_BITS };
            count = 0;
        }
    }
    bits
}

struct Packetizer {
    builder: ChangeListBuilder,
    packets: Vec<ChangePacket>,
    max_packet_bytes: Option<usize>,
    /// Device write pointer at the end of the current packet.
    cursor: usize,
    last_value: Option<u8>,
}

impl Packetizer {
    fn new(start_index: PacketCounter, max_packet_bytes: Option<usize>) -> Self {
        Self {
            builder: ChangeListBuilder::new(start_index),
            packets: Vec::new(),
            max_packet_bytes,
            cursor: 0,
            last_value: None,
        }
    }

    /// Whether `bits` more bits plus a terminator fit in the current packet.
    fn fits(&self, bits: usize) -> bool {
        match self.max_packet_bytes {
            Some(max) => self.builder.writer().has_capacity(bits + COMMAND_BITS, max),
            None => true,
        }
    }

    fn split(&mut self) {
        let packet = self.builder.finalized(ChangeCommand::EndOfPacket);
        debug!(
            "change list packet {} full at {} bytes, splitting",
            packet.index,
            packet.len()
        );

        self.packets.push(packet);
        self.builder = ChangeListBuilder::new(self.builder.index().next());
        self.cursor = 0;
        self.last_value = None;
    }

    /// Moves the write pointer to `address`, leaving room for `then_bits`
    /// more bits. Starts a new packet if they don't fit in this one.
    fn seek(&mut self, address: usize, then_bits: usize) -> Result<(), DeltaError> {
        debug_assert!(address >= self.cursor);

        if !self.fits(skip_bits(address - self.cursor) + then_bits) {
            self.split();

            if !self.fits(skip_bits(address) + then_bits) {
                return Err(DeltaError::PacketTooSmall {
                    max_packet_bytes: self.max_packet_bytes.unwrap_or_default(),
                });
            }
        }

        self.builder.append_skip(address - self.cursor);
        self.cursor = address;
        Ok(())
    }

    fn sequence(&mut self, address: usize, values: &[u8]) -> Result<(), DeltaError> {
        const VALUE_WITH_FLAG: usize = VALUE_BITS + 1;

        let mut sent = 0;
        while sent < values.len() {
            self.seek(address + sent, COMMAND_BITS + VALUE_WITH_FLAG)?;
            self.builder.begin_sequence();

            loop {
                let more = sent + 1 < values.len();
                let value = values[sent];
                sent += 1;
                self.cursor += 1;

                // Continuing commits to writing the next value too, so both
                // this value and the next one must fit.
                let continues = more && self.fits(VALUE_WITH_FLAG + VALUE_WITH_FLAG);
                self.builder.append_sequence_value(value, continues);

                if !continues {
                    break;
                }
            }
        }

        Ok(())
    }

    fn repeat(&mut self, address: usize, value: u8, count: usize) -> Result<(), DeltaError> {
        let bits = COMMAND_BITS
            + VALUE_BITS
            + if count > MAX_FEW { MANY_BITS } else { FEW_BITS };

        self.seek(address, bits)?;
        self.builder.append_repeat(value, count, self.last_value);
        self.cursor += count;
        self.last_value = Some(value);
        Ok(())
    }

    /// Emits a run of changed bytes starting at `address`.
    fn changed(
        &mut self,
        address: usize,
        run: &[u8],
        encoding: RunEncoding,
    ) -> Result<(), DeltaError> {
        if encoding == RunEncoding::Literal {
            return self.sequence(address, run);
        }

        let mut literal_start = 0;
        let mut i = 0;
        while i < run.len() {
            let value = run[i];
            let len = run[i..]
                .iter()
                .take_while(|v| **v == value)
                .count()
                .min(MAX_MANY);
            let worth_collapsing = len >= 3 || (len >= 2 && self.last_value == Some(value));

            if worth_collapsing {
                self.sequence(address + literal_start, &run[literal_start..i])?;
                self.repeat(address + i, value, len)?;
                i += len;
                literal_start = i;
            } else {
                i += 1;
            }
        }

        self.sequence(address + literal_start, &run[literal_start..])
    }

    fn finish(self) -> Vec<ChangePacket> {
        let mut packets = self.packets;
        packets.push(self.builder.finalized(ChangeCommand::EndOfChanges));
        packets
    }
}

/// Encodes the bytes of `new` that differ from `old` as change-list packets.
///
/// Byte `i` of both frames lives at device address `base_offset + i`. Only
/// the first `length` bytes are compared. Packets are numbered from
/// `start_index`, and every packet but the last ends with an end-of-packet
/// marker. Identical frames produce a single packet with no changes.
///
/// ```
/// use blocks_protocol::{PacketCounter, delta::compute_delta_packets};
///
/// let packets =
///     compute_delta_packets(&[0xFF, 0xFF], &[0, 0], 113, 2, PacketCounter::new(1), None).unwrap();
///
/// assert_eq!(
///     packets[0].as_bytes(),
///     &[0x02, 0x01, 0x00, 0x2C, 0x1C, 0x7E, 0x7F, 0x5F, 0x00]
/// );
/// ```
///
/// # Errors
///
/// Fails if the frames are shorter than `length` or differ in size, or if
/// `max_packet_bytes` is too small to hold even one changed byte.
pub fn compute_delta_packets(
    new: &[u8],
    old: &[u8],
    base_offset: usize,
    length: usize,
    start_index: PacketCounter,
    max_packet_bytes: Option<usize>,
) -> Result<Vec<ChangePacket>, DeltaError> {
    compute_delta_packets_with(
        new,
        old,
        base_offset,
        length,
        start_index,
        &DeltaOptions {
            max_packet_bytes,
            ..Default::default()
        },
    )
}

/// [`compute_delta_packets`] with explicit [`DeltaOptions`].
pub fn compute_delta_packets_with(
    new: &[u8],
    old: &[u8],
    base_offset: usize,
    length: usize,
    start_index: PacketCounter,
    options: &DeltaOptions,
) -> Result<Vec<ChangePacket>, DeltaError> {
    if new.len() != old.len() || length > new.len() {
        return Err(DeltaError::LengthMismatch {
            new: new.len(),
            old: old.len(),
            length,
        });
    }

    let mut packetizer = Packetizer::new(start_index, options.max_packet_bytes);
    let mut i = 0;

    while i < length {
        // Skip over unchanged bytes; the skip itself is written lazily by
        // the next change.
        while i < length && new[i] == old[i] {
            i += 1;
        }

        let start = i;
        while i < length && new[i] != old[i] {
            i += 1;
        }

        if start < i {
            packetizer.changed(base_offset + start, &new[start..i], options.run_encoding)?;
        }
    }

    Ok(packetizer.finish())
}

/// How a change-list packet ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedChangeList {
    pub index: u16,
    /// `true` for end-of-changes, `false` for end-of-packet.
    pub last: bool,
}

/// Applies one change-list packet to device memory.
///
/// This is the device side of [`compute_delta_packets`]: the write pointer
/// starts at address 0 of `memory`.
///
/// # Errors
///
/// Fails if the packet is not a change list, is truncated, or writes past the
/// end of `memory`. Changes before the failing command stay applied.
pub fn apply_change_list(
    packet: &[u8],
    memory: &mut [u8],
) -> Result<AppliedChangeList, DeltaError> {
    let mut reader = BitReader::new(packet);

    let tag = reader.read(7)? as u8;
    if tag != CHANGE_LIST_MESSAGE {
        return Err(DeltaError::NotAChangeList(tag));
    }
    let index = reader.read(16)? as u16;

    let mut pointer = 0usize;
    let mut last_value = None;

    let mut fill = |pointer: &mut usize, value: u8, count: usize| -> Result<(), DeltaError> {
        let end = *pointer + count;
        let len = memory.len();
        memory
            .get_mut(*pointer..end)
            .ok_or_else(|| DeltaError::OutOfBounds {
                address: end.saturating_sub(1),
                len,
            })?
            .fill(value);
        *pointer = end;
        Ok(())
    };

    loop {
        match ChangeCommand::from(reader.read(COMMAND_BITS as u32)? as u8) {
            ChangeCommand::EndOfPacket => return Ok(AppliedChangeList { index, last: false }),
            ChangeCommand::EndOfChanges => return Ok(AppliedChangeList { index, last: true }),
            ChangeCommand::SkipFew => pointer += reader.read(FEW_BITS as u32)? as usize,
            ChangeCommand::SkipMany => pointer += reader.read(MANY_BITS as u32)? as usize,
            ChangeCommand::SetSequence => loop {
                let value = reader.read(VALUE_BITS as u32)? as u8;
                fill(&mut pointer, value, 1)?;
                if reader.read(1)? == 0 {
                    break;
                }
            },
            ChangeCommand::SetFewWithValue => {
                let count = reader.read(FEW_BITS as u32)? as usize;
                let value = reader.read(VALUE_BITS as u32)? as u8;
                fill(&mut pointer, value, count)?;
                last_value = Some(value);
            }
            ChangeCommand::SetFewWithLastValue => {
                let count = reader.read(FEW_BITS as u32)? as usize;
                let value = last_value.ok_or(DeltaError::MissingLastValue)?;
                fill(&mut pointer, value, count)?;
            }
            ChangeCommand::SetManyWithValue => {
                let count = reader.read(MANY_BITS as u32)? as usize;
                let value = reader.read(VALUE_BITS as u32)? as u8;
                fill(&mut pointer, value, count)?;
                last_value = Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::{format, vec, vec::Vec};

    use proptest::prelude::*;

    use super::{
        ChangeCommand, ChangeListBuilder, ChangePacket, DeltaError, DeltaOptions, RunEncoding,
        apply_change_list, compute_delta_packets, compute_delta_packets_with,
    };
    use crate::{PacketCounter, cmds::LED_PROGRAM};

    const BASE: usize = 113;

    fn bytes(packets: &[ChangePacket]) -> Vec<&[u8]> {
        packets.iter().map(ChangePacket::as_bytes).collect()
    }

    /// Applies `packets` to a copy of `old` placed at `BASE`.
    fn apply(packets: &[ChangePacket], old: &[u8]) -> Vec<u8> {
        let mut memory = vec![0; BASE];
        memory.extend_from_slice(old);

        for (i, packet) in packets.iter().enumerate() {
            let applied = apply_change_list(packet.as_bytes(), &mut memory).unwrap();
            assert_eq!(applied.index, packet.index.get());
            assert_eq!(applied.last, i + 1 == packets.len());
        }

        memory.split_off(BASE)
    }

    #[test]
    fn builder_commands() {
        let mut builder = ChangeListBuilder::new(PacketCounter::new(1));
        builder.append_skip(0x71);
        builder.append_repeat(0xFF, 0x40, None);

        assert_eq!(
            builder.finalized(ChangeCommand::EndOfChanges).as_bytes(),
            &[0x02, 0x01, 0x00, 0x2C, 0x5C, 0x03, 0x7A, 0x1F]
        );

        let mut builder = ChangeListBuilder::new(PacketCounter::new(1));
        builder.append_skip(BASE);
        builder.append_sequence(&[0xFF, 0xFF]);
        let open = builder.finalized(ChangeCommand::EndOfPacket);
        let last = builder.finalized(ChangeCommand::EndOfChanges);

        assert_eq!(open.as_bytes(), &[0x02, 0x01, 0x00, 0x2C, 0x1C, 0x7E, 0x7F, 0x1F, 0x00]);
        assert_eq!(last.as_bytes(), &[0x02, 0x01, 0x00, 0x2C, 0x1C, 0x7E, 0x7F, 0x5F, 0x00]);
    }

    #[test]
    fn single_packet_literal() {
        let packets =
            compute_delta_packets(&[0xFF, 0xFF], &[0, 0], BASE, 2, PacketCounter::new(1), None)
                .unwrap();

        assert_eq!(
            bytes(&packets),
            [&[0x02, 0x01, 0x00, 0x2C, 0x1C, 0x7E, 0x7F, 0x5F, 0x00][..]]
        );
    }

    #[test]
    fn trailing_unchanged_bytes_are_not_skipped() {
        let mut new = vec![0; 450];
        new[..2].fill(0xFF);

        let packets =
            compute_delta_packets(&new, &[0; 450], BASE, 450, PacketCounter::new(1), None).unwrap();

        assert_eq!(
            bytes(&packets),
            [&[0x02, 0x01, 0x00, 0x2C, 0x1C, 0x7E, 0x7F, 0x5F, 0x00][..]]
        );
    }

    #[test]
    fn identical_frames() {
        let frame = [0x12; 450];
        let packets =
            compute_delta_packets(&frame, &frame, BASE, 450, PacketCounter::new(9), Some(200))
                .unwrap();

        assert_eq!(packets.len(), 1);
        // Tag, index, end-of-changes.
        assert_eq!(packets[0].as_bytes(), &[0x02, 0x09, 0x00, 0x04]);
        assert_eq!(apply(&packets, &frame), frame);
    }

    #[test]
    fn splits_to_packet_budget() {
        let packets = compute_delta_packets(
            &[0x01, 0x02, 0x03],
            &[0x00, 0x00, 0x00],
            BASE,
            3,
            PacketCounter::new(1),
            Some(7),
        )
        .unwrap();

        assert_eq!(
            bytes(&packets),
            [
                &[0x02, 0x01, 0x00, 0x2C, 0x1C, 0x06, 0x00][..],
                &[0x02, 0x02, 0x00, 0x4C, 0x1C, 0x0A, 0x00][..],
                &[0x02, 0x03, 0x00, 0x6C, 0x1C, 0x0E, 0x10][..],
            ]
        );
        assert_eq!(apply(&packets, &[0; 3]), [1, 2, 3]);
    }

    #[test]
    fn packet_indices_wrap() {
        let packets = compute_delta_packets(
            &[1, 2, 3],
            &[0, 0, 0],
            BASE,
            3,
            PacketCounter::new(1023),
            Some(7),
        )
        .unwrap();

        let indices: Vec<_> = packets.iter().map(|p| p.index.get()).collect();
        assert_eq!(indices, [1023, 0, 1]);
    }

    #[test]
    fn full_frame_respects_budget() {
        let old: Vec<u8> = (0..450).map(|i| (i % 7) as u8).collect();
        let new: Vec<u8> = (0..450u32)
            .map(|i| if i % 5 == 0 { old[i as usize] } else { (i * 31 % 251) as u8 })
            .collect();

        let packets =
            compute_delta_packets(&new, &old, BASE, 450, PacketCounter::new(4), Some(200))
                .unwrap();

        assert!(packets.len() > 1);
        assert!(packets.iter().all(|p| p.len() <= 200));
        assert!(packets.iter().all(|p| p.as_bytes().iter().all(|b| *b < 0x80)));
        assert_eq!(apply(&packets, &old), new);
    }

    #[test]
    fn two_values_split_at_tight_budget() {
        let packets =
            compute_delta_packets(&[1, 2], &[0, 0], BASE, 2, PacketCounter::new(1), Some(8))
                .unwrap();

        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.len() <= 8));
        assert_eq!(apply(&packets, &[0, 0]), [1, 2]);
    }

    #[test]
    fn every_packet_fits_its_budget() {
        let old = [0u8; 32];

        for max in (7..=40).chain([200]) {
            for run in 1..=20 {
                let distinct: Vec<u8> = (0..run).map(|i| (i * 37 + 1) as u8).collect();
                let constant = vec![0x55; run];

                for values in [&distinct, &constant] {
                    let mut new = old;
                    new[3..3 + run].copy_from_slice(values);

                    let mut encodings = vec![RunEncoding::Literal];
                    // A repeat with its value needs one more byte than a literal.
                    if max >= 8 {
                        encodings.push(RunEncoding::CollapseRepeats);
                    }

                    for run_encoding in encodings {
                        let options = DeltaOptions {
                            max_packet_bytes: Some(max),
                            run_encoding,
                        };
                        let packets = compute_delta_packets_with(
                            &new,
                            &old,
                            BASE,
                            old.len(),
                            PacketCounter::new(1),
                            &options,
                        )
                        .unwrap();

                        assert!(
                            packets.iter().all(|p| p.len() <= max),
                            "run of {run} at {max} bytes ({run_encoding:?})"
                        );
                        assert!(packets.iter().all(|p| p.as_bytes().iter().all(|b| *b < 0x80)));
                        assert_eq!(apply(&packets, &old), new);
                    }
                }
            }
        }
    }

    proptest! {
        #[test]
        fn random_frames_fit_their_budget(
            old in prop::collection::vec(any::<u8>(), 450),
            changes in prop::collection::vec(prop::option::of(any::<u8>()), 450),
            max in prop::sample::select(vec![16usize, 32, 64, 200]),
            collapse in any::<bool>(),
        ) {
            let new: Vec<u8> = old
                .iter()
                .zip(&changes)
                .map(|(old, change)| change.unwrap_or(*old))
                .collect();
            let options = DeltaOptions {
                max_packet_bytes: Some(max),
                run_encoding: if collapse {
                    RunEncoding::CollapseRepeats
                } else {
                    RunEncoding::Literal
                },
            };

            let packets =
                compute_delta_packets_with(&new, &old, BASE, 450, PacketCounter::new(1), &options)
                    .unwrap();

            prop_assert!(packets.iter().all(|p| p.len() <= max));
            prop_assert_eq!(apply(&packets, &old), new);
        }
    }

    #[test]
    fn long_skips_are_chunked() {
        let old = vec![0; 700];
        let mut new = old.clone();
        new[650] = 0x42;

        let packets =
            compute_delta_packets(&new, &old, 0, 700, PacketCounter::new(1), None).unwrap();
        assert_eq!(apply_at_zero(&packets, &old), new);
    }

    fn apply_at_zero(packets: &[ChangePacket], old: &[u8]) -> Vec<u8> {
        let mut memory = old.to_vec();
        for packet in packets {
            apply_change_list(packet.as_bytes(), &mut memory).unwrap();
        }
        memory
    }

    #[test]
    fn collapsed_runs_are_smaller() {
        let old = [0u8; 450];
        let mut new = [0u8; 450];
        new[10..200].fill(0x1F);
        new[200..204].copy_from_slice(&[1, 2, 3, 4]);
        new[204..206].fill(0x1F);
        new[300..450].fill(0x7C);

        let options = DeltaOptions {
            max_packet_bytes: Some(200),
            run_encoding: RunEncoding::CollapseRepeats,
        };
        let collapsed =
            compute_delta_packets_with(&new, &old, BASE, 450, PacketCounter::new(1), &options)
                .unwrap();
        let literal =
            compute_delta_packets(&new, &old, BASE, 450, PacketCounter::new(1), Some(200))
                .unwrap();

        let size = |packets: &[ChangePacket]| packets.iter().map(ChangePacket::len).sum::<usize>();
        assert!(size(&collapsed) < size(&literal));
        assert_eq!(apply(&collapsed, &old), new);
        assert_eq!(apply(&literal, &old), new);
    }

    #[test]
    fn applies_captured_program_upload() {
        let mut memory = vec![0; 7200];

        let first = apply_change_list(LED_PROGRAM[0], &mut memory).unwrap();
        let second = apply_change_list(LED_PROGRAM[1], &mut memory).unwrap();

        assert_eq!((first.index, first.last), (1, false));
        assert_eq!((second.index, second.last), (2, true));
        assert_eq!(&memory[..4], &[105, 190, 113, 0]);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            compute_delta_packets(&[0; 3], &[0; 2], 0, 2, PacketCounter::new(0), None),
            Err(DeltaError::LengthMismatch {
                new: 3,
                old: 2,
                length: 2
            })
        );
        assert_eq!(
            compute_delta_packets(&[1], &[0], BASE, 1, PacketCounter::new(0), Some(5)),
            Err(DeltaError::PacketTooSmall {
                max_packet_bytes: 5
            })
        );

        let mut memory = [0; 4];
        assert_eq!(
            apply_change_list(&[0x11, 0x00], &mut memory),
            Err(DeltaError::NotAChangeList(0x11))
        );

        let packets =
            compute_delta_packets(&[9], &[0], 10, 1, PacketCounter::new(0), None).unwrap();
        assert!(matches!(
            apply_change_list(packets[0].as_bytes(), &mut memory),
            Err(DeltaError::OutOfBounds { address: 10, len: 4 })
        ));
    }
}
