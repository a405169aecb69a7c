use alloc::vec::Vec;

use crate::decode::{BitDecode, DecodeError, DecodeErrorKind};

/// Number of usable bits in each byte of a SysEx body.
pub(crate) const SLOT_BITS: usize = 7;

/// A saved [`BitWriter`] cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterState {
    bytes_written: usize,
    bits_in_current_byte: usize,
}

/// Appends integers of arbitrary bit width into a 7-bit-clean byte buffer.
///
/// Values are written least-significant bit first. Each stored byte only
/// carries 7 bits, so the written stream is effectively a sequence of base-128
/// digits and every byte is always in `0..=0x7F`.
///
/// ```
/// use blocks_protocol::BitWriter;
///
/// let mut writer = BitWriter::new();
/// writer.write_bits(0, 4);
/// writer.write_bits(0x13, 7);
/// writer.write_bits(0, 3);
///
/// assert_eq!(writer.as_bytes(), &[0x30, 0x02]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitWriter {
    data: Vec<u8>,
    bytes_written: usize,
    bits_in_current_byte: usize,
}

impl BitWriter {
    /// Creates an empty writer.
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            bytes_written: 0,
            bits_in_current_byte: 0,
        }
    }

    /// Appends the low `width` bits of `value`.
    ///
    /// `width` must be in `1..=32`. Debug builds assert that `value` has no
    /// bits set above `width` (unless `width` is 32).
    pub fn write_bits(&mut self, value: u32, width: u32) {
        debug_assert!((1..=32).contains(&width), "bit width {width} out of range");
        debug_assert!(
            width == 32 || value >> width == 0,
            "value {value:#x} does not fit in {width} bits"
        );

        let mut value = value;
        let mut remaining = width as usize;

        while remaining > 0 {
            if self.bytes_written == self.data.len() {
                self.data.push(0);
            }

            let count = (SLOT_BITS - self.bits_in_current_byte).min(remaining);
            let chunk = (value & ((1 << count) - 1)) as u8;

            self.data[self.bytes_written] |= chunk << self.bits_in_current_byte;
            value >>= count;
            remaining -= count;
            self.bits_in_current_byte += count;

            if self.bits_in_current_byte == SLOT_BITS {
                self.bits_in_current_byte = 0;
                self.bytes_written += 1;
            }
        }
    }

    /// Number of bits written so far.
    pub const fn bit_len(&self) -> usize {
        self.bytes_written * SLOT_BITS + self.bits_in_current_byte
    }

    /// Number of bytes occupied, counting a partially filled final byte.
    pub const fn size(&self) -> usize {
        self.bytes_written + if self.bits_in_current_byte > 0 { 1 } else { 0 }
    }

    /// Returns `true` if `bits_needed` more bits would still fit in `max_bytes`.
    pub const fn has_capacity(&self, bits_needed: usize, max_bytes: usize) -> bool {
        (self.bit_len() + bits_needed).div_ceil(SLOT_BITS) <= max_bytes
    }

    /// Captures the current cursor position.
    pub const fn snapshot(&self) -> WriterState {
        WriterState {
            bytes_written: self.bytes_written,
            bits_in_current_byte: self.bits_in_current_byte,
        }
    }

    /// Rolls the cursor back to a previously captured position, discarding
    /// everything written after it.
    pub fn restore(&mut self, state: WriterState) {
        debug_assert!(
            state.bytes_written * SLOT_BITS + state.bits_in_current_byte <= self.bit_len(),
            "cannot restore a writer forwards"
        );

        self.bytes_written = state.bytes_written;
        self.bits_in_current_byte = state.bits_in_current_byte;
        self.data.truncate(self.size());

        if self.bits_in_current_byte > 0 {
            self.data[self.bytes_written] &= (1 << self.bits_in_current_byte) - 1;
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Reads the `width`-bit unsigned integer starting at `bit_position` of a
/// 7-bit packed buffer.
///
/// Returns `None` if the read would run past the bits physically present in
/// `data`. Only the low 7 bits of each byte are considered.
pub fn read_bits(data: &[u8], bit_position: usize, width: u32) -> Option<u32> {
    debug_assert!((1..=32).contains(&width), "bit width {width} out of range");

    let width = width as usize;
    if bit_position + width > data.len() * SLOT_BITS {
        return None;
    }

    let mut value = 0u32;
    let mut read = 0;

    while read < width {
        let position = bit_position + read;
        let offset = position % SLOT_BITS;
        let count = (SLOT_BITS - offset).min(width - read);
        let chunk = u32::from((data[position / SLOT_BITS] & 0x7F) >> offset) & ((1 << count) - 1);

        value |= chunk << read;
        read += count;
    }

    Some(value)
}

/// Peeks the 7-bit message type tag at `bit_position`.
pub fn message_type(data: &[u8], bit_position: usize) -> Option<u8> {
    read_bits(data, bit_position, 7).map(|tag| tag as u8)
}

/// A forward-only cursor over a 7-bit packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Creates a reader positioned at an absolute bit offset.
    pub const fn at(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bits left between the cursor and the end of the buffer.
    pub const fn remaining(&self) -> usize {
        (self.data.len() * SLOT_BITS).saturating_sub(self.position)
    }

    /// Reads `width` bits and advances the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeErrorKind::UnexpectedEnd`] without moving the cursor if
    /// fewer than `width` bits remain.
    pub fn read(&mut self, width: u32) -> Result<u32, DecodeError> {
        let value = read_bits(self.data, self.position, width).ok_or_else(|| {
            DecodeError::new::<u32>(DecodeErrorKind::UnexpectedEnd {
                position: self.position,
                needed: width as usize,
                available: self.remaining(),
            })
        })?;
        self.position += width as usize;
        Ok(value)
    }

    /// Decodes a `T` at the cursor.
    ///
    /// On failure the cursor is left where it was before the call.
    pub fn decode<T: BitDecode>(&mut self) -> Result<T, DecodeError> {
        let start = self.position;
        T::decode(self).inspect_err(|_| self.position = start)
    }
}

#[cfg(test)]
mod tests {
    use super::{BitReader, BitWriter, message_type, read_bits};

    #[test]
    fn packs_small_fields() {
        let mut writer = BitWriter::new();
        writer.write_bits(0, 4);
        writer.write_bits(0x13, 7);
        writer.write_bits(0, 3);

        assert_eq!(writer.as_bytes(), &[0x30, 0x02]);
        assert_eq!(writer.size(), 2);
    }

    #[test]
    fn packs_change_list_fields() {
        let mut writer = BitWriter::new();
        for (value, width) in [
            (0x02, 7),
            (0x01, 16),
            (0x03, 3),
            (0x71, 8),
            (0x07, 3),
            (0x40, 8),
            (0xFF, 8),
            (0x01, 3),
        ] {
            writer.write_bits(value, width);
        }

        assert_eq!(
            writer.as_bytes(),
            &[0x02, 0x01, 0x00, 0x2C, 0x5C, 0x03, 0x7A, 0x1F]
        );
    }

    #[test]
    fn round_trips_every_width() {
        for width in 1..=32u32 {
            let max = if width == 32 { u32::MAX } else { (1 << width) - 1 };

            for value in [0, 1, max, max / 3, max & 0x5555_5555] {
                // Misalign the field so it straddles byte boundaries.
                let mut writer = BitWriter::new();
                writer.write_bits(0b101, 3);
                writer.write_bits(value, width);

                let bytes = writer.into_bytes();
                assert!(bytes.iter().all(|b| *b < 0x80));
                assert_eq!(read_bits(&bytes, 3, width), Some(value), "width {width}");
            }
        }
    }

    #[test]
    fn size_counts_partial_bytes() {
        let mut writer = BitWriter::new();
        assert_eq!(writer.size(), 0);

        writer.write_bits(0x7F, 7);
        assert_eq!(writer.size(), 1);

        writer.write_bits(1, 1);
        assert_eq!(writer.size(), 2);
        assert_eq!(writer.bit_len(), 8);
    }

    #[test]
    fn capacity() {
        let mut writer = BitWriter::new();
        writer.write_bits(0, 10);

        assert!(writer.has_capacity(4, 2));
        assert!(!writer.has_capacity(5, 2));
        assert!(writer.has_capacity(5, 3));
    }

    #[test]
    fn restore_discards_later_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(0x15, 5);
        let state = writer.snapshot();

        writer.write_bits(0xFFFF, 16);
        writer.restore(state);
        assert_eq!(writer.as_bytes(), &[0x15]);

        writer.write_bits(0, 9);
        assert_eq!(writer.as_bytes(), &[0x15, 0x00]);
    }

    #[test]
    fn clone_is_independent() {
        let mut writer = BitWriter::new();
        writer.write_bits(0x02, 7);

        let mut finished = writer.clone();
        finished.write_bits(1, 3);
        writer.write_bits(0, 3);

        assert_eq!(finished.as_bytes(), &[0x02, 0x01]);
        assert_eq!(writer.as_bytes(), &[0x02, 0x00]);
    }

    #[test]
    fn read_past_end() {
        let data = [0x7F, 0x7F];

        assert_eq!(read_bits(&data, 0, 14), Some(0x3FFF));
        assert_eq!(read_bits(&data, 1, 14), None);
        assert_eq!(message_type(&data, 8), None);
    }

    #[test]
    fn reader_keeps_position_on_error() {
        let data = [0x05, 0x01];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read(7), Ok(0x05));
        assert!(reader.read(8).is_err());
        assert_eq!(reader.position(), 7);
        assert_eq!(reader.read(7), Ok(0x01));
        assert_eq!(reader.remaining(), 0);
    }
}
