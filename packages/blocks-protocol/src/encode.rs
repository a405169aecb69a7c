use crate::bits::BitWriter;

/// A type that can be written into a 7-bit packed bit stream.
pub trait BitEncode {
    /// Returns the number of bits this value occupies when encoded.
    fn bit_size(&self) -> usize;

    /// Appends this value to `writer`.
    fn encode(&self, writer: &mut BitWriter);
}

impl BitEncode for bool {
    fn bit_size(&self) -> usize {
        1
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_bits(u32::from(*self), 1);
    }
}

impl<T: BitEncode> BitEncode for [T] {
    fn bit_size(&self) -> usize {
        self.iter().map(BitEncode::bit_size).sum()
    }

    fn encode(&self, writer: &mut BitWriter) {
        for item in self {
            item.encode(writer);
        }
    }
}
