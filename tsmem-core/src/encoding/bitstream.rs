//! Bit-level I/O for the TSD codec
//!
//! Bits are packed most-significant first; the final partial byte is
//! zero-padded.

/// Bit writer for encoding compressed data
#[derive(Debug, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    pending: u8,
    filled: u8,
}

impl BitWriter {
    /// Create a new BitWriter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with capacity hint
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Write a single bit
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u64, 1);
    }

    /// Write the low `num_bits` bits of `value`, high bit first
    pub fn write_bits(&mut self, value: u64, num_bits: usize) {
        debug_assert!(num_bits <= 64);

        let mut remaining = num_bits;
        while remaining > 0 {
            let free = 8 - self.filled as usize;
            let take = free.min(remaining);
            remaining -= take;

            let chunk = ((value >> remaining) & ((1u64 << take) - 1)) as u8;
            self.pending |= chunk << (free - take);
            self.filled += take as u8;
            if self.filled == 8 {
                self.buffer.push(self.pending);
                self.pending = 0;
                self.filled = 0;
            }
        }
    }

    /// Pad the pending partial byte with zeros and move it into the buffer
    pub fn flush(&mut self) {
        if self.filled > 0 {
            self.buffer.push(self.pending);
            self.pending = 0;
            self.filled = 0;
        }
    }

    /// Bytes written so far, excluding an unflushed partial byte
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Clear all written bits, keeping the allocation
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = 0;
        self.filled = 0;
    }

    /// Get current size in bytes
    pub fn len(&self) -> usize {
        self.buffer.len() + usize::from(self.filled > 0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.filled == 0
    }
}

/// Bit reader over an owned, reusable buffer
#[derive(Debug, Default)]
pub struct BitReader {
    data: Vec<u8>,
    /// Read cursor in bits
    cursor: usize,
}

impl BitReader {
    /// Create a reader over a copy of `data`
    pub fn new(data: &[u8]) -> Self {
        let mut reader = Self::default();
        reader.reset(data, 0);
        reader
    }

    /// Replace the underlying data and start reading at byte `offset`
    pub fn reset(&mut self, data: &[u8], offset: usize) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.rewind(offset);
    }

    /// Restart reading at byte `offset` of the current data
    pub fn rewind(&mut self, offset: usize) {
        self.cursor = offset * 8;
    }

    /// Read a single bit
    #[inline]
    pub fn read_bit(&mut self) -> Option<bool> {
        self.read_bits(1).map(|bit| bit == 1)
    }

    /// Read `num_bits` bits, high bit first.
    /// `None` leaves the cursor untouched when fewer bits remain.
    pub fn read_bits(&mut self, num_bits: usize) -> Option<u64> {
        debug_assert!(num_bits <= 64);
        if self.cursor + num_bits > self.data.len() * 8 {
            return None;
        }

        let mut value = 0u64;
        let mut remaining = num_bits;
        while remaining > 0 {
            let avail = 8 - self.cursor % 8;
            let take = avail.min(remaining);
            let mask = ((1u16 << take) - 1) as u8;
            let chunk = (self.data[self.cursor / 8] >> (avail - take)) & mask;

            value = (value << take) | chunk as u64;
            self.cursor += take;
            remaining -= take;
        }
        Some(value)
    }

    /// Check if there are more bits to read
    pub fn has_more(&self) -> bool {
        self.cursor < self.data.len() * 8
    }

    /// Get the current position in bits
    pub fn position(&self) -> usize {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_writer_reader() {
        let mut writer = BitWriter::new();

        writer.write_bit(true);
        writer.write_bit(false);
        writer.write_bit(true);
        writer.write_bits(0b1010_1010, 8);
        writer.write_bits(0xFF, 8);
        writer.flush();

        let mut reader = BitReader::new(writer.as_bytes());
        assert_eq!(reader.read_bit(), Some(true));
        assert_eq!(reader.read_bit(), Some(false));
        assert_eq!(reader.read_bit(), Some(true));
        assert_eq!(reader.read_bits(8), Some(0b1010_1010));
        assert_eq!(reader.read_bits(8), Some(0xFF));
        // five padding bits, then nothing
        assert_eq!(reader.read_bits(5), Some(0));
        assert_eq!(reader.read_bit(), None);
    }

    #[test]
    fn test_flush_pads_msb_first() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        assert_eq!(writer.len(), 1);
        assert!(writer.as_bytes().is_empty());

        writer.flush();
        assert_eq!(writer.as_bytes(), &[0b1010_0000]);

        // flushing an aligned writer adds nothing
        writer.flush();
        assert_eq!(writer.as_bytes().len(), 1);
    }

    #[test]
    fn test_reset_reuses_buffers() {
        let mut writer = BitWriter::with_capacity(16);
        writer.write_bits(0xABCD, 16);
        writer.reset();
        assert!(writer.is_empty());

        writer.write_bits(0x1, 8);
        writer.flush();

        let mut reader = BitReader::new(&[0xFF, 0x00]);
        assert_eq!(reader.read_bits(8), Some(0xFF));
        reader.reset(writer.as_bytes(), 0);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_bits(8), Some(0x1));
        assert!(!reader.has_more());

        reader.rewind(0);
        assert_eq!(reader.read_bits(8), Some(0x1));
    }

    #[test]
    fn test_values_straddling_bytes() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b11, 2);
        writer.write_bits(u64::MAX, 64);
        writer.write_bits(0x5, 3);
        writer.write_bits(0xDEADBEEF, 32);
        writer.flush();
        assert_eq!(writer.len(), 13);

        let mut reader = BitReader::new(writer.as_bytes());
        assert_eq!(reader.read_bits(2), Some(0b11));
        assert_eq!(reader.read_bits(64), Some(u64::MAX));
        assert_eq!(reader.read_bits(3), Some(0x5));
        assert_eq!(reader.read_bits(32), Some(0xDEADBEEF));
        assert_eq!(reader.position(), 101);

        // not enough bits left: nothing consumed
        assert_eq!(reader.read_bits(8), None);
        assert_eq!(reader.position(), 101);
        assert_eq!(reader.read_bits(3), Some(0));
    }
}
