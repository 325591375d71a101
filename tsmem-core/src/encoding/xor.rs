//! XOR-delta value compression
//!
//! The first value is written verbatim. Every later value is XORed with its
//! predecessor:
//! - `0`: identical value
//! - `10` + meaningful bits: XOR fits the previous leading/trailing window
//! - `11` + 6 bits leading zeros + 6 bits (significant bits - 1) + significant bits

use super::bitstream::{BitReader, BitWriter};

/// XOR encoder state; bits go to a caller-owned writer
#[derive(Debug)]
pub struct XorEncoder {
    first: bool,
    prev_value: u64,
    leading: u32,
    trailing: u32,
}

impl XorEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            first: true,
            prev_value: 0,
            leading: u32::MAX,
            trailing: 0,
        }
    }

    /// Encode one value
    pub fn write(&mut self, writer: &mut BitWriter, value: u64) {
        if self.first {
            self.first = false;
            self.prev_value = value;
            writer.write_bits(value, 64);
            return;
        }

        let xor = value ^ self.prev_value;
        self.prev_value = value;

        if xor == 0 {
            writer.write_bit(false);
            return;
        }
        writer.write_bit(true);

        let leading = xor.leading_zeros();
        let trailing = xor.trailing_zeros();

        if self.leading != u32::MAX && leading >= self.leading && trailing >= self.trailing {
            writer.write_bit(false);
            let meaningful = 64 - self.leading - self.trailing;
            writer.write_bits(xor >> self.trailing, meaningful as usize);
        } else {
            writer.write_bit(true);
            let significant = 64 - leading - trailing;
            writer.write_bits(leading as u64, 6);
            writer.write_bits((significant - 1) as u64, 6);
            writer.write_bits(xor >> trailing, significant as usize);

            self.leading = leading;
            self.trailing = trailing;
        }
    }

    /// Forget all previous values
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for XorEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// XOR decoder state; bits come from a caller-owned reader
#[derive(Debug)]
pub struct XorDecoder {
    first: bool,
    prev_value: u64,
    leading: u32,
    trailing: u32,
}

impl XorDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self {
            first: true,
            prev_value: 0,
            leading: u32::MAX,
            trailing: 0,
        }
    }

    /// Decode the next value, `None` once the stream is exhausted or malformed
    pub fn next(&mut self, reader: &mut BitReader) -> Option<u64> {
        if self.first {
            let value = reader.read_bits(64)?;
            self.first = false;
            self.prev_value = value;
            return Some(value);
        }

        if !reader.read_bit()? {
            return Some(self.prev_value);
        }

        let (leading, significant) = if !reader.read_bit()? {
            // reuse window
            if self.leading == u32::MAX {
                return None;
            }
            (self.leading, 64 - self.leading - self.trailing)
        } else {
            let leading = reader.read_bits(6)? as u32;
            let significant = reader.read_bits(6)? as u32 + 1;
            if leading + significant > 64 {
                return None;
            }
            self.leading = leading;
            self.trailing = 64 - leading - significant;
            (leading, significant)
        };

        let trailing = 64 - leading - significant;
        let bits = reader.read_bits(significant as usize)?;
        self.prev_value ^= bits << trailing;
        Some(self.prev_value)
    }

    /// Forget all previous values
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for XorDecoder {
    fn default() -> Self {
        Self::new()
    }
}
