//! Time-series delta (TSD) blocks
//!
//! Layout: `[start slot u16 LE][end slot u16 LE][bitstream]`. The bitstream
//! holds one presence bit per slot in `[start, end]`; a set bit is directly
//! followed by the XOR-encoded value of that slot.

use super::bitstream::{BitReader, BitWriter};
use super::xor::{XorDecoder, XorEncoder};
use crate::{MemDbError, Result};
use bytes::{BufMut, BytesMut};

/// Size of the start/end slot header
pub const TSD_HEADER_SIZE: usize = 4;

/// Encodes one field's per-slot values into a TSD block
#[derive(Debug)]
pub struct TsdEncoder {
    start_time: u16,
    writer: BitWriter,
    values: XorEncoder,
    count: u32,
    pending_values: u32,
    err: Option<String>,
}

impl TsdEncoder {
    /// Create an encoder whose first appended slot is `start_time`
    pub fn new(start_time: u16) -> Self {
        Self {
            start_time,
            writer: BitWriter::with_capacity(64),
            values: XorEncoder::new(),
            count: 0,
            pending_values: 0,
            err: None,
        }
    }

    /// Append the presence bit of the next slot
    pub fn append_time(&mut self, present: bool) {
        if self.err.is_some() {
            return;
        }
        if self.start_time as u32 + self.count > u16::MAX as u32 {
            self.err = Some(format!(
                "slot overflow: {} slots from start {}",
                self.count + 1,
                self.start_time
            ));
            return;
        }
        self.writer.write_bit(present);
        self.count += 1;
        if present {
            self.pending_values += 1;
        }
    }

    /// Append the value of the most recent present slot
    pub fn append_value(&mut self, value: u64) {
        if self.err.is_some() {
            return;
        }
        if self.pending_values == 0 {
            self.err = Some("value appended without a present slot".into());
            return;
        }
        self.pending_values -= 1;
        self.values.write(&mut self.writer, value);
    }

    /// Encoded block with slot header, `None` if no slot was appended
    pub fn bytes(&mut self) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.writer.flush();
        if self.count == 0 {
            // an empty range would decode as end < start
            return Ok(None);
        }

        let payload = self.writer.as_bytes();
        let mut buf = BytesMut::with_capacity(TSD_HEADER_SIZE + payload.len());
        buf.put_u16_le(self.start_time);
        buf.put_u16_le(self.end_time());
        buf.put_slice(payload);
        Ok(Some(buf.to_vec()))
    }

    /// Encoded bitstream without the slot header
    pub fn bytes_without_time(&mut self) -> Result<Vec<u8>> {
        self.check()?;
        self.writer.flush();
        Ok(self.writer.as_bytes().to_vec())
    }

    /// Clear all state for reuse, keeping allocations and the start slot
    pub fn reset(&mut self) {
        self.writer.reset();
        self.values.reset();
        self.count = 0;
        self.pending_values = 0;
        self.err = None;
    }

    /// Clear all state and restart at a new slot
    pub fn restart(&mut self, start_time: u16) {
        self.reset();
        self.start_time = start_time;
    }

    /// Number of slots appended
    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// Latched error, if any
    pub fn error(&self) -> Option<MemDbError> {
        self.err.clone().map(MemDbError::Encode)
    }

    fn check(&self) -> Result<()> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn end_time(&self) -> u16 {
        (self.start_time as u32 + self.count - 1) as u16
    }
}

/// Decodes a TSD block slot by slot.
///
/// `next` advances the slot cursor; `has_value` reads that slot's presence
/// bit and, when set, `value` must be called once before the next advance.
#[derive(Debug, Default)]
pub struct TsdDecoder {
    start_time: u16,
    end_time: u16,
    reader: BitReader,
    values: XorDecoder,
    idx: u32,
    ready: bool,
    err: Option<String>,
}

impl TsdDecoder {
    /// Create a decoder over a block with slot header
    pub fn new(data: &[u8]) -> Self {
        let mut decoder = Self::default();
        decoder.reset(data);
        decoder
    }

    /// Reuse the decoder for a block with slot header
    pub fn reset(&mut self, data: &[u8]) {
        if data.len() <= TSD_HEADER_SIZE {
            self.ready = false;
            self.err = Some(format!("tsd block too short: {} bytes", data.len()));
            return;
        }
        self.start_time = u16::from_le_bytes([data[0], data[1]]);
        self.end_time = u16::from_le_bytes([data[2], data[3]]);
        self.reader.reset(data, TSD_HEADER_SIZE);
        self.restart();
    }

    /// Reuse the decoder for a header-less bitstream with a known range
    pub fn reset_with_time_range(&mut self, data: &[u8], start: u16, end: u16) {
        self.start_time = start;
        self.end_time = end;
        self.reader.reset(data, 0);
        self.restart();
    }

    fn restart(&mut self) {
        self.values.reset();
        self.idx = 0;
        self.ready = true;
        self.err = None;
    }

    /// First slot of the block
    pub fn start_time(&self) -> u16 {
        self.start_time
    }

    /// Last slot of the block
    pub fn end_time(&self) -> u16 {
        self.end_time
    }

    /// Slot the cursor is positioned at
    pub fn slot(&self) -> u16 {
        (self.start_time as u32 + self.idx).saturating_sub(1) as u16
    }

    /// Advance to the next slot, false once past the end slot
    pub fn next(&mut self) -> bool {
        if !self.ready {
            return false;
        }
        if self.start_time as u32 + self.idx <= self.end_time as u32 {
            self.idx += 1;
            return true;
        }
        false
    }

    /// Read the presence bit of the current slot
    pub fn has_value(&mut self) -> bool {
        if !self.ready {
            return false;
        }
        match self.reader.read_bit() {
            Some(bit) => bit,
            None => {
                self.err = Some("tsd block ended before its end slot".into());
                false
            }
        }
    }

    /// Advance to `slot` and read its presence bit.
    ///
    /// Only the next sequential slot is accepted; anything else returns false
    /// without touching the cursor.
    pub fn has_value_with_slot(&mut self, slot: u16) -> bool {
        if !self.ready || slot < self.start_time || slot > self.end_time {
            return false;
        }
        if slot as u32 == self.start_time as u32 + self.idx {
            self.idx += 1;
            return self.has_value();
        }
        false
    }

    /// Next value in the stream, 0 once exhausted
    pub fn value(&mut self) -> u64 {
        if !self.ready {
            return 0;
        }
        self.values.next(&mut self.reader).unwrap_or(0)
    }

    /// Latched decode error, if any
    pub fn error(&self) -> Option<MemDbError> {
        self.err.clone().map(MemDbError::Decode)
    }

    /// Drain the remaining slots into `(slot, value)` pairs
    pub fn collect_values(&mut self) -> Result<Vec<(u16, u64)>> {
        if let Some(err) = self.error() {
            return Err(err);
        }
        let mut points = Vec::new();
        while self.next() {
            if self.has_value() {
                points.push((self.slot(), self.value()));
            }
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(points),
        }
    }
}

/// Read the start/end slots of a block without building a decoder
pub fn decode_tsd_time(data: &[u8]) -> Result<(u16, u16)> {
    if data.len() < TSD_HEADER_SIZE {
        return Err(MemDbError::Decode(format!(
            "tsd header needs {} bytes, got {}",
            TSD_HEADER_SIZE,
            data.len()
        )));
    }
    Ok((
        u16::from_le_bytes([data[0], data[1]]),
        u16::from_le_bytes([data[2], data[3]]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn encode(start: u16, slots: &[Option<f64>]) -> Option<Vec<u8>> {
        let mut encoder = TsdEncoder::new(start);
        for slot in slots {
            match slot {
                Some(v) => {
                    encoder.append_time(true);
                    encoder.append_value(v.to_bits());
                }
                None => encoder.append_time(false),
            }
        }
        encoder.bytes().unwrap()
    }

    #[test]
    fn test_header_and_lockstep_decode() {
        let data = encode(10, &[Some(42.0), None, Some(43.0)]).unwrap();
        assert_eq!(&data[0..4], &[10, 0, 12, 0]);
        assert_eq!(decode_tsd_time(&data).unwrap(), (10, 12));

        let mut decoder = TsdDecoder::new(&data);
        assert_eq!(decoder.start_time(), 10);
        assert_eq!(decoder.end_time(), 12);

        assert!(decoder.next());
        assert!(decoder.has_value());
        assert_eq!(decoder.slot(), 10);
        assert_eq!(f64::from_bits(decoder.value()), 42.0);

        assert!(decoder.next());
        assert!(!decoder.has_value());

        assert!(decoder.next());
        assert!(decoder.has_value());
        assert_eq!(decoder.slot(), 12);
        assert_eq!(f64::from_bits(decoder.value()), 43.0);

        assert!(!decoder.next());
        assert!(decoder.error().is_none());
    }

    #[test]
    fn test_exhausted_value_stream_yields_zero() {
        let data = encode(0, &[None]).unwrap();
        assert_eq!(data.len(), TSD_HEADER_SIZE + 1);

        let mut decoder = TsdDecoder::new(&data);
        assert!(decoder.next());
        assert!(!decoder.has_value());
        assert_eq!(decoder.value(), 0);
    }

    #[test]
    fn test_empty_block_is_none() {
        let mut encoder = TsdEncoder::new(5);
        assert!(encoder.bytes().unwrap().is_none());
        assert!(encoder.bytes_without_time().unwrap().is_empty());
    }

    #[test]
    fn test_end_time_is_start_plus_count_minus_one() {
        let slots = vec![None, Some(1.0), None, None, Some(2.0), None];
        let data = encode(100, &slots).unwrap();
        let decoder = TsdDecoder::new(&data);
        assert_eq!(decoder.end_time(), 100 + slots.len() as u16 - 1);
    }

    #[test]
    fn test_random_roundtrip() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let start: u16 = rng.gen_range(0..1000);
            let len: usize = rng.gen_range(1..300);
            let slots: Vec<Option<f64>> = (0..len)
                .map(|_| {
                    if rng.gen_bool(0.6) {
                        Some(rng.gen_range(-1000.0..1000.0))
                    } else {
                        None
                    }
                })
                .collect();

            let data = encode(start, &slots).unwrap();
            let mut decoder = TsdDecoder::new(&data);
            let mut decoded = Vec::new();
            while decoder.next() {
                if decoder.has_value() {
                    decoded.push(Some(f64::from_bits(decoder.value())));
                } else {
                    decoded.push(None);
                }
            }
            assert!(decoder.error().is_none());
            assert_eq!(decoded, slots);
        }
    }

    #[test]
    fn test_short_block_rejected() {
        for len in 0..=TSD_HEADER_SIZE {
            let data = vec![1u8; len];
            let mut decoder = TsdDecoder::new(&data);
            assert!(decoder.error().unwrap().is_corruption());
            assert!(!decoder.next());
            assert!(!decoder.has_value());
            assert!(!decoder.has_value_with_slot(1));
            assert_eq!(decoder.value(), 0);
        }

        // a valid reset clears the latched error
        let data = encode(3, &[Some(7.0)]).unwrap();
        let mut decoder = TsdDecoder::new(&[0u8; 2]);
        decoder.reset(&data);
        assert!(decoder.error().is_none());
        assert_eq!(decoder.collect_values().unwrap(), vec![(3, 7.0f64.to_bits())]);
    }

    #[test]
    fn test_has_value_with_slot() {
        let data = encode(10, &[Some(1.0), None, Some(3.0)]).unwrap();
        let mut decoder = TsdDecoder::new(&data);

        assert!(!decoder.has_value_with_slot(9));
        // out of sequence: cursor stays at slot 10
        assert!(!decoder.has_value_with_slot(11));
        assert!(decoder.has_value_with_slot(10));
        assert_eq!(f64::from_bits(decoder.value()), 1.0);
        assert!(!decoder.has_value_with_slot(11));
        assert!(decoder.has_value_with_slot(12));
        assert_eq!(f64::from_bits(decoder.value()), 3.0);
        assert!(!decoder.has_value_with_slot(13));
    }

    #[test]
    fn test_without_time_and_external_range() {
        let mut encoder = TsdEncoder::new(20);
        encoder.append_time(false);
        encoder.append_time(true);
        encoder.append_value(9.5f64.to_bits());
        let payload = encoder.bytes_without_time().unwrap();

        let mut decoder = TsdDecoder::default();
        decoder.reset_with_time_range(&payload, 20, 21);
        assert_eq!(decoder.collect_values().unwrap(), vec![(21, 9.5f64.to_bits())]);
    }

    #[test]
    fn test_sticky_encode_error() {
        let mut encoder = TsdEncoder::new(0);
        encoder.append_value(1);
        encoder.append_time(true);
        assert_eq!(encoder.count(), 0);
        assert!(matches!(encoder.bytes(), Err(MemDbError::Encode(_))));

        encoder.reset();
        encoder.append_time(true);
        encoder.append_value(1);
        assert!(encoder.bytes().unwrap().is_some());

        let mut encoder = TsdEncoder::new(u16::MAX);
        encoder.append_time(false);
        encoder.append_time(false);
        assert_eq!(encoder.count(), 1);
        assert!(encoder.bytes().is_err());
    }

    #[test]
    fn test_restart_moves_start() {
        let mut encoder = TsdEncoder::new(1);
        encoder.append_time(true);
        encoder.append_value(5);
        encoder.restart(40);
        encoder.append_time(true);
        encoder.append_value(6);
        let data = encoder.bytes().unwrap().unwrap();
        assert_eq!(decode_tsd_time(&data).unwrap(), (40, 40));
    }

    #[test]
    fn test_truncated_block_latches_error() {
        let data = encode(0, &[Some(1.0), Some(2.0), Some(3.0)]).unwrap();
        let mut decoder = TsdDecoder::new(&data[..5]);
        assert!(decoder.collect_values().is_err());
    }
}
