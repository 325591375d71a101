//! Per (series, field) value store
//!
//! A field store keeps a window of slots uncompressed in its page:
//!
//! ```text
//! [start u16][end u16][reserved u32][presence u64][value f64; capacity]
//! ```
//!
//! A write outside the window freezes the page into a TSD block (a
//! generation) copied into freshly allocated pages, and restarts the window
//! at the new slot. Loading merges all generations and the live window,
//! oldest first.

use super::buffer::Page;
use crate::encoding::{global_decoder_pool, TsdEncoder};
use crate::{FieldId, FieldType, Result, SlotRange};
use std::collections::BTreeMap;

/// Bytes before the first value in a page
pub const PAGE_HEADER_SIZE: usize = 16;

/// Bytes per stored value
pub const VALUE_SIZE: usize = 8;

/// Widest window the presence word can describe
pub const MAX_WINDOW_SLOTS: usize = 64;

/// Smallest page able to hold one slot
pub const MIN_PAGE_SIZE: usize = PAGE_HEADER_SIZE + VALUE_SIZE;

/// Approximate heap cost of an empty field store
pub const EMPTY_FIELD_STORE_SIZE: usize = std::mem::size_of::<FieldStore>();

const START_OFFSET: usize = 0;
const END_OFFSET: usize = 2;
const PRESENCE_OFFSET: usize = 8;

/// Slots a page of `page_size` bytes holds
pub fn window_slots(page_size: usize) -> usize {
    (page_size.saturating_sub(PAGE_HEADER_SIZE) / VALUE_SIZE).min(MAX_WINDOW_SLOTS)
}

/// Page allocation callback threaded through the write path
pub type PageAlloc<'a> = dyn FnMut() -> Result<Page> + 'a;

/// One frozen TSD block spread over buffer pages
#[derive(Debug)]
struct Generation {
    pages: Vec<Page>,
    len: usize,
}

impl Generation {
    fn store(block: &[u8], alloc: &mut PageAlloc<'_>) -> Result<Self> {
        let mut pages = Vec::new();
        let mut copied = 0;
        while copied < block.len() {
            let mut page = alloc()?;
            let n = (block.len() - copied).min(page.len());
            page[..n].copy_from_slice(&block[copied..copied + n]);
            copied += n;
            pages.push(page);
        }
        Ok(Self {
            pages,
            len: block.len(),
        })
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for page in &self.pages {
            let n = (self.len - out.len()).min(page.len());
            out.extend_from_slice(&page[..n]);
        }
        out
    }

    /// Bytes of buffer pages held
    fn footprint(&self) -> usize {
        self.pages.iter().map(|p| p.len()).sum()
    }
}

/// Compressed storage of one field of one series
#[derive(Debug)]
pub struct FieldStore {
    field_id: FieldId,
    field_type: FieldType,
    page: Page,
    capacity: usize,
    generations: Vec<Generation>,
}

impl FieldStore {
    /// Create a field store over a freshly allocated page
    pub fn new(mut page: Page, field_id: FieldId, field_type: FieldType) -> Self {
        page.fill(0);
        let capacity = window_slots(page.len());
        debug_assert!(capacity > 0, "page too small for a field store");
        Self {
            field_id,
            field_type,
            page,
            capacity,
            generations: Vec::new(),
        }
    }

    /// Field id
    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    /// Field type the store was created with
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Number of frozen generations
    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    /// Write a value, merging with an existing value of the same slot.
    /// Returns the number of newly consumed bytes.
    ///
    /// A write outside the window takes pages from `alloc` for the frozen
    /// generation; if that fails the store is left unchanged.
    pub fn write(
        &mut self,
        field_type: FieldType,
        slot: u16,
        value: f64,
        alloc: &mut PageAlloc<'_>,
    ) -> Result<usize> {
        let presence = self.presence();
        if presence == 0 {
            self.start_window(slot, value);
            return Ok(VALUE_SIZE);
        }

        let start = self.read_u16(START_OFFSET);
        if slot < start || (slot - start) as usize >= self.capacity {
            let frozen = self.freeze(alloc)?;
            self.start_window(slot, value);
            return Ok(frozen + VALUE_SIZE);
        }

        let idx = (slot - start) as usize;
        if presence & (1 << idx) != 0 {
            let merged = field_type.merge(self.value_at(idx), value);
            self.set_value(idx, merged);
            return Ok(0);
        }

        self.set_value(idx, value);
        self.write_u64(PRESENCE_OFFSET, presence | (1 << idx));
        if slot > self.read_u16(END_OFFSET) {
            self.write_u16(END_OFFSET, slot);
        }
        Ok(VALUE_SIZE)
    }

    /// Slot range of the live window, if it holds any value
    pub fn window(&self) -> Option<SlotRange> {
        if self.presence() == 0 {
            return None;
        }
        Some(SlotRange::new(
            self.read_u16(START_OFFSET),
            self.read_u16(END_OFFSET),
        ))
    }

    /// All data of this field as one TSD block, `None` if nothing was written
    pub fn load(&self) -> Result<Option<Vec<u8>>> {
        if self.generations.is_empty() {
            return self.encode_window();
        }

        let mut merged = BTreeMap::new();
        {
            let mut decoder = global_decoder_pool().get();
            for generation in &self.generations {
                decoder.reset(&generation.bytes());
                for (slot, bits) in decoder.collect_values()? {
                    merge_into(&mut merged, self.field_type, slot, f64::from_bits(bits));
                }
            }
        }
        self.for_each_window_value(|slot, value| {
            merge_into(&mut merged, self.field_type, slot, value);
        });
        encode_slots(&merged)
    }

    fn freeze(&mut self, alloc: &mut PageAlloc<'_>) -> Result<usize> {
        let size = match self.encode_window()? {
            Some(block) => {
                let generation = Generation::store(&block, alloc)?;
                let size = generation.footprint();
                self.generations.push(generation);
                size
            }
            None => 0,
        };
        self.page[..PAGE_HEADER_SIZE].fill(0);
        Ok(size)
    }

    fn start_window(&mut self, slot: u16, value: f64) {
        self.write_u16(START_OFFSET, slot);
        self.write_u16(END_OFFSET, slot);
        self.write_u64(PRESENCE_OFFSET, 1);
        self.set_value(0, value);
    }

    fn encode_window(&self) -> Result<Option<Vec<u8>>> {
        let presence = self.presence();
        if presence == 0 {
            return Ok(None);
        }
        let start = self.read_u16(START_OFFSET);
        let end = self.read_u16(END_OFFSET);

        let mut encoder = TsdEncoder::new(start);
        for idx in 0..=(end - start) as usize {
            if presence & (1 << idx) != 0 {
                encoder.append_time(true);
                encoder.append_value(self.value_at(idx).to_bits());
            } else {
                encoder.append_time(false);
            }
        }
        encoder.bytes()
    }

    fn for_each_window_value(&self, mut f: impl FnMut(u16, f64)) {
        let presence = self.presence();
        if presence == 0 {
            return;
        }
        let start = self.read_u16(START_OFFSET);
        let end = self.read_u16(END_OFFSET);
        for idx in 0..=(end - start) as usize {
            if presence & (1 << idx) != 0 {
                f(start + idx as u16, self.value_at(idx));
            }
        }
    }

    fn presence(&self) -> u64 {
        self.read_u64(PRESENCE_OFFSET)
    }

    fn value_at(&self, idx: usize) -> f64 {
        f64::from_bits(self.read_u64(PAGE_HEADER_SIZE + idx * VALUE_SIZE))
    }

    fn set_value(&mut self, idx: usize, value: f64) {
        self.write_u64(PAGE_HEADER_SIZE + idx * VALUE_SIZE, value.to_bits());
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.page[offset], self.page[offset + 1]])
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.page[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.page[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        self.page[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

fn merge_into(merged: &mut BTreeMap<u16, f64>, field_type: FieldType, slot: u16, value: f64) {
    merged
        .entry(slot)
        .and_modify(|existing| *existing = field_type.merge(*existing, value))
        .or_insert(value);
}

/// Encode sorted `(slot, value)` pairs as one TSD block
pub(crate) fn encode_slots(values: &BTreeMap<u16, f64>) -> Result<Option<Vec<u8>>> {
    let (first, last) = match (values.keys().next(), values.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(None),
    };

    let mut encoder = TsdEncoder::new(first);
    let mut iter = values.iter().peekable();
    for slot in first..=last {
        match iter.peek() {
            Some((s, v)) if **s == slot => {
                encoder.append_time(true);
                encoder.append_value(v.to_bits());
                iter.next();
            }
            _ => encoder.append_time(false),
        }
    }
    encoder.bytes()
}
