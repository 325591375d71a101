//! Per-series set of field stores

use super::buffer::Page;
use super::field_store::{FieldStore, EMPTY_FIELD_STORE_SIZE};
use crate::{FieldId, FieldType, Result, SeriesId};
use parking_lot::Mutex;

/// Approximate heap cost of an empty series store
pub const EMPTY_SERIES_STORE_SIZE: usize = std::mem::size_of::<SeriesStore>();

/// Outcome of one field write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWrite {
    /// Bytes newly consumed by the write
    pub written: usize,
    /// Whether the field store was created by this write
    pub created: bool,
}

/// Field stores of one series, ordered by field id
#[derive(Debug)]
pub struct SeriesStore {
    series_id: SeriesId,
    fields: Mutex<Vec<FieldStore>>,
}

impl SeriesStore {
    /// Create an empty series store
    pub fn new(series_id: SeriesId) -> Self {
        Self {
            series_id,
            fields: Mutex::new(Vec::new()),
        }
    }

    /// Series id
    pub fn series_id(&self) -> SeriesId {
        self.series_id
    }

    /// Number of field stores
    pub fn field_count(&self) -> usize {
        self.fields.lock().len()
    }

    /// Check if a field store exists
    pub fn has_field(&self, field_id: FieldId) -> bool {
        let fields = self.fields.lock();
        get_fstore(&fields, field_id).is_some()
    }

    /// Write one value, creating the field store on first use.
    ///
    /// `alloc` supplies the page of a missing field store and the pages of
    /// generations frozen by the write. Lookup and insert happen under the
    /// same lock, so a field is never created twice.
    pub fn write<F>(
        &self,
        field_id: FieldId,
        field_type: FieldType,
        slot: u16,
        value: f64,
        mut alloc: F,
    ) -> Result<FieldWrite>
    where
        F: FnMut() -> Result<Page>,
    {
        let mut fields = self.fields.lock();
        let mut outcome = FieldWrite {
            written: 0,
            created: false,
        };

        let idx = match fields.binary_search_by_key(&field_id, FieldStore::field_id) {
            Ok(idx) => idx,
            Err(_) => {
                let page = alloc()?;
                outcome.written += page.len();
                let (idx, size) = insert_fstore(&mut fields, FieldStore::new(page, field_id, field_type));
                outcome.written += size;
                outcome.created = true;
                idx
            }
        };

        outcome.written += fields[idx].write(field_type, slot, value, &mut alloc)?;
        Ok(outcome)
    }

    /// TSD block of one field
    pub fn load_field(&self, field_id: FieldId) -> Result<Option<Vec<u8>>> {
        let fields = self.fields.lock();
        match get_fstore(&fields, field_id) {
            Some(fstore) => fstore.load(),
            None => Ok(None),
        }
    }

    /// Visit the TSD block of every field with data, ascending by field id
    pub fn for_each_field<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(FieldId, &[u8]) -> Result<()>,
    {
        let fields = self.fields.lock();
        for fstore in fields.iter() {
            if let Some(block) = fstore.load()? {
                visit(fstore.field_id(), &block)?;
            }
        }
        Ok(())
    }
}

fn get_fstore(fields: &[FieldStore], field_id: FieldId) -> Option<&FieldStore> {
    fields
        .binary_search_by_key(&field_id, FieldStore::field_id)
        .ok()
        .map(|idx| &fields[idx])
}

/// Insert keeping field id order; returns the position and the bytes it cost
fn insert_fstore(fields: &mut Vec<FieldStore>, fstore: FieldStore) -> (usize, usize) {
    let idx = match fields.binary_search_by_key(&fstore.field_id(), FieldStore::field_id) {
        Ok(idx) | Err(idx) => idx,
    };
    debug_assert!(
        fields.get(idx).map(|f| f.field_id()) != Some(fstore.field_id()),
        "field store inserted twice"
    );
    fields.insert(idx, fstore);
    (idx, EMPTY_FIELD_STORE_SIZE)
}
