//! Per-metric store: series map plus metric-level metadata

use super::series_store::{SeriesStore, EMPTY_SERIES_STORE_SIZE};
use crate::filter::{FieldData, FilterResultSet, SeriesData};
use crate::flush::Flusher;
use crate::{FieldMeta, MetricId, Result, SeriesId, SlotRange, Timestamp};
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Approximate heap cost of an empty metric store
pub const EMPTY_METRIC_STORE_SIZE: usize = std::mem::size_of::<MetricStore>();

/// Per-metric flush parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushContext {
    pub metric_id: MetricId,
    /// Slots of the metric that carry data
    pub slot_range: SlotRange,
}

/// All series of one metric seen in this memory window
#[derive(Debug, Default)]
pub struct MetricStore {
    series: RwLock<BTreeMap<SeriesId, Arc<SeriesStore>>>,
    fields: RwLock<Vec<FieldMeta>>,
    slots: RwLock<RoaringBitmap>,
}

impl MetricStore {
    /// Create an empty metric store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the series store, creating it if missing.
    /// Returns the bytes consumed by creation, zero when it existed.
    pub fn get_or_create_tstore(&self, series_id: SeriesId) -> (Arc<SeriesStore>, usize) {
        if let Some(tstore) = self.series.read().get(&series_id) {
            return (Arc::clone(tstore), 0);
        }

        let mut series = self.series.write();
        match series.entry(series_id) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), 0),
            Entry::Vacant(entry) => {
                let tstore = Arc::new(SeriesStore::new(series_id));
                entry.insert(Arc::clone(&tstore));
                (tstore, EMPTY_SERIES_STORE_SIZE)
            }
        }
    }

    /// Get an existing series store
    pub fn get_tstore(&self, series_id: SeriesId) -> Option<Arc<SeriesStore>> {
        self.series.read().get(&series_id).cloned()
    }

    /// Number of series
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Ids of all series
    pub fn series_ids(&self) -> RoaringBitmap {
        self.series.read().keys().copied().collect()
    }

    /// Record a field as known for this metric
    pub fn add_field(&self, meta: FieldMeta) {
        if self.has_field(&meta) {
            return;
        }
        let mut fields = self.fields.write();
        if let Err(idx) = fields.binary_search_by_key(&meta.id, |f| f.id) {
            fields.insert(idx, meta);
        }
    }

    fn has_field(&self, meta: &FieldMeta) -> bool {
        self.fields
            .read()
            .binary_search_by_key(&meta.id, |f| f.id)
            .is_ok()
    }

    /// Known fields ordered by id
    pub fn fields(&self) -> Vec<FieldMeta> {
        self.fields.read().clone()
    }

    /// Mark a slot as carrying data
    pub fn set_slot(&self, slot: u16) {
        let slot = slot as u32;
        if self.slots.read().contains(slot) {
            return;
        }
        self.slots.write().insert(slot);
    }

    /// Check if any series wrote to a slot
    pub fn has_slot(&self, slot: u16) -> bool {
        self.slots.read().contains(slot as u32)
    }

    /// Range of slots that carry data
    pub fn slot_range(&self) -> Option<SlotRange> {
        let slots = self.slots.read();
        match (slots.min(), slots.max()) {
            (Some(start), Some(end)) => Some(SlotRange::new(start as u16, end as u16)),
            _ => None,
        }
    }

    /// Stream every series and field to the flusher, ascending by id
    pub fn flush_metrics_data_to(&self, flusher: &mut dyn Flusher, ctx: FlushContext) -> Result<()> {
        let series: Vec<Arc<SeriesStore>> = self.series.read().values().cloned().collect();
        let fields = self.fields();

        flusher.prepare_metric(ctx.metric_id, &fields)?;
        for tstore in &series {
            let mut has_data = false;
            tstore.for_each_field(|field_id, block| {
                has_data = true;
                flusher.flush_field(field_id, block)
            })?;
            if has_data {
                flusher.flush_series(tstore.series_id())?;
            }
        }
        flusher.commit_metric(ctx.slot_range)?;

        debug!(
            metric_id = ctx.metric_id,
            series = series.len(),
            fields = fields.len(),
            "flushed metric"
        );
        Ok(())
    }

    /// Match candidate series and fields against this metric.
    /// `Ok(None)` when no requested field is known or no candidate exists.
    pub fn filter(
        self: &Arc<Self>,
        family_time: Timestamp,
        series_ids: &RoaringBitmap,
        fields: &[FieldMeta],
    ) -> Result<Option<Vec<Box<dyn FilterResultSet>>>> {
        let matched: Vec<FieldMeta> = fields
            .iter()
            .filter(|f| self.has_field(f))
            .cloned()
            .collect();
        if matched.is_empty() {
            return Ok(None);
        }

        let hits = series_ids & &self.series_ids();
        if hits.is_empty() {
            return Ok(None);
        }

        let slot_range = match self.slot_range() {
            Some(range) => range,
            None => return Ok(None),
        };

        Ok(Some(vec![Box::new(MemFilterResultSet {
            store: Arc::clone(self),
            family_time,
            slot_range,
            series_ids: hits,
            fields: matched,
        })]))
    }
}

/// Filter result over a metric store; loads field data on demand
#[derive(Debug)]
pub struct MemFilterResultSet {
    store: Arc<MetricStore>,
    family_time: Timestamp,
    slot_range: SlotRange,
    series_ids: RoaringBitmap,
    fields: Vec<FieldMeta>,
}

impl FilterResultSet for MemFilterResultSet {
    fn identifier(&self) -> String {
        "memory".to_string()
    }

    fn family_time(&self) -> Timestamp {
        self.family_time
    }

    fn slot_range(&self) -> SlotRange {
        self.slot_range
    }

    fn series_ids(&self) -> &RoaringBitmap {
        &self.series_ids
    }

    fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    fn load(&self, series_id: SeriesId) -> Result<Option<SeriesData>> {
        if !self.series_ids.contains(series_id) {
            return Ok(None);
        }
        let tstore = match self.store.get_tstore(series_id) {
            Some(tstore) => tstore,
            None => return Ok(None),
        };

        let mut fields = Vec::with_capacity(self.fields.len());
        for meta in &self.fields {
            if let Some(block) = tstore.load_field(meta.id)? {
                fields.push(FieldData {
                    meta: meta.clone(),
                    block,
                });
            }
        }
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(SeriesData { series_id, fields }))
    }
}
