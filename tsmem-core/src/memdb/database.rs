//! Memory database - top-level write/flush/filter coordinator

use super::barrier::{WriteBarrier, WriteScope};
use super::bucket::MetricBucketStore;
use super::buffer::{DataPointBuffer, Page};
use super::metric_store::{FlushContext, MetricStore, EMPTY_METRIC_STORE_SIZE};
use super::series_store::SeriesStore;
use super::MemoryDatabaseConfig;
use crate::filter::{DataFilter, FilterResultSet};
use crate::flush::Flusher;
use crate::{
    CompoundField, FieldId, FieldMeta, FieldType, MemDbError, MetricId, MetricPayload,
    MetricPoint, Result, TimeRange, Timestamp,
};
use parking_lot::{RwLock, RwLockWriteGuard};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};

const HISTOGRAM_MIN: &str = "histogram_min";
const HISTOGRAM_MAX: &str = "histogram_max";
const HISTOGRAM_SUM: &str = "histogram_sum";
const HISTOGRAM_COUNT: &str = "histogram_count";

/// Memory database statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemDbStats {
    pub name: String,
    pub family_time: Timestamp,
    pub metric_count: usize,
    pub mem_size: usize,
    pub allocated_pages: u64,
    pub alloc_failures: u64,
    pub in_flight_writes: usize,
}

/// One expanded field of a point
struct FieldValue<'a> {
    name: Cow<'a, str>,
    field_type: FieldType,
    value: f64,
}

/// In-memory store of one family's writes
pub struct MemoryDatabase {
    family_time: Timestamp,
    family_duration: i64,
    name: String,
    stores: MetricBucketStore,
    buf: DataPointBuffer,
    barrier: WriteBarrier,
    lock: RwLock<()>,
    alloc_size: AtomicUsize,
    alloc_failures: AtomicU64,
}

impl MemoryDatabase {
    /// Create a memory database
    pub fn new(config: MemoryDatabaseConfig) -> Result<Self> {
        config.validate()?;
        let buf = DataPointBuffer::new(config.buffer.clone(), config.temp_path.as_deref())?;
        let stores = MetricBucketStore::new(config.bucket_shards)?;

        info!(
            name = %config.name,
            family_time = config.family_time,
            page_size = config.buffer.page_size,
            "created memory database"
        );

        Ok(Self {
            family_time: config.family_time,
            family_duration: config.family_duration,
            name: config.name,
            stores,
            buf,
            barrier: WriteBarrier::new(),
            lock: RwLock::new(()),
            alloc_size: AtomicUsize::new(0),
            alloc_failures: AtomicU64::new(0),
        })
    }

    /// Register a write that a following flush must wait for
    pub fn acquire_write(&self) {
        self.barrier.acquire();
    }

    /// Complete a write registered with [`acquire_write`](Self::acquire_write)
    pub fn complete_write(&self) {
        self.barrier.complete();
    }

    /// Acquire a write, completing it when the guard drops
    pub fn write_scope(&self) -> WriteScope<'_> {
        self.barrier.write_scope()
    }

    /// Write one point under the database lock
    pub fn write(&self, point: &MetricPoint) -> Result<()> {
        let _scope = self.barrier.write_scope();
        let _guard = self.lock.write();
        self.write_point(point)
    }

    /// Take the database lock for a batch of writes
    pub fn with_lock(&self) -> LockedWriter<'_> {
        let scope = self.barrier.write_scope();
        LockedWriter {
            db: self,
            _guard: self.lock.write(),
            _scope: scope,
        }
    }

    fn write_point(&self, point: &MetricPoint) -> Result<()> {
        validate_point(point)?;

        let (mstore, created) = self.stores.get_or_create(point.metric_id, MetricStore::new);
        if created {
            self.alloc_size.fetch_add(EMPTY_METRIC_STORE_SIZE, Ordering::Relaxed);
        }
        let (tstore, size) = mstore.get_or_create_tstore(point.series_id);
        self.alloc_size.fetch_add(size, Ordering::Relaxed);

        let fields = expand_payload(&point.payload);
        for (field, &field_id) in fields.iter().zip(point.field_ids.iter()) {
            self.write_field(&mstore, &tstore, field_id, field, point.slot_index)?;
        }
        Ok(())
    }

    fn write_field(
        &self,
        mstore: &MetricStore,
        tstore: &SeriesStore,
        field_id: FieldId,
        field: &FieldValue<'_>,
        slot: u16,
    ) -> Result<()> {
        let outcome = tstore.write(field_id, field.field_type, slot, field.value, || self.alloc_page())?;
        if outcome.created {
            mstore.add_field(FieldMeta::new(field_id, field.name.as_ref(), field.field_type));
        }
        mstore.set_slot(slot);
        self.alloc_size.fetch_add(outcome.written, Ordering::Relaxed);
        Ok(())
    }

    fn alloc_page(&self) -> Result<Page> {
        self.buf.alloc_page().map_err(|err| {
            self.alloc_failures.fetch_add(1, Ordering::Relaxed);
            warn!(name = %self.name, error = %err, "page allocation failed");
            err
        })
    }

    /// Wait for in-flight writes, then stream every metric to `flusher` and commit
    pub fn flush_family_to(&self, flusher: &mut dyn Flusher) -> Result<()> {
        let start = Instant::now();
        self.barrier.wait();

        let mut metrics = 0usize;
        self.stores.walk_entry(|metric_id, mstore| {
            if mstore.series_count() == 0 {
                return Ok(());
            }
            let slot_range = match mstore.slot_range() {
                Some(range) => range,
                None => return Ok(()),
            };
            mstore.flush_metrics_data_to(&mut *flusher, FlushContext { metric_id, slot_range })?;
            metrics += 1;
            Ok(())
        })?;
        flusher.commit()?;

        info!(
            name = %self.name,
            family_time = self.family_time,
            metrics,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "flushed family"
        );
        Ok(())
    }

    /// Time range covered by this family
    pub fn family_range(&self) -> TimeRange {
        TimeRange::new(
            self.family_time,
            self.family_time.saturating_add(self.family_duration - 1),
        )
    }

    /// Advisory byte total consumed by writes
    pub fn mem_size(&self) -> usize {
        self.alloc_size.load(Ordering::Relaxed)
    }

    pub fn family_time(&self) -> Timestamp {
        self.family_time
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get database statistics
    pub fn stats(&self) -> MemDbStats {
        MemDbStats {
            name: self.name.clone(),
            family_time: self.family_time,
            metric_count: self.stores.len(),
            mem_size: self.mem_size(),
            allocated_pages: self.buf.allocated_pages(),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            in_flight_writes: self.barrier.in_flight(),
        }
    }

    /// Release the paged buffer; later writes needing a page fail
    pub fn close(&self) -> Result<()> {
        self.buf.close()?;
        info!(name = %self.name, mem_size = self.mem_size(), "closed memory database");
        Ok(())
    }
}

impl DataFilter for MemoryDatabase {
    fn filter(
        &self,
        metric_id: MetricId,
        series_ids: &RoaringBitmap,
        time_range: TimeRange,
        fields: &[FieldMeta],
    ) -> Result<Option<Vec<Box<dyn FilterResultSet>>>> {
        let _guard = self.lock.read();
        if !time_range.overlaps(&self.family_range()) {
            return Ok(None);
        }
        match self.stores.get(metric_id) {
            Some(mstore) => mstore.filter(self.family_time, series_ids, fields),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("name", &self.name)
            .field("family_time", &self.family_time)
            .field("metrics", &self.stores.len())
            .field("mem_size", &self.mem_size())
            .finish()
    }
}

/// Writer holding the database lock
pub struct LockedWriter<'a> {
    db: &'a MemoryDatabase,
    _guard: RwLockWriteGuard<'a, ()>,
    _scope: WriteScope<'a>,
}

impl LockedWriter<'_> {
    /// Write one point; the lock is already held
    pub fn write_without_lock(&self, point: &MetricPoint) -> Result<()> {
        self.db.write_point(point)
    }
}

fn validate_point(point: &MetricPoint) -> Result<()> {
    let expected = point.payload.field_count();
    if point.field_ids.len() < expected {
        return Err(MemDbError::InvalidPoint(format!(
            "metric {} series {}: {} field ids for {} fields",
            point.metric_id,
            point.series_id,
            point.field_ids.len(),
            expected
        )));
    }
    if let Some(compound) = &point.payload.compound_field {
        if compound.explicit_bounds.len() != compound.values.len() {
            return Err(MemDbError::InvalidPoint(format!(
                "metric {} series {}: {} bounds for {} bucket values",
                point.metric_id,
                point.series_id,
                compound.explicit_bounds.len(),
                compound.values.len()
            )));
        }
    }
    Ok(())
}

/// Expand a payload into fields, in field id order
fn expand_payload(payload: &MetricPayload) -> Vec<FieldValue<'_>> {
    let mut fields = Vec::with_capacity(payload.field_count());
    for simple in &payload.simple_fields {
        if let Some(field_type) = simple.field_type.field_type() {
            fields.push(FieldValue {
                name: Cow::Borrowed(simple.name.as_str()),
                field_type,
                value: simple.value,
            });
        }
    }
    if let Some(compound) = &payload.compound_field {
        expand_compound(compound, &mut fields);
    }
    fields
}

fn expand_compound<'a>(compound: &'a CompoundField, fields: &mut Vec<FieldValue<'a>>) {
    // min/max <= 0 carry no information and take no field id
    if compound.min > 0.0 {
        fields.push(FieldValue {
            name: Cow::Borrowed(HISTOGRAM_MIN),
            field_type: FieldType::Min,
            value: compound.min,
        });
    }
    if compound.max > 0.0 {
        fields.push(FieldValue {
            name: Cow::Borrowed(HISTOGRAM_MAX),
            field_type: FieldType::Max,
            value: compound.max,
        });
    }
    fields.push(FieldValue {
        name: Cow::Borrowed(HISTOGRAM_SUM),
        field_type: FieldType::Sum,
        value: compound.sum,
    });
    fields.push(FieldValue {
        name: Cow::Borrowed(HISTOGRAM_COUNT),
        field_type: FieldType::Sum,
        value: compound.count,
    });
    for (bound, value) in compound.explicit_bounds.iter().zip(compound.values.iter()) {
        fields.push(FieldValue {
            name: Cow::Owned(CompoundField::bucket_name(*bound)),
            field_type: FieldType::Histogram,
            value: *value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::TsdDecoder;
    use crate::flush::MemoryFlusher;
    use crate::memdb::BufferConfig;
    use crate::{SimpleField, SimpleFieldType, SlotRange};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn new_db() -> MemoryDatabase {
        MemoryDatabase::new(MemoryDatabaseConfig {
            family_time: 1_000_000,
            ..Default::default()
        })
        .unwrap()
    }

    fn sum_point(metric_id: MetricId, series_id: u32, slot: u16, value: f64) -> MetricPoint {
        MetricPoint {
            metric_id,
            series_id,
            slot_index: slot,
            field_ids: vec![1],
            payload: MetricPayload {
                simple_fields: vec![SimpleField::new("sum", SimpleFieldType::DeltaSum, value)],
                compound_field: None,
            },
        }
    }

    fn histogram_point() -> MetricPoint {
        MetricPoint {
            metric_id: 2,
            series_id: 1,
            slot_index: 3,
            field_ids: vec![10, 11, 12, 13, 14, 15],
            payload: MetricPayload {
                simple_fields: Vec::new(),
                compound_field: Some(CompoundField {
                    min: 1.0,
                    max: 9.0,
                    sum: 20.0,
                    count: 4.0,
                    explicit_bounds: vec![1.0, 5.0],
                    values: vec![2.0, 2.0],
                }),
            },
        }
    }

    fn decode(block: &[u8]) -> Vec<(u16, f64)> {
        TsdDecoder::new(block)
            .collect_values()
            .unwrap()
            .into_iter()
            .map(|(slot, bits)| (slot, f64::from_bits(bits)))
            .collect()
    }

    #[test]
    fn test_write_two_slots_and_flush() {
        let db = new_db();
        db.write(&sum_point(1, 7, 10, 42.0)).unwrap();
        db.write(&sum_point(1, 7, 12, 43.0)).unwrap();

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();
        assert_eq!(flusher.commits(), 1);

        let metric = flusher.metric(1).unwrap();
        assert_eq!(metric.slot_range, SlotRange::new(10, 12));
        let block = metric.block(7, 1).unwrap();

        let mut decoder = TsdDecoder::new(block);
        assert_eq!(decoder.start_time(), 10);
        assert_eq!(decoder.end_time(), 12);

        assert!(decoder.next());
        assert!(decoder.has_value());
        assert_eq!(f64::from_bits(decoder.value()), 42.0);
        assert!(decoder.next());
        assert!(!decoder.has_value());
        assert!(decoder.next());
        assert!(decoder.has_value());
        assert_eq!(f64::from_bits(decoder.value()), 43.0);
        assert!(!decoder.next());
        assert!(decoder.error().is_none());
    }

    #[test]
    fn test_histogram_fields_positional() {
        let db = new_db();
        db.write(&histogram_point()).unwrap();

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();
        let metric = flusher.metric(2).unwrap();

        let fields: Vec<_> = metric
            .fields
            .iter()
            .map(|f| (f.id, f.name.as_str(), f.field_type))
            .collect();
        assert_eq!(
            fields,
            vec![
                (10, "histogram_min", FieldType::Min),
                (11, "histogram_max", FieldType::Max),
                (12, "histogram_sum", FieldType::Sum),
                (13, "histogram_count", FieldType::Sum),
                (14, "__bucket_1", FieldType::Histogram),
                (15, "__bucket_5", FieldType::Histogram),
            ]
        );

        let series = &metric.series[0];
        assert_eq!(series.fields.len(), 6);
        let values: Vec<_> = series
            .fields
            .iter()
            .map(|(id, block)| (*id, decode(block)[0].1))
            .collect();
        assert_eq!(
            values,
            vec![(10, 1.0), (11, 9.0), (12, 20.0), (13, 4.0), (14, 2.0), (15, 2.0)]
        );
    }

    #[test]
    fn test_non_positive_min_max_take_no_field_id() {
        let db = new_db();
        let mut point = histogram_point();
        point.field_ids = vec![11, 12, 13, 14, 15];
        if let Some(compound) = point.payload.compound_field.as_mut() {
            compound.min = 0.0;
        }
        db.write(&point).unwrap();

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();
        let metric = flusher.metric(2).unwrap();
        let fields: Vec<_> = metric.fields.iter().map(|f| (f.id, f.name.as_str())).collect();
        assert_eq!(
            fields,
            vec![
                (11, "histogram_max"),
                (12, "histogram_sum"),
                (13, "histogram_count"),
                (14, "__bucket_1"),
                (15, "__bucket_5"),
            ]
        );
        assert_eq!(decode(metric.block(1, 11).unwrap()), vec![(3, 9.0)]);
        assert_eq!(decode(metric.block(1, 12).unwrap()), vec![(3, 20.0)]);

        let mut point = histogram_point();
        point.field_ids = vec![20, 21, 22, 23];
        if let Some(compound) = point.payload.compound_field.as_mut() {
            compound.min = 0.0;
            compound.max = -1.0;
        }
        point.metric_id = 3;
        db.write(&point).unwrap();

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();
        let ids: Vec<_> = flusher.metric(3).unwrap().fields.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![20, 21, 22, 23]);
    }

    #[test]
    fn test_family_range_saturates() {
        let db = MemoryDatabase::new(MemoryDatabaseConfig {
            family_time: i64::MAX - 10,
            ..Default::default()
        })
        .unwrap();
        let range = db.family_range();
        assert_eq!(range.start, i64::MAX - 10);
        assert_eq!(range.end, i64::MAX);
        assert!(range.contains(i64::MAX));
    }

    #[test]
    fn test_invalid_point_writes_nothing() {
        let db = new_db();

        let mut point = histogram_point();
        point.field_ids.truncate(5);
        assert!(matches!(db.write(&point), Err(MemDbError::InvalidPoint(_))));

        let mut point = histogram_point();
        if let Some(compound) = point.payload.compound_field.as_mut() {
            compound.values.pop();
        }
        assert!(matches!(db.write(&point), Err(MemDbError::InvalidPoint(_))));

        assert_eq!(db.stats().metric_count, 0);
        assert_eq!(db.mem_size(), 0);
    }

    #[test]
    fn test_locked_writer() {
        let db = new_db();
        {
            let writer = db.with_lock();
            assert_eq!(db.stats().in_flight_writes, 1);
            writer.write_without_lock(&sum_point(5, 1, 0, 1.0)).unwrap();
            writer.write_without_lock(&sum_point(5, 1, 0, 2.0)).unwrap();
        }
        assert_eq!(db.stats().in_flight_writes, 0);

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();
        assert_eq!(decode(flusher.metric(5).unwrap().block(1, 1).unwrap()), vec![(0, 3.0)]);
    }

    #[test]
    fn test_concurrent_write_isolation() {
        let db = Arc::new(new_db());
        let writers = 8u32;

        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for slot in 0..20u16 {
                        db.write(&sum_point(i % 2, i, slot, (i * 100 + slot as u32) as f64))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();

        let series_total: usize = flusher.metrics().iter().map(|m| m.series.len()).sum();
        assert_eq!(series_total, writers as usize);
        for i in 0..writers {
            let block = flusher.metric(i % 2).unwrap().block(i, 1).unwrap();
            let expected: Vec<_> = (0..20u16)
                .map(|slot| (slot, (i * 100 + slot as u32) as f64))
                .collect();
            assert_eq!(decode(block), expected);
        }
    }

    #[test]
    fn test_flush_waits_for_in_flight_write() {
        let db = Arc::new(new_db());
        db.acquire_write();

        let flushed = Arc::new(AtomicBool::new(false));
        let flush = {
            let db = Arc::clone(&db);
            let flushed = Arc::clone(&flushed);
            thread::spawn(move || {
                let mut flusher = MemoryFlusher::new();
                db.flush_family_to(&mut flusher).unwrap();
                flushed.store(true, Ordering::SeqCst);
                flusher
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!flushed.load(Ordering::SeqCst));
        db.write(&sum_point(1, 1, 4, 8.0)).unwrap();
        db.complete_write();

        let flusher = flush.join().unwrap();
        let block = flusher.metric(1).unwrap().block(1, 1).unwrap();
        assert_eq!(decode(block), vec![(4, 8.0)]);
    }

    #[test]
    fn test_flush_is_sorted_and_skips_empty_metrics() {
        let db = new_db();
        for metric_id in [9, 3, 6] {
            db.write(&sum_point(metric_id, 1, 0, 1.0)).unwrap();
        }
        db.stores.get_or_create(1, MetricStore::new);

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();
        let ids: Vec<_> = flusher.metrics().iter().map(|m| m.metric_id).collect();
        assert_eq!(ids, vec![3, 6, 9]);
    }

    #[test]
    fn test_flusher_error_aborts_flush() {
        struct FailingFlusher {
            inner: MemoryFlusher,
            fail_on: MetricId,
        }

        impl Flusher for FailingFlusher {
            fn prepare_metric(&mut self, metric_id: MetricId, fields: &[FieldMeta]) -> Result<()> {
                if metric_id == self.fail_on {
                    return Err(MemDbError::Flush("disk full".into()));
                }
                self.inner.prepare_metric(metric_id, fields)
            }
            fn flush_field(&mut self, field_id: FieldId, data: &[u8]) -> Result<()> {
                self.inner.flush_field(field_id, data)
            }
            fn flush_series(&mut self, series_id: u32) -> Result<()> {
                self.inner.flush_series(series_id)
            }
            fn commit_metric(&mut self, slot_range: SlotRange) -> Result<()> {
                self.inner.commit_metric(slot_range)
            }
            fn commit(&mut self) -> Result<()> {
                self.inner.commit()
            }
        }

        let db = new_db();
        db.write(&sum_point(1, 1, 0, 1.0)).unwrap();
        db.write(&sum_point(2, 1, 0, 1.0)).unwrap();

        let mut flusher = FailingFlusher {
            inner: MemoryFlusher::new(),
            fail_on: 2,
        };
        let err = db.flush_family_to(&mut flusher).unwrap_err();
        assert!(matches!(err, MemDbError::Flush(_)));
        assert_eq!(flusher.inner.commits(), 0);
    }

    #[test]
    fn test_filter() {
        let db = new_db();
        db.write(&sum_point(1, 7, 10, 42.0)).unwrap();

        let series: RoaringBitmap = [7u32].into_iter().collect();
        let fields = vec![FieldMeta::new(1, "sum", FieldType::Sum)];
        let family = db.family_range();

        assert!(db.filter(99, &series, family, &fields).unwrap().is_none());
        let before = TimeRange::new(0, family.start - 1);
        assert!(db.filter(1, &series, before, &fields).unwrap().is_none());

        let rs = db.filter(1, &series, family, &fields).unwrap().unwrap();
        assert_eq!(rs[0].family_time(), 1_000_000);
        let data = rs[0].load(7).unwrap().unwrap();
        assert_eq!(decode(&data.field("sum").unwrap().block), vec![(10, 42.0)]);
    }

    #[test]
    fn test_alloc_exhaustion_propagates() {
        let db = MemoryDatabase::new(MemoryDatabaseConfig {
            buffer: BufferConfig {
                page_size: 272,
                region_size: 272 * 2,
                max_regions: 1,
            },
            ..Default::default()
        })
        .unwrap();

        db.write(&sum_point(1, 1, 0, 1.0)).unwrap();
        db.write(&sum_point(1, 2, 0, 1.0)).unwrap();
        let err = db.write(&sum_point(1, 3, 0, 1.0)).unwrap_err();
        assert!(matches!(err, MemDbError::BufferExhausted { .. }));
        assert!(err.is_retryable());

        let stats = db.stats();
        assert_eq!(stats.allocated_pages, 2);
        assert_eq!(stats.alloc_failures, 1);

        // existing field stores keep accepting writes
        db.write(&sum_point(1, 1, 1, 1.0)).unwrap();
    }

    #[test]
    fn test_window_rollover_is_bounded_by_buffer() {
        let db = MemoryDatabase::new(MemoryDatabaseConfig {
            buffer: BufferConfig {
                page_size: 272,
                region_size: 272 * 2,
                max_regions: 1,
            },
            ..Default::default()
        })
        .unwrap();

        db.write(&sum_point(1, 1, 0, 1.0)).unwrap();
        // 32-slot window: slot 40 freezes slots 0..=31 into a new page
        db.write(&sum_point(1, 1, 40, 2.0)).unwrap();
        assert_eq!(db.stats().allocated_pages, 2);
        assert!(db.mem_size() >= 2 * 272);

        let size_before = db.mem_size();
        let err = db.write(&sum_point(1, 1, 80, 3.0)).unwrap_err();
        assert!(matches!(err, MemDbError::BufferExhausted { .. }));
        assert_eq!(db.stats().alloc_failures, 1);
        assert_eq!(db.mem_size(), size_before);

        let mut flusher = MemoryFlusher::new();
        db.flush_family_to(&mut flusher).unwrap();
        let block = flusher.metric(1).unwrap().block(1, 1).unwrap();
        assert_eq!(decode(block), vec![(0, 1.0), (40, 2.0)]);
    }

    #[test]
    fn test_mem_size_grows() {
        let db = new_db();
        assert_eq!(db.mem_size(), 0);
        db.write(&sum_point(1, 1, 0, 1.0)).unwrap();
        let after_first = db.mem_size();
        assert!(after_first > 0);
        db.write(&sum_point(1, 1, 1, 1.0)).unwrap();
        assert!(db.mem_size() > after_first);
    }

    #[test]
    fn test_close_rejects_new_pages() {
        let db = new_db();
        db.write(&sum_point(1, 1, 0, 1.0)).unwrap();
        db.close().unwrap();
        assert!(matches!(
            db.write(&sum_point(1, 2, 0, 1.0)),
            Err(MemDbError::BufferClosed)
        ));
    }
}
