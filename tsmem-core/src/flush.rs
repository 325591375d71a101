//! Flush contract between the memory store and the columnar file writer
//!
//! For every metric the store calls `prepare_metric`, then for every series
//! one `flush_field` per field with data followed by `flush_series`, then
//! `commit_metric`. `commit` runs once after all metrics.

use crate::{FieldId, FieldMeta, MemDbError, MetricId, Result, SeriesId, SlotRange};

/// Sink for flushed family data
pub trait Flusher {
    /// Start a metric with its known fields
    fn prepare_metric(&mut self, metric_id: MetricId, fields: &[FieldMeta]) -> Result<()>;

    /// Hand over one field's TSD block of the current series
    fn flush_field(&mut self, field_id: FieldId, data: &[u8]) -> Result<()>;

    /// Close the current series
    fn flush_series(&mut self, series_id: SeriesId) -> Result<()>;

    /// Close the current metric
    fn commit_metric(&mut self, slot_range: SlotRange) -> Result<()>;

    /// Commit everything flushed so far
    fn commit(&mut self) -> Result<()>;
}

/// One flushed series
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedSeries {
    pub series_id: SeriesId,
    pub fields: Vec<(FieldId, Vec<u8>)>,
}

/// One flushed metric
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedMetric {
    pub metric_id: MetricId,
    pub fields: Vec<FieldMeta>,
    pub series: Vec<FlushedSeries>,
    pub slot_range: SlotRange,
}

impl FlushedMetric {
    /// TSD block of one field of one series
    pub fn block(&self, series_id: SeriesId, field_id: FieldId) -> Option<&[u8]> {
        self.series
            .iter()
            .find(|s| s.series_id == series_id)?
            .fields
            .iter()
            .find(|(id, _)| *id == field_id)
            .map(|(_, data)| data.as_slice())
    }
}

#[derive(Debug)]
struct OpenMetric {
    metric_id: MetricId,
    fields: Vec<FieldMeta>,
    series: Vec<FlushedSeries>,
    pending: Vec<(FieldId, Vec<u8>)>,
}

/// Flusher that records everything in memory
#[derive(Debug, Default)]
pub struct MemoryFlusher {
    metrics: Vec<FlushedMetric>,
    open: Option<OpenMetric>,
    commits: usize,
}

impl MemoryFlusher {
    /// Create an empty flusher
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed metrics in flush order
    pub fn metrics(&self) -> &[FlushedMetric] {
        &self.metrics
    }

    /// Look up a flushed metric
    pub fn metric(&self, metric_id: MetricId) -> Option<&FlushedMetric> {
        self.metrics.iter().find(|m| m.metric_id == metric_id)
    }

    /// Number of `commit` calls
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Total TSD bytes recorded
    pub fn total_bytes(&self) -> usize {
        self.metrics
            .iter()
            .flat_map(|m| m.series.iter())
            .flat_map(|s| s.fields.iter())
            .map(|(_, data)| data.len())
            .sum()
    }

    fn open_metric(&mut self) -> Result<&mut OpenMetric> {
        self.open
            .as_mut()
            .ok_or_else(|| MemDbError::Flush("no metric prepared".into()))
    }
}

impl Flusher for MemoryFlusher {
    fn prepare_metric(&mut self, metric_id: MetricId, fields: &[FieldMeta]) -> Result<()> {
        if let Some(open) = &self.open {
            return Err(MemDbError::Flush(format!(
                "metric {} prepared while metric {} is open",
                metric_id, open.metric_id
            )));
        }
        self.open = Some(OpenMetric {
            metric_id,
            fields: fields.to_vec(),
            series: Vec::new(),
            pending: Vec::new(),
        });
        Ok(())
    }

    fn flush_field(&mut self, field_id: FieldId, data: &[u8]) -> Result<()> {
        self.open_metric()?.pending.push((field_id, data.to_vec()));
        Ok(())
    }

    fn flush_series(&mut self, series_id: SeriesId) -> Result<()> {
        let open = self.open_metric()?;
        let fields = std::mem::take(&mut open.pending);
        open.series.push(FlushedSeries { series_id, fields });
        Ok(())
    }

    fn commit_metric(&mut self, slot_range: SlotRange) -> Result<()> {
        let open = self
            .open
            .take()
            .ok_or_else(|| MemDbError::Flush("no metric prepared".into()))?;
        if !open.pending.is_empty() {
            return Err(MemDbError::Flush(format!(
                "metric {} committed with unflushed fields",
                open.metric_id
            )));
        }
        self.metrics.push(FlushedMetric {
            metric_id: open.metric_id,
            fields: open.fields,
            series: open.series,
            slot_range,
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(open) = &self.open {
            return Err(MemDbError::Flush(format!(
                "commit while metric {} is open",
                open.metric_id
            )));
        }
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldType;

    #[test]
    fn test_memory_flusher_records_metrics() {
        let mut flusher = MemoryFlusher::new();
        let fields = vec![FieldMeta::new(1, "sum", FieldType::Sum)];

        flusher.prepare_metric(1, &fields).unwrap();
        flusher.flush_field(1, &[1, 2, 3, 4, 5]).unwrap();
        flusher.flush_series(7).unwrap();
        flusher.commit_metric(SlotRange::new(0, 3)).unwrap();
        flusher.commit().unwrap();

        let metric = flusher.metric(1).unwrap();
        assert_eq!(metric.fields, fields);
        assert_eq!(metric.block(7, 1), Some(&[1u8, 2, 3, 4, 5][..]));
        assert_eq!(metric.block(7, 2), None);
        assert_eq!(flusher.total_bytes(), 5);
        assert_eq!(flusher.commits(), 1);
    }

    #[test]
    fn test_memory_flusher_rejects_bad_sequence() {
        let mut flusher = MemoryFlusher::new();
        assert!(flusher.flush_field(1, &[0]).is_err());
        assert!(flusher.commit_metric(SlotRange::new(0, 0)).is_err());

        flusher.prepare_metric(1, &[]).unwrap();
        assert!(flusher.prepare_metric(2, &[]).is_err());
        assert!(flusher.commit().is_err());

        flusher.flush_field(1, &[0]).unwrap();
        assert!(flusher.commit_metric(SlotRange::new(0, 0)).is_err());
    }
}
