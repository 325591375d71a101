//! Read-side contract used by the query engine
//!
//! A filter call returns result sets describing which series and fields
//! matched; field data is only encoded when a series is loaded.

use crate::encoding::TsdDecoder;
use crate::{FieldMeta, MetricId, Result, SeriesId, SlotRange, TimeRange, Timestamp};
use roaring::RoaringBitmap;
use std::fmt;

/// One field's data of a loaded series
#[derive(Debug, Clone, PartialEq)]
pub struct FieldData {
    pub meta: FieldMeta,
    /// TSD block with slot header
    pub block: Vec<u8>,
}

impl FieldData {
    /// Decoder positioned at the first slot of the block
    pub fn decoder(&self) -> TsdDecoder {
        TsdDecoder::new(&self.block)
    }
}

/// Data of one series, restricted to the filtered fields
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    pub series_id: SeriesId,
    pub fields: Vec<FieldData>,
}

impl SeriesData {
    /// Data of one field
    pub fn field(&self, name: &str) -> Option<&FieldData> {
        self.fields.iter().find(|f| f.meta.name == name)
    }
}

/// Result of a filter over one data source
pub trait FilterResultSet: fmt::Debug + Send + Sync {
    /// Name of the data source
    fn identifier(&self) -> String;

    /// Family start time the data belongs to
    fn family_time(&self) -> Timestamp;

    /// Slots that carry data
    fn slot_range(&self) -> SlotRange;

    /// Series that matched
    fn series_ids(&self) -> &RoaringBitmap;

    /// Fields that matched
    fn fields(&self) -> &[FieldMeta];

    /// Load field data of one matched series, `None` if it has none
    fn load(&self, series_id: SeriesId) -> Result<Option<SeriesData>>;
}

/// Source of filterable data
pub trait DataFilter {
    /// Filter by metric, candidate series, time range and fields.
    /// `Ok(None)` means the source has nothing for the metric.
    fn filter(
        &self,
        metric_id: MetricId,
        series_ids: &RoaringBitmap,
        time_range: TimeRange,
        fields: &[FieldMeta],
    ) -> Result<Option<Vec<Box<dyn FilterResultSet>>>>;
}
