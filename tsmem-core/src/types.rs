//! Core types for the memory store

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric metric identifier
pub type MetricId = u32;

/// Numeric series identifier (metric + tag values)
pub type SeriesId = u32;

/// Field identifier, unique within a metric
pub type FieldId = u8;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Field value types stored by a field store.
///
/// The type decides how two writes landing on the same time slot merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Unknown,
    Sum,
    Min,
    Max,
    Gauge,
    Histogram,
}

impl FieldType {
    /// Merge a new value into an existing value of the same slot
    #[inline]
    pub fn merge(&self, existing: f64, value: f64) -> f64 {
        match self {
            FieldType::Sum | FieldType::Histogram => existing + value,
            FieldType::Min => existing.min(value),
            FieldType::Max => existing.max(value),
            FieldType::Gauge | FieldType::Unknown => value,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Unknown => "unknown",
            FieldType::Sum => "sum",
            FieldType::Min => "min",
            FieldType::Max => "max",
            FieldType::Gauge => "gauge",
            FieldType::Histogram => "histogram",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric-level description of one field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMeta {
    pub id: FieldId,
    pub name: String,
    pub field_type: FieldType,
}

impl FieldMeta {
    /// Create a new field meta
    pub fn new(id: FieldId, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
        }
    }
}

/// Wire-level type of a simple field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimpleFieldType {
    Unspecified,
    DeltaSum,
    CumulativeSum,
    Gauge,
}

impl SimpleFieldType {
    /// Storage field type, `None` for types the store does not keep
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            SimpleFieldType::DeltaSum | SimpleFieldType::CumulativeSum => Some(FieldType::Sum),
            SimpleFieldType::Gauge => Some(FieldType::Gauge),
            SimpleFieldType::Unspecified => None,
        }
    }
}

/// A single named sum/gauge value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleField {
    pub name: String,
    pub field_type: SimpleFieldType,
    pub value: f64,
}

impl SimpleField {
    /// Create a new simple field
    pub fn new(name: impl Into<String>, field_type: SimpleFieldType, value: f64) -> Self {
        Self {
            name: name.into(),
            field_type,
            value,
        }
    }
}

/// Histogram-like value expanded into min/max/sum/count/bucket fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompoundField {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: f64,
    pub explicit_bounds: Vec<f64>,
    pub values: Vec<f64>,
}

impl CompoundField {
    /// Field name used for the bucket of an explicit bound
    pub fn bucket_name(bound: f64) -> String {
        format!("__bucket_{}", bound)
    }

    /// Fields written for this value; min and max only when positive
    pub fn field_count(&self) -> usize {
        usize::from(self.min > 0.0) + usize::from(self.max > 0.0) + 2 + self.explicit_bounds.len()
    }
}

/// Decoded ingestion payload of one point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub simple_fields: Vec<SimpleField>,
    pub compound_field: Option<CompoundField>,
}

impl MetricPayload {
    /// Number of field ids this payload consumes
    pub fn field_count(&self) -> usize {
        let simple = self
            .simple_fields
            .iter()
            .filter(|f| f.field_type.field_type().is_some())
            .count();
        let compound = self
            .compound_field
            .as_ref()
            .map(CompoundField::field_count)
            .unwrap_or(0);
        simple + compound
    }
}

/// One ingested sample batch for a series at a time slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub metric_id: MetricId,
    pub series_id: SeriesId,
    pub slot_index: u16,
    /// Field ids, positionally matching the expanded payload fields
    pub field_ids: Vec<FieldId>,
    pub payload: MetricPayload,
}

/// Inclusive range of time slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Check if a slot is within the range
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Grow the range to cover `slot`
    pub fn extend(&mut self, slot: u16) {
        self.start = self.start.min(slot);
        self.end = self.end.max(slot);
    }

    /// Number of slots covered
    pub fn len(&self) -> usize {
        (self.end as usize + 1).saturating_sub(self.start as usize)
    }

    /// Check if the range covers no slot
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}
