//! In-memory write store for one time family
//!
//! Writes land in a hierarchy of stores:
//! database -> metric bucket -> metric store -> series store -> field store.
//! Field stores keep recent slots in pages from the paged buffer and freeze
//! older windows into TSD blocks. A flush streams everything to a
//! [`Flusher`](crate::flush::Flusher).

mod barrier;
mod bucket;
mod buffer;
mod database;
mod field_store;
mod metric_store;
mod series_store;

pub use barrier::{WriteBarrier, WriteScope};
pub use bucket::MetricBucketStore;
pub use buffer::{BufferConfig, DataPointBuffer, Page};
pub use database::{LockedWriter, MemDbStats, MemoryDatabase};
pub use field_store::{window_slots, FieldStore, PageAlloc, MIN_PAGE_SIZE};
pub use metric_store::{FlushContext, MemFilterResultSet, MetricStore};
pub use series_store::{FieldWrite, SeriesStore};

use crate::{MemDbError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Memory database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDatabaseConfig {
    /// Start of the family window in milliseconds
    pub family_time: Timestamp,
    /// Length of the family window in milliseconds
    pub family_duration: i64,
    /// Database name used in logs
    pub name: String,
    /// Directory for file-backed buffer regions; anonymous memory if unset
    pub temp_path: Option<PathBuf>,
    /// Paged buffer settings
    pub buffer: BufferConfig,
    /// Number of metric bucket shards
    pub bucket_shards: usize,
}

impl Default for MemoryDatabaseConfig {
    fn default() -> Self {
        Self {
            family_time: 0,
            family_duration: crate::config::FAMILY_DURATION_MS,
            name: "memdb".to_string(),
            temp_path: None,
            buffer: BufferConfig::default(),
            bucket_shards: crate::config::BUCKET_SHARDS,
        }
    }
}

impl MemoryDatabaseConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        if self.buffer.page_size < MIN_PAGE_SIZE {
            return Err(MemDbError::Config(format!(
                "page_size {} is below the minimum of {}",
                self.buffer.page_size, MIN_PAGE_SIZE
            )));
        }
        if self.family_duration <= 0 {
            return Err(MemDbError::Config("family_duration must be positive".into()));
        }
        if self.bucket_shards == 0 || !self.bucket_shards.is_power_of_two() {
            return Err(MemDbError::Config(format!(
                "bucket_shards must be a power of two, got {}",
                self.bucket_shards
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        MemoryDatabaseConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_config() {
        let mut config = MemoryDatabaseConfig::default();
        config.bucket_shards = 3;
        assert!(matches!(config.validate(), Err(MemDbError::Config(_))));

        let mut config = MemoryDatabaseConfig::default();
        config.buffer.page_size = 16;
        config.buffer.region_size = 1024;
        assert!(matches!(config.validate(), Err(MemDbError::Config(_))));

        let mut config = MemoryDatabaseConfig::default();
        config.family_duration = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: MemoryDatabaseConfig =
            serde_json::from_str(r#"{"name": "db-1", "buffer": {"max_regions": 2}}"#).unwrap();
        assert_eq!(config.name, "db-1");
        assert_eq!(config.buffer.max_regions, 2);
        assert_eq!(config.buffer.page_size, crate::config::PAGE_SIZE);
        assert_eq!(config.bucket_shards, crate::config::BUCKET_SHARDS);
    }
}
