//! tsmem Core - In-Memory Write Store for Time-Series Data
//!
//! Buffers recent writes of one time family in memory and hands them to a
//! columnar file writer on flush.
//!
//! # Architecture
//!
//! - **Encoding**: TSD blocks, a slot-range header followed by a
//!   presence/XOR-value bitstream
//! - **Memory database**: metric bucket -> metric -> series -> field stores,
//!   with field values kept in pages of a memory-mapped paged buffer
//! - **Flush**: streams every metric, series and field to a [`flush::Flusher`]
//! - **Filter**: lazily loadable result sets for the query engine

pub mod encoding;
pub mod filter;
pub mod flush;
pub mod memdb;

mod error;
mod types;

pub use error::{MemDbError, Result};
pub use filter::{DataFilter, FilterResultSet};
pub use flush::{Flusher, MemoryFlusher};
pub use memdb::{MemDbStats, MemoryDatabase, MemoryDatabaseConfig};
pub use types::*;

/// tsmem version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Paged buffer page size: 16-byte header plus 32 slots
    pub const PAGE_SIZE: usize = 272;

    /// Paged buffer region size (8MB)
    pub const REGION_SIZE: usize = 8 * 1024 * 1024;

    /// Maximum mapped regions per database
    pub const MAX_REGIONS: usize = 64;

    /// Metric bucket shards
    pub const BUCKET_SHARDS: usize = 32;

    /// Family window length (1 hour)
    pub const FAMILY_DURATION_MS: i64 = 60 * 60 * 1000;
}
