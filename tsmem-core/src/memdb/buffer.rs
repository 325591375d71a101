//! Paged buffer allocator backing field stores
//!
//! Pages are carved out of memory-mapped regions. A region maps an unlinked
//! temp file under the configured directory, or anonymous memory when no
//! directory is set. Regions are mapped lazily and the total is bounded, so
//! allocation fails fast once the budget is spent.

use crate::{MemDbError, Result};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Paged buffer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Page size in bytes
    pub page_size: usize,
    /// Region (mapping) size in bytes
    pub region_size: usize,
    /// Maximum number of regions mapped at once
    pub max_regions: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            page_size: crate::config::PAGE_SIZE,
            region_size: crate::config::REGION_SIZE,
            max_regions: crate::config::MAX_REGIONS,
        }
    }
}

impl BufferConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(MemDbError::Config("page_size must be positive".into()));
        }
        if self.region_size < self.page_size {
            return Err(MemDbError::Config(format!(
                "region_size {} is smaller than page_size {}",
                self.region_size, self.page_size
            )));
        }
        if self.max_regions == 0 {
            return Err(MemDbError::Config("max_regions must be positive".into()));
        }
        Ok(())
    }

    /// Pages carved from each region
    pub fn pages_per_region(&self) -> usize {
        self.region_size / self.page_size
    }
}

/// One mapped region; kept alive by the buffer and every page cut from it
struct Mapping {
    _mmap: MmapMut,
    base: NonNull<u8>,
}

// SAFETY: `base` points into `_mmap`, which lives as long as the Mapping.
// The pointer is only dereferenced through `Page`, and pages cover disjoint
// ranges of the region.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

/// A fixed-capacity byte page, exclusively owned once granted
pub struct Page {
    ptr: NonNull<u8>,
    len: usize,
    _mapping: Arc<Mapping>,
}

// SAFETY: a page is the sole handle to its byte range.
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr..ptr+len lies inside the mapping held by `_mapping`
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and no other page aliases this range
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("len", &self.len).finish()
    }
}

struct BufferInner {
    regions: Vec<Arc<Mapping>>,
    next_page: usize,
}

/// Allocates fixed-size pages from a bounded set of mapped regions
pub struct DataPointBuffer {
    config: BufferConfig,
    dir: Option<PathBuf>,
    inner: Mutex<BufferInner>,
    closed: AtomicBool,
    allocated_pages: AtomicU64,
}

impl DataPointBuffer {
    /// Create a buffer; with `dir`, regions are backed by temp files there
    pub fn new(config: BufferConfig, dir: Option<&Path>) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            config,
            dir: dir.map(Path::to_path_buf),
            inner: Mutex::new(BufferInner {
                regions: Vec::new(),
                next_page: 0,
            }),
            closed: AtomicBool::new(false),
            allocated_pages: AtomicU64::new(0),
        })
    }

    /// Allocate one zeroed page
    pub fn alloc_page(&self) -> Result<Page> {
        let mut inner = self.inner.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(MemDbError::BufferClosed);
        }

        let pages_per_region = self.config.pages_per_region();
        if inner.regions.is_empty() || inner.next_page >= pages_per_region {
            if inner.regions.len() >= self.config.max_regions {
                return Err(MemDbError::BufferExhausted {
                    regions: inner.regions.len(),
                });
            }
            let mapping = self.map_region(inner.regions.len())?;
            inner.regions.push(Arc::new(mapping));
            inner.next_page = 0;
        }

        let page_size = self.config.page_size;
        let offset = inner.next_page * page_size;
        inner.next_page += 1;

        let mapping = match inner.regions.last() {
            Some(mapping) => Arc::clone(mapping),
            None => return Err(MemDbError::Internal("no mapped region".into())),
        };
        // SAFETY: offset + page_size <= pages_per_region * page_size, the mapped length
        let ptr = unsafe { NonNull::new_unchecked(mapping.base.as_ptr().add(offset)) };

        self.allocated_pages.fetch_add(1, Ordering::Relaxed);
        Ok(Page {
            ptr,
            len: page_size,
            _mapping: mapping,
        })
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Pages handed out so far
    pub fn allocated_pages(&self) -> u64 {
        self.allocated_pages.load(Ordering::Relaxed)
    }

    /// Regions currently mapped by the buffer
    pub fn region_count(&self) -> usize {
        self.inner.lock().regions.len()
    }

    /// Check if the buffer was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the buffer's regions; granted pages stay valid until dropped
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.closed.store(true, Ordering::Release);
        inner.regions.clear();
        inner.next_page = 0;
        Ok(())
    }

    fn map_region(&self, index: usize) -> Result<Mapping> {
        let len = self.config.pages_per_region() * self.config.page_size;
        let mut mmap = match &self.dir {
            Some(dir) => {
                let file = tempfile::tempfile_in(dir)?;
                file.set_len(len as u64)?;
                // SAFETY: the file is unlinked and private to this mapping
                unsafe { MmapOptions::new().len(len).map_mut(&file)? }
            }
            None => MmapOptions::new().len(len).map_anon()?,
        };
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| MemDbError::Internal("mapped region at null address".into()))?;

        debug!(region = index, bytes = len, file_backed = self.dir.is_some(), "mapped buffer region");
        Ok(Mapping { _mmap: mmap, base })
    }
}

impl std::fmt::Debug for DataPointBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPointBuffer")
            .field("config", &self.config)
            .field("dir", &self.dir)
            .field("allocated_pages", &self.allocated_pages())
            .field("closed", &self.is_closed())
            .finish()
    }
}
