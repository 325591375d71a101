//! Reusable TSD decoders
//!
//! Flush and filter decode many small blocks; pooling keeps each decoder's
//! bit buffer allocated across blocks.

use super::tsd::TsdDecoder;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

/// Default number of idle decoders kept by a pool
pub const DEFAULT_MAX_IDLE_DECODERS: usize = 64;

/// Bounded pool of idle decoders
#[derive(Debug)]
pub struct DecoderPool {
    idle: Mutex<Vec<TsdDecoder>>,
    max_idle: usize,
}

impl DecoderPool {
    /// Create a pool keeping at most `max_idle` decoders
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Take a decoder; it goes back to the pool when the guard drops
    pub fn get(&self) -> PooledDecoder<'_> {
        let decoder = self.idle.lock().pop().unwrap_or_default();
        PooledDecoder {
            pool: self,
            decoder,
        }
    }

    /// Number of idle decoders
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, decoder: TsdDecoder) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(decoder);
        }
    }
}

impl Default for DecoderPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_DECODERS)
    }
}

/// Process-wide decoder pool
pub fn global_decoder_pool() -> &'static DecoderPool {
    static POOL: OnceLock<DecoderPool> = OnceLock::new();
    POOL.get_or_init(DecoderPool::default)
}

/// Scoped decoder borrowed from a [`DecoderPool`]
#[derive(Debug)]
pub struct PooledDecoder<'a> {
    pool: &'a DecoderPool,
    decoder: TsdDecoder,
}

impl Deref for PooledDecoder<'_> {
    type Target = TsdDecoder;

    fn deref(&self) -> &TsdDecoder {
        &self.decoder
    }
}

impl DerefMut for PooledDecoder<'_> {
    fn deref_mut(&mut self) -> &mut TsdDecoder {
        &mut self.decoder
    }
}

impl Drop for PooledDecoder<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.decoder));
    }
}
