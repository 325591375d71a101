//! Time-series delta (TSD) codec
//!
//! Compresses one field's per-slot samples into a block: a presence bit per
//! time slot plus XOR-delta compressed 64-bit values, in the style of
//! Facebook's Gorilla paper. Flat series cost about one bit per sample.

mod bitstream;
mod pool;
mod tsd;
mod xor;

pub use bitstream::{BitReader, BitWriter};
pub use pool::{global_decoder_pool, DecoderPool, PooledDecoder, DEFAULT_MAX_IDLE_DECODERS};
pub use tsd::{decode_tsd_time, TsdDecoder, TsdEncoder, TSD_HEADER_SIZE};
pub use xor::{XorDecoder, XorEncoder};
