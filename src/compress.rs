//! Per-block LZ4 compression with the never-inflate acceptance rule

use crate::protocol::{BlockIdx, BLOCK_SIZE, COMPRESSED_SIZE_MAX};
use crate::file::SourceFile;
use lz4_flex::block::{compress_into, get_maximum_output_size};

/// Worst-case scratch size for compressing one block.
pub fn compress_bound() -> usize {
    get_maximum_output_size(BLOCK_SIZE).max(BLOCK_SIZE)
}

/// Compress one raw block into `scratch`. Returns the compressed length
/// when the result is worth sending: positive and strictly under
/// `COMPRESSED_SIZE_MAX`. Returns `None` otherwise, in which case the
/// caller transmits the raw bytes.
pub fn try_compress(raw: &[u8], scratch: &mut [u8]) -> Option<usize> {
    match compress_into(raw, scratch) {
        Ok(n) if n > 0 && n < COMPRESSED_SIZE_MAX => Some(n),
        _ => None,
    }
}

/// Hook consulted before LZ4. A file format that carries pre-compressed
/// blocks can report true to skip recompression; the block then goes out
/// with compression=0 and the client consumes it as-is.
pub trait CompressionHint {
    fn already_compressed(&self, file: &SourceFile, block_idx: BlockIdx) -> bool;
}

/// Default hint: nothing is ever pre-compressed.
pub struct NoCompressionHint;

impl CompressionHint for NoCompressionHint {
    fn already_compressed(&self, _file: &SourceFile, _block_idx: BlockIdx) -> bool {
        false
    }
}
