//! Shared protocol constants for the incremental streaming transport

use std::time::Duration;

/// Delimits every inbound request record. Big-endian 0x494E4352.
pub const MAGIC: &[u8; 4] = b"INCR";

/// Fixed unit of file payload.
pub const BLOCK_SIZE: usize = 4096;

/// A compressed block goes out only when it undercuts the raw block by 5%.
pub const COMPRESSED_SIZE_MAX: usize = BLOCK_SIZE * 95 / 100;

/// Inbound read buffer size
pub const READ_BUFFER_SIZE: usize = 128 * 1024;

/// Outbound chunk payload size that forces a flush
pub const CHUNK_FLUSH_SIZE: usize = 31 * BLOCK_SIZE;

/// Upper bound of blocks actually sent per prefetch pass
pub const PREFETCH_BLOCKS_PER_PASS: usize = 128;

/// Blocks queued ahead of a missed one; the device OS usually faults
/// more than a single page at a time.
pub const MISS_READAHEAD_BLOCKS: i32 = 7;

/// One-shot readiness token, written before the framed loop begins
pub const OKAY_TOKEN: &[u8; 4] = b"OKAY";

/// `file_id` of the end-of-stream sentinel response
pub const DONE_FILE_ID: i16 = -1;

// Fixed wire record sizes
pub const REQUEST_SIZE: usize = 8;
pub const RESPONSE_HEADER_SIZE: usize = 10;
pub const CHUNK_HEADER_SIZE: usize = 4;

// Request kind IDs (keep numeric stable for wire compat)
pub mod request {
    pub const SERVING_COMPLETE: i16 = 0;
    pub const BLOCK_MISSING: i16 = 1;
    pub const PREFETCH: i16 = 2;
    pub const DESTROY: i16 = 3;
}

// Compression type IDs carried in the response header
pub mod compression {
    pub const NONE: i16 = 0;
    pub const LZ4: i16 = 1;
}

pub mod timeouts {
    use super::Duration;

    /// How long a blocking poll waits for the client. Terminal only once
    /// serving-complete has been seen.
    pub const POLL: Duration = Duration::from_secs(300);
}

pub type FileId = i16;
pub type BlockIdx = i32;
