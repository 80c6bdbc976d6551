//! Outbound write coalescing into length-prefixed chunks

use crate::protocol::{CHUNK_FLUSH_SIZE, CHUNK_HEADER_SIZE};
use std::io::{self, Write};

/// Accumulates response records behind a 4-byte chunk-header placeholder
/// and writes each finished chunk as one contiguous buffer, so a chunk
/// boundary is never split on the wire.
pub struct ChunkWriter {
    pending: Vec<u8>,
    bytes_flushed: u64,
}

impl ChunkWriter {
    pub fn new() -> ChunkWriter {
        ChunkWriter { pending: Vec::new(), bytes_flushed: 0 }
    }

    /// Total bytes handed to the connection so far, chunk headers included.
    pub fn bytes_flushed(&self) -> u64 {
        self.bytes_flushed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len().saturating_sub(CHUNK_HEADER_SIZE)
    }

    /// Append one record; emits the chunk when the accumulated payload
    /// exceeds the flush threshold or `flush` is set.
    pub fn push(&mut self, conn: &mut dyn Write, data: &[u8], flush: bool) -> io::Result<()> {
        if self.pending.is_empty() {
            self.pending.resize(CHUNK_HEADER_SIZE, 0);
        }
        self.pending.extend_from_slice(data);
        if flush || self.pending.len() - CHUNK_HEADER_SIZE > CHUNK_FLUSH_SIZE {
            self.flush(conn)?;
        }
        Ok(())
    }

    /// Patch the big-endian payload length into the placeholder and write
    /// the chunk. State is cleared whether or not the write succeeds; a
    /// failed write is the caller's to report, and the next inbound read
    /// will observe the broken connection.
    pub fn flush(&mut self, conn: &mut dyn Write) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let payload_len = (self.pending.len() - CHUNK_HEADER_SIZE) as u32;
        self.pending[..CHUNK_HEADER_SIZE].copy_from_slice(&payload_len.to_be_bytes());
        let res = conn.write_all(&self.pending).and_then(|_| conn.flush());
        self.bytes_flushed += self.pending.len() as u64;
        self.pending.clear();
        res
    }
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_prefixes_payload_length() {
        let mut out = Vec::new();
        let mut chunks = ChunkWriter::new();
        chunks.push(&mut out, b"abc", false).unwrap();
        chunks.push(&mut out, b"defg", false).unwrap();
        assert!(out.is_empty());
        assert_eq!(chunks.pending_len(), 7);

        chunks.flush(&mut out).unwrap();
        assert_eq!(out, b"\x00\x00\x00\x07abcdefg");
        assert_eq!(chunks.bytes_flushed(), 11);
        assert_eq!(chunks.pending_len(), 0);
    }

    #[test]
    fn test_flush_on_empty_is_noop() {
        let mut out = Vec::new();
        let mut chunks = ChunkWriter::new();
        chunks.flush(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(chunks.bytes_flushed(), 0);
    }

    #[test]
    fn test_push_with_flush_emits_immediately() {
        let mut out = Vec::new();
        let mut chunks = ChunkWriter::new();
        chunks.push(&mut out, b"zz", true).unwrap();
        assert_eq!(out, b"\x00\x00\x00\x02zz");
    }

    #[test]
    fn test_size_threshold_triggers_flush() {
        let mut out = Vec::new();
        let mut chunks = ChunkWriter::new();
        let record = vec![9u8; 4096];
        let mut pushed = 0;
        while out.is_empty() {
            chunks.push(&mut out, &record, false).unwrap();
            pushed += record.len();
        }
        assert!(pushed > CHUNK_FLUSH_SIZE);
        let declared = u32::from_be_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(declared, pushed);
        assert_eq!(out.len(), CHUNK_HEADER_SIZE + pushed);
        assert_eq!(chunks.pending_len(), 0);
    }

    #[test]
    fn test_write_failure_clears_state() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut chunks = ChunkWriter::new();
        assert!(chunks.push(&mut Broken, b"abc", true).is_err());
        // A later flush starts from a clean slate
        let mut out = Vec::new();
        chunks.push(&mut out, b"de", true).unwrap();
        assert_eq!(out, b"\x00\x00\x00\x02de");
    }
}
