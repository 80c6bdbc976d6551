//! The serve loop: request-or-prefetch arbitration, completion
//! detection, graceful shutdown

use crate::batcher::ChunkWriter;
use crate::compress::{self, CompressionHint, NoCompressionHint};
use crate::file::SourceFile;
use crate::log::ServeStats;
use crate::logger::{NoopLogger, ServeLogger};
use crate::prefetch::PrefetchState;
use crate::protocol::{
    compression, BlockIdx, FileId, BLOCK_SIZE, MISS_READAHEAD_BLOCKS, OKAY_TOKEN,
    PREFETCH_BLOCKS_PER_PASS,
};
use crate::reader::InboundBuffer;
use crate::transport::Transport;
use crate::wire::{Request, ResponseHeader};
use anyhow::{Context, Result};
use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    Skipped,
    Error,
}

/// One serving session over one connection. Owns the file table, the
/// inbound buffer, the prefetch queue and the pending-output chunk;
/// nothing is shared across threads.
pub struct IncrementalServer<T: Transport> {
    conn: T,
    sink: Box<dyn Write>,
    files: Vec<SourceFile>,
    hint: Box<dyn CompressionHint>,
    logger: Box<dyn ServeLogger>,
    inbound: InboundBuffer,
    chunks: ChunkWriter,
    prefetches: VecDeque<PrefetchState>,
    scratch: Vec<u8>,
    record: Vec<u8>,
    stats: ServeStats,
    serving_complete: bool,
    start_time: Option<Instant>,
}

impl<T: Transport> IncrementalServer<T> {
    pub fn new(conn: T, sink: Box<dyn Write>, files: Vec<SourceFile>) -> IncrementalServer<T> {
        let scratch_len = compress::compress_bound();
        IncrementalServer {
            conn,
            sink,
            files,
            hint: Box::new(NoCompressionHint),
            logger: Box::new(NoopLogger),
            inbound: InboundBuffer::new(),
            chunks: ChunkWriter::new(),
            prefetches: VecDeque::new(),
            scratch: vec![0u8; scratch_len],
            record: Vec::with_capacity(ResponseHeader::SIZE + scratch_len),
            stats: ServeStats::default(),
            serving_complete: false,
            start_time: None,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn ServeLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_compression_hint(mut self, hint: Box<dyn CompressionHint>) -> Self {
        self.hint = hint;
        self
    }

    /// Session counters, with the flushed-bytes total up to date.
    pub fn stats(&self) -> ServeStats {
        ServeStats { bytes_sent: self.chunks.bytes_flushed(), ..self.stats }
    }

    /// Drive the session until the client destroys it or the connection
    /// dies. Only the initial readiness token is fatal; every later
    /// transport failure is reported and survived until the reader
    /// observes the dead connection.
    pub fn serve(&mut self) -> Result<()> {
        self.conn
            .write_all(OKAY_TOKEN)
            .and_then(|_| self.conn.flush())
            .context("connection is dead")?;
        self.logger.ready(self.files.len());

        let mut prefetched_files: HashSet<FileId> = HashSet::new();
        let mut done_sent = false;

        loop {
            if !done_sent
                && self.prefetches.is_empty()
                && self.files.iter().all(SourceFile::fully_sent)
            {
                eprintln!("all blocks delivered, notifying the device");
                self.send_done();
                done_sent = true;
            }

            // With the queue empty the read below can stall for a long
            // time; anything still pending goes out first.
            let blocking = self.prefetches.is_empty();
            if blocking {
                if let Err(e) = self.chunks.flush(&mut self.conn) {
                    eprintln!("failed to flush pending chunk: {}", e);
                    self.logger.error("flush", &e.to_string());
                }
            }

            let request = self.inbound.read_request(
                &mut self.conn,
                self.sink.as_mut(),
                blocking,
                self.serving_complete,
            );

            if self.start_time.is_none() && self.inbound.bytes_received() > 0 {
                self.start_time = Some(Instant::now());
            }

            match request {
                None => {}
                Some(Request::Destroy) => {
                    self.finish();
                    return Ok(());
                }
                Some(Request::ServingComplete) => self.note_serving_complete(),
                Some(Request::BlockMissing { file_id, block_idx }) => {
                    self.stats.misses += 1;
                    let valid = file_id >= 0
                        && (file_id as usize) < self.files.len()
                        && self.files[file_id as usize].contains_block(block_idx);
                    if !valid {
                        eprintln!(
                            "received invalid data request for file_id {} block_idx {}",
                            file_id, block_idx
                        );
                    } else {
                        match self.send_block(file_id, block_idx, true) {
                            SendResult::Error => {
                                eprintln!("failed to send block {}", block_idx)
                            }
                            SendResult::Sent => {
                                self.stats.unique_misses += 1;
                                // The device OS likely faulted on a larger
                                // window; push the following blocks now.
                                let state = PrefetchState::readahead(
                                    &self.files[file_id as usize],
                                    block_idx + 1,
                                    MISS_READAHEAD_BLOCKS,
                                );
                                self.prefetches.push_front(state);
                            }
                            SendResult::Skipped => {}
                        }
                    }
                }
                Some(Request::Prefetch { file_id }) => {
                    if file_id < 0 || (file_id as usize) >= self.files.len() {
                        eprintln!("received invalid prefetch request for file_id {}", file_id);
                    } else if !prefetched_files.insert(file_id) {
                        eprintln!("received duplicate prefetch request for file_id {}", file_id);
                    } else {
                        let state = PrefetchState::whole_file(&self.files[file_id as usize]);
                        self.prefetches.push_back(state);
                    }
                }
                Some(Request::Unknown { kind, file_id, arg }) => {
                    eprintln!("invalid request {},{},{}", kind, file_id, arg);
                }
            }

            self.run_prefetching();
        }
    }

    /// Encode and emit one block: read, try-compress, pick the smaller
    /// form, hand header+payload to the batcher.
    fn send_block(&mut self, file_id: FileId, block_idx: BlockIdx, flush: bool) -> SendResult {
        let file = &self.files[file_id as usize];
        if !file.contains_block(block_idx) {
            eprintln!(
                "failed to read file {} at block {} (past end)",
                file.path.display(),
                block_idx
            );
            return SendResult::Error;
        }
        if file.is_sent(block_idx) {
            return SendResult::Skipped;
        }

        let mut raw = [0u8; BLOCK_SIZE];
        let bytes_read = match file.read_block(block_idx, &mut raw) {
            Ok(n) => n,
            Err(e) => {
                eprintln!(
                    "failed to get data for {} at block_idx={} ({})",
                    file.path.display(),
                    block_idx,
                    e
                );
                self.logger.error("read_block", &e.to_string());
                return SendResult::Error;
            }
        };

        let compressed_len = if self.hint.already_compressed(file, block_idx) {
            None
        } else {
            compress::try_compress(&raw[..bytes_read], &mut self.scratch)
        };
        let (compression_type, payload): (i16, &[u8]) = match compressed_len {
            Some(n) => {
                self.stats.blocks_compressed += 1;
                (compression::LZ4, &self.scratch[..n])
            }
            None => {
                self.stats.blocks_uncompressed += 1;
                (compression::NONE, &raw[..bytes_read])
            }
        };

        let header = ResponseHeader {
            file_id,
            compression: compression_type,
            block_idx,
            block_size: payload.len() as i16,
        };
        self.record.clear();
        header.write_to(&mut self.record);
        self.record.extend_from_slice(payload);

        self.files[file_id as usize].mark_sent(block_idx);
        if let Err(e) = self.chunks.push(&mut self.conn, &self.record, flush) {
            eprintln!("failed to write {} bytes: {}", self.record.len(), e);
            self.logger.error("send", &e.to_string());
        }
        SendResult::Sent
    }

    /// All expected blocks delivered: emit the sentinel and force it out.
    fn send_done(&mut self) {
        let header = ResponseHeader::done();
        if let Err(e) = self.chunks.push(&mut self.conn, &header.encode(), true) {
            eprintln!("failed to write done sentinel: {}", e);
            self.logger.error("send_done", &e.to_string());
        }
    }

    /// Drain the queue head(s) until the per-pass budget of actually-sent
    /// blocks is used up. Skipped blocks are free; errors are reported
    /// and skipped over.
    fn run_prefetching(&mut self) {
        let mut budget = PREFETCH_BLOCKS_PER_PASS;
        while budget > 0 {
            let Some(mut state) = self.prefetches.pop_front() else {
                break;
            };
            while budget > 0 && !state.done() {
                let idx = state.next_block();
                match self.send_block(state.file_id, idx, false) {
                    SendResult::Sent => budget -= 1,
                    SendResult::Skipped => {}
                    SendResult::Error => eprintln!("failed to send block {}", idx),
                }
            }
            if !state.done() {
                self.prefetches.push_front(state);
                break;
            }
        }
    }

    /// The client has everything it needs; it may still issue trailing
    /// requests, so the session keeps running.
    fn note_serving_complete(&mut self) {
        self.serving_complete = true;
        self.stats.bytes_sent = self.chunks.bytes_flushed();
        let seconds = self.elapsed_seconds();
        eprintln!(
            "streaming complete: misses: {}, of those unique: {}; sent compressed: {}, \
             uncompressed: {}, mb: {:.3}, total time taken: {:.3}s",
            self.stats.misses,
            self.stats.unique_misses,
            self.stats.blocks_compressed,
            self.stats.blocks_uncompressed,
            self.stats.bytes_sent as f64 / 1024.0 / 1024.0,
            seconds
        );
        self.logger.serving_complete(&self.stats, seconds);
    }

    fn finish(&mut self) {
        self.stats.bytes_sent = self.chunks.bytes_flushed();
        self.logger.done(&self.stats, self.elapsed_seconds());
    }

    fn elapsed_seconds(&self) -> f64 {
        self.start_time.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
    }
}
