//! Inbound stream resynchronization and request extraction
//!
//! The client interleaves plain log text with magic-prefixed binary
//! request records on the same stream. Everything before a magic is
//! forwarded verbatim to the log sink; records are decoded and handed
//! to the serve loop.

use crate::protocol::{timeouts, MAGIC, READ_BUFFER_SIZE, REQUEST_SIZE};
use crate::transport::{Readiness, Transport};
use crate::wire::Request;
use std::io::Write;
use std::time::Duration;

enum Outcome {
    Record([u8; REQUEST_SIZE]),
    Idle,
    Terminal,
}

/// Buffered inbound bytes plus the scan state that finds request
/// records at arbitrary byte boundaries.
pub struct InboundBuffer {
    buf: Vec<u8>,
    received: u64,
}

impl InboundBuffer {
    pub fn new() -> InboundBuffer {
        InboundBuffer { buf: Vec::with_capacity(READ_BUFFER_SIZE), received: 0 }
    }

    /// Total bytes ever received from the connection.
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Extract the next request. `None` means nothing arrived in time and
    /// the caller should do other work. A dead connection, or a blocking
    /// timeout after serving-complete, synthesizes `Destroy`.
    pub fn read_request(
        &mut self,
        conn: &mut impl Transport,
        sink: &mut dyn Write,
        blocking: bool,
        serving_complete: bool,
    ) -> Option<Request> {
        match self.next_record(conn, sink, blocking, serving_complete) {
            Outcome::Record(raw) => Some(Request::decode(&raw)),
            Outcome::Idle => None,
            Outcome::Terminal => Some(Request::Destroy),
        }
    }

    fn next_record(
        &mut self,
        conn: &mut impl Transport,
        sink: &mut dyn Write,
        blocking: bool,
        serving_complete: bool,
    ) -> Outcome {
        loop {
            // Look for the magic. A window is only tested when all 4 bytes
            // are present, so a record straddling two reads is never
            // mistaken for text; at most 3 trailing bytes wait for the
            // next read.
            let mut pos = 0;
            let mut found = false;
            while pos + MAGIC.len() <= self.buf.len() {
                if &self.buf[pos..pos + MAGIC.len()] == MAGIC {
                    found = true;
                    break;
                }
                pos += 1;
            }

            if pos > 0 {
                let _ = sink.write_all(&self.buf[..pos]);
                self.buf.drain(..pos);
            }

            if found && self.buf.len() >= MAGIC.len() + REQUEST_SIZE {
                let mut raw = [0u8; REQUEST_SIZE];
                raw.copy_from_slice(&self.buf[MAGIC.len()..MAGIC.len() + REQUEST_SIZE]);
                self.buf.drain(..MAGIC.len() + REQUEST_SIZE);
                return Outcome::Record(raw);
            }

            let timeout = if blocking { timeouts::POLL } else { Duration::ZERO };
            match conn.wait_readable(timeout) {
                Ok(Readiness::Readable) => {
                    let start = self.buf.len();
                    self.buf.resize(start + READ_BUFFER_SIZE, 0);
                    match conn.read(&mut self.buf[start..]) {
                        Ok(0) => {
                            self.buf.truncate(start);
                            return self.hang_up(sink);
                        }
                        Ok(n) => {
                            self.buf.truncate(start + n);
                            self.received += n as u64;
                        }
                        Err(e) => {
                            self.buf.truncate(start);
                            eprintln!("failed to read from connection: {}", e);
                            return self.hang_up(sink);
                        }
                    }
                }
                Ok(Readiness::TimedOut) => {
                    if blocking {
                        eprintln!("timed out waiting for data from device");
                        if serving_complete {
                            return Outcome::Terminal;
                        }
                    }
                    return Outcome::Idle;
                }
                Err(e) => {
                    eprintln!("failed to poll connection: {}", e);
                    return self.hang_up(sink);
                }
            }
        }
    }

    /// Connection is gone: route whatever is still buffered to the sink.
    fn hang_up(&mut self, sink: &mut dyn Write) -> Outcome {
        if !self.buf.is_empty() {
            let _ = sink.write_all(&self.buf);
            self.buf.clear();
        }
        Outcome::Terminal
    }
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read};

    /// Replays scripted reads; an exhausted script is either EOF or idle.
    struct Script {
        chunks: VecDeque<Vec<u8>>,
        eof_when_drained: bool,
    }

    impl Script {
        fn new(chunks: &[&[u8]], eof_when_drained: bool) -> Script {
            Script {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                eof_when_drained,
            }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Script {
        fn wait_readable(&mut self, _timeout: Duration) -> io::Result<Readiness> {
            if self.chunks.is_empty() && !self.eof_when_drained {
                Ok(Readiness::TimedOut)
            } else {
                Ok(Readiness::Readable)
            }
        }
    }

    fn destroy_wire() -> Vec<u8> {
        Request::Destroy.encode().to_vec()
    }

    #[test]
    fn test_text_before_magic_goes_to_sink() {
        let mut wire = b"hello\n".to_vec();
        wire.extend_from_slice(&Request::Prefetch { file_id: 1 }.encode());
        let mut conn = Script::new(&[&wire], false);
        let mut sink = Vec::new();
        let mut inbound = InboundBuffer::new();

        let req = inbound.read_request(&mut conn, &mut sink, false, false);
        assert_eq!(req, Some(Request::Prefetch { file_id: 1 }));
        assert_eq!(sink, b"hello\n");
        assert_eq!(inbound.bytes_received(), wire.len() as u64);
    }

    #[test]
    fn test_magic_split_across_reads() {
        let wire = destroy_wire();
        let mut conn = Script::new(&[b"log ", &wire[..2], &wire[2..]], false);
        let mut sink = Vec::new();
        let mut inbound = InboundBuffer::new();

        let req = inbound.read_request(&mut conn, &mut sink, true, false);
        assert_eq!(req, Some(Request::Destroy));
        assert_eq!(sink, b"log ");
    }

    #[test]
    fn test_partial_record_waits_for_more() {
        let wire = destroy_wire();
        let mut conn = Script::new(&[&wire[..6]], false);
        let mut sink = Vec::new();
        let mut inbound = InboundBuffer::new();

        // Non-blocking: magic seen but the record is incomplete
        assert_eq!(inbound.read_request(&mut conn, &mut sink, false, false), None);
        assert!(sink.is_empty());

        conn.chunks.push_back(wire[6..].to_vec());
        let req = inbound.read_request(&mut conn, &mut sink, false, false);
        assert_eq!(req, Some(Request::Destroy));
    }

    #[test]
    fn test_eof_flushes_residual_and_synthesizes_destroy() {
        let mut conn = Script::new(&[b"tail without a record"], true);
        let mut sink = Vec::new();
        let mut inbound = InboundBuffer::new();

        let req = inbound.read_request(&mut conn, &mut sink, true, false);
        assert_eq!(req, Some(Request::Destroy));
        assert_eq!(sink, b"tail without a record");
    }

    #[test]
    fn test_blocking_timeout_terminal_only_after_serving_complete() {
        let mut sink = Vec::new();
        let mut inbound = InboundBuffer::new();

        let mut conn = Script::new(&[], false);
        assert_eq!(inbound.read_request(&mut conn, &mut sink, true, false), None);
        assert_eq!(
            inbound.read_request(&mut conn, &mut sink, true, true),
            Some(Request::Destroy)
        );
    }

    #[test]
    fn test_back_to_back_records_in_one_read() {
        let mut wire = Request::Prefetch { file_id: 0 }.encode().to_vec();
        wire.extend_from_slice(&Request::Prefetch { file_id: 1 }.encode());
        let mut conn = Script::new(&[&wire], false);
        let mut sink = Vec::new();
        let mut inbound = InboundBuffer::new();

        assert_eq!(
            inbound.read_request(&mut conn, &mut sink, false, false),
            Some(Request::Prefetch { file_id: 0 })
        );
        assert_eq!(
            inbound.read_request(&mut conn, &mut sink, false, false),
            Some(Request::Prefetch { file_id: 1 })
        );
        assert!(sink.is_empty());
    }
}
