//! incrserve - streaming server for incremental on-demand file delivery
//!
//! A remote device mounts a set of files lazily and fetches 4096-byte
//! blocks through a request/response protocol multiplexed over one
//! bidirectional byte stream. The server answers misses with minimum
//! latency, prefetches whole files in the background, compresses blocks
//! when it pays off, coalesces outbound traffic into framed chunks and
//! routes interleaved client log text to a separate sink.

pub mod batcher;
pub mod compress;
pub mod file;
pub mod log;
pub mod logger;
pub mod prefetch;
pub mod protocol;
pub mod reader;
pub mod server;
pub mod transport;
pub mod wire;

pub use server::IncrementalServer;
