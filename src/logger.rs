use crate::log::ServeStats;
use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

pub trait ServeLogger: Send + Sync {
    fn ready(&self, _files: usize) {}
    fn serving_complete(&self, _stats: &ServeStats, _seconds: f64) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn done(&self, _stats: &ServeStats, _seconds: f64) {}
}

pub struct NoopLogger;
impl ServeLogger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl ServeLogger for TextLogger {
    fn ready(&self, files: usize) {
        self.line(&format!("READY files={}", files));
    }
    fn serving_complete(&self, stats: &ServeStats, seconds: f64) {
        self.line(&format!(
            "SERVING_COMPLETE misses={} unique={} compressed={} uncompressed={} bytes={} seconds={seconds:.3}",
            stats.misses,
            stats.unique_misses,
            stats.blocks_compressed,
            stats.blocks_uncompressed,
            stats.bytes_sent
        ));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn done(&self, stats: &ServeStats, seconds: f64) {
        self.line(&format!(
            "DONE bytes={} seconds={seconds:.3}",
            stats.bytes_sent
        ));
    }
}
