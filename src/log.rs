//! Per-session serve records, appended as JSON lines

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Counters accumulated over one serve session.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeStats {
    /// BLOCK_MISSING requests received, valid or not
    pub misses: u64,
    /// Misses that caused a block to actually go out
    pub unique_misses: u64,
    pub blocks_compressed: u64,
    pub blocks_uncompressed: u64,
    /// Bytes flushed to the connection, chunk framing included
    pub bytes_sent: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum SessionOutcome {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionLogEntry {
    pub timestamp: String,
    pub outcome: SessionOutcome,
    pub files: usize,
    pub seconds: f64,
    pub stats: ServeStats,
}

impl SessionLogEntry {
    pub fn new(outcome: SessionOutcome, files: usize, seconds: f64, stats: ServeStats) -> Self {
        SessionLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            outcome,
            files,
            seconds,
            stats,
        }
    }
}

pub struct SessionLog {
    log_file_path: PathBuf,
}

impl SessionLog {
    pub fn new(path: &Path) -> Self {
        SessionLog { log_file_path: path.to_path_buf() }
    }

    pub fn add_entry(&self, entry: &SessionLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("failed to open session log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
