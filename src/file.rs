//! Per-file streaming state: handle, size, and the sent-block map

use crate::protocol::{BlockIdx, FileId, BLOCK_SIZE};
use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// One file being served. The sent map and its cached count only change
/// through [`SourceFile::mark_sent`], which keeps them coherent.
pub struct SourceFile {
    pub id: FileId,
    pub path: PathBuf,
    pub size: u64,
    handle: File,
    sent: Vec<bool>,
    sent_count: usize,
}

impl SourceFile {
    pub fn new(id: FileId, path: PathBuf, handle: File, size: u64) -> SourceFile {
        let block_count = (size as usize).div_ceil(BLOCK_SIZE);
        SourceFile {
            id,
            path,
            size,
            handle,
            sent: vec![false; block_count],
            sent_count: 0,
        }
    }

    pub fn open(id: FileId, path: &Path) -> Result<SourceFile> {
        let handle =
            File::open(path).with_context(|| format!("open {}", path.display()))?;
        let size = handle
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        Ok(SourceFile::new(id, path.to_path_buf(), handle, size))
    }

    pub fn block_count(&self) -> usize {
        self.sent.len()
    }

    pub fn contains_block(&self, block_idx: BlockIdx) -> bool {
        block_idx >= 0 && (block_idx as usize) < self.sent.len()
    }

    pub fn is_sent(&self, block_idx: BlockIdx) -> bool {
        self.sent[block_idx as usize]
    }

    pub fn sent_count(&self) -> usize {
        self.sent_count
    }

    pub fn fully_sent(&self) -> bool {
        self.sent_count == self.sent.len()
    }

    /// Sole mutator of the sent map. Idempotent.
    pub fn mark_sent(&mut self, block_idx: BlockIdx) {
        let slot = &mut self.sent[block_idx as usize];
        if !*slot {
            *slot = true;
            self.sent_count += 1;
        }
    }

    /// Positional read of one block. Short totals only occur at the final
    /// block of a file whose size is not block-aligned; a failed read is
    /// an `Err`, never conflated with end-of-file.
    pub fn read_block(&self, block_idx: BlockIdx, buf: &mut [u8]) -> io::Result<usize> {
        let offset = block_idx as u64 * BLOCK_SIZE as u64;
        let mut total = 0;
        while total < buf.len() {
            let n = self.read_at(&mut buf[total..], offset + total as u64)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.handle.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.handle.seek_read(buf, offset)
    }
}
