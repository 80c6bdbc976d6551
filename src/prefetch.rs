//! Background prefetch state: a file plus a half-open block range

use crate::file::SourceFile;
use crate::protocol::{BlockIdx, FileId};

/// Cursor over `[cursor, end)` of one file's blocks. The cursor only
/// moves forward; the state is discarded once drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchState {
    pub file_id: FileId,
    cursor: BlockIdx,
    end: BlockIdx,
}

impl PrefetchState {
    /// Covers every block of the file.
    pub fn whole_file(file: &SourceFile) -> PrefetchState {
        PrefetchState {
            file_id: file.id,
            cursor: 0,
            end: file.block_count() as BlockIdx,
        }
    }

    /// Covers `[start, start + count)`, clamped to the file's end.
    pub fn readahead(file: &SourceFile, start: BlockIdx, count: i32) -> PrefetchState {
        PrefetchState {
            file_id: file.id,
            cursor: start,
            end: (start + count).min(file.block_count() as BlockIdx),
        }
    }

    pub fn done(&self) -> bool {
        self.cursor >= self.end
    }

    /// Yields the next block index and advances the cursor.
    pub fn next_block(&mut self) -> BlockIdx {
        let idx = self.cursor;
        self.cursor += 1;
        idx
    }
}
