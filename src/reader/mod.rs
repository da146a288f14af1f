// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Random-access reader (C4) and line-aware stream (C5), §4.4-§4.5.
//!
//! The reader resumes decompression from the nearest stored checkpoint
//! instead of from the start of the archive, and caches at most one open
//! [`session::Session`] so that sequential reads never pay the seek cost
//! twice.

mod bytes;
mod lines;
mod session;

use std::path::Path;

use crate::archive::ArchiveHandle;
use crate::error::Result;
use crate::index::{build_index, CheckpointRecord, IndexMetadata, IndexStore, IndexerOptions};

use session::Session;

/// Recognized reader options (§6).
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Size of the internal decompression scratch buffer.
    pub buffer_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
        }
    }
}

impl ReaderOptions {
    const MIN_BUFFER_SIZE: usize = 1;
    const MAX_BUFFER_SIZE: usize = 1024 * 1024;

    /// Clamp `buffer_size` into `[1, 1 MiB]` (§6).
    fn clamped_buffer_size(&self) -> usize {
        self.buffer_size.clamp(Self::MIN_BUFFER_SIZE, Self::MAX_BUFFER_SIZE)
    }
}

/// A random-access, checkpoint-resuming reader over one archive.
pub struct Reader {
    handle: ArchiveHandle,
    #[allow(dead_code)]
    store: IndexStore,
    checkpoints: Vec<CheckpointRecord>,
    metadata: IndexMetadata,
    /// `line_region_starts[0] == 0`; `line_region_starts[k]` for `k >= 1` is
    /// `checkpoints[k - 1].uc_offset` (§4.5's line-to-byte mapping).
    line_region_starts: Vec<u64>,
    /// `line_region_lines_before[k]` is the number of lines strictly before
    /// `line_region_starts[k]`.
    line_region_lines_before: Vec<u64>,
    session: Option<Session>,
    #[allow(dead_code)]
    options: ReaderOptions,
}

impl Reader {
    /// Open `path`, building or reusing its checkpoint index.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let handle = ArchiveHandle::open(path)?;
        let store = build_index(&handle, &IndexerOptions::default())?;
        Self::from_store(handle, store, options)
    }

    /// Open against an already-built index (e.g. one built with custom
    /// [`IndexerOptions`]).
    pub fn from_store(handle: ArchiveHandle, store: IndexStore, options: ReaderOptions) -> Result<Self> {
        let options = ReaderOptions {
            buffer_size: options.clamped_buffer_size(),
        };

        let checkpoints = store.checkpoints(&handle.logical_name)?;
        let metadata = store.metadata(&handle.logical_name)?;

        let stored_lines: u64 = checkpoints.iter().map(|c| c.num_lines).sum();
        let leading_lines = metadata.total_lines.saturating_sub(stored_lines);

        let mut line_region_starts = vec![0u64];
        let mut line_region_lines_before = vec![0u64];
        for (i, cp) in checkpoints.iter().enumerate() {
            let region_lines = if i == 0 { leading_lines } else { checkpoints[i - 1].num_lines };
            line_region_starts.push(cp.uc_offset);
            line_region_lines_before.push(line_region_lines_before[i] + region_lines);
        }

        Ok(Self {
            handle,
            store,
            checkpoints,
            metadata,
            line_region_starts,
            line_region_lines_before,
            session: None,
            options,
        })
    }

    /// Total uncompressed byte length of the archive (§4.4).
    pub fn get_max_bytes(&self) -> u64 {
        self.metadata.total_uc_size
    }

    /// Number of `\n` delimiters in the archive (§4.5). A trailing,
    /// unterminated final line is not counted here, but is still
    /// addressable: `read_lines(n, n + 1)` with `n == get_num_lines()`
    /// returns it.
    pub fn get_num_lines(&self) -> u64 {
        self.metadata.total_lines
    }

    /// The largest stored checkpoint with `uc_offset <= target`, if any.
    fn checkpoint_covering(&self, target: u64) -> Option<&CheckpointRecord> {
        let idx = self
            .checkpoints
            .partition_point(|c| c.uc_offset <= target);
        idx.checked_sub(1).map(|i| &self.checkpoints[i])
    }

    /// Resolve `target_line` to the region it falls in, returning the
    /// region's starting byte offset, the checkpoint to resume from (`None`
    /// for the leading, unindexed region), and how many newlines to skip
    /// past the region start to reach `target_line`.
    fn line_region_for(&self, target_line: u64) -> (u64, Option<&CheckpointRecord>, u64) {
        let idx = self
            .line_region_lines_before
            .partition_point(|&v| v <= target_line)
            .saturating_sub(1);
        let start = self.line_region_starts[idx];
        let lines_before = self.line_region_lines_before[idx];
        let checkpoint = if idx == 0 {
            None
        } else {
            Some(&self.checkpoints[idx - 1])
        };
        (start, checkpoint, target_line - lines_before)
    }

    /// Ensure `self.session` is positioned to deliver bytes starting exactly
    /// at `start` (§4.4's seek algorithm), creating a fresh session only
    /// when the cached one does not already sit there.
    fn ensure_session(&mut self, start: u64) -> Result<()> {
        if let Some(session) = &self.session {
            if session.covers(start) {
                return Ok(());
            }
        }

        let mut session = match self.checkpoint_covering(start) {
            Some(cp) => Session::at_checkpoint(&self.handle.path, cp, self.options.buffer_size)?,
            None => Session::at_start(&self.handle.path, self.options.buffer_size)?,
        };
        let skip = start - session.pos;
        if skip > 0 {
            session.discard(skip)?;
        }
        self.session = Some(session);
        Ok(())
    }
}
