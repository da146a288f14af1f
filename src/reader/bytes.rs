// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Byte-range reads (§4.4) and line-bounded byte reads (§4.5).

use crate::error::{CrateError, Result};

use super::Reader;

impl Reader {
    /// Read the exact byte range `[start_bytes, end_bytes)`, clamped to the
    /// archive's length. Returns fewer bytes than requested only when
    /// `end_bytes` runs past [`Reader::get_max_bytes`].
    pub fn read(&mut self, start_bytes: u64, end_bytes: u64) -> Result<Vec<u8>> {
        if start_bytes > end_bytes {
            return Err(CrateError::InvalidArgument(format!(
                "start_bytes {start_bytes} is after end_bytes {end_bytes}"
            )));
        }
        if start_bytes > self.get_max_bytes() {
            return Err(CrateError::InvalidArgument(format!(
                "start_bytes {start_bytes} is past end of archive ({} bytes)",
                self.get_max_bytes()
            )));
        }

        let mut out = Vec::new();
        self.read_into(start_bytes, end_bytes, &mut out)?;
        Ok(out)
    }

    /// Core streaming primitive shared by [`Reader::read`] and the
    /// line-aware scans in `lines.rs`.
    pub(crate) fn read_into(&mut self, start: u64, end: u64, out: &mut Vec<u8>) -> Result<u64> {
        let end = end.min(self.get_max_bytes());
        if start >= end {
            return Ok(0);
        }
        self.ensure_session(start)?;
        let session = self.session.as_mut().expect("session just established");
        session.deliver(end - start, out)
    }

    /// Extend `[start_bytes, end_bytes)` outward to whole line boundaries —
    /// backward to just after the previous `\n` (or to 0), forward to and
    /// including the next `\n` at or after `end_bytes` — then return the
    /// extended byte range's raw contents (§4.5, "line-aware byte reads").
    pub fn read_line_bytes(&mut self, start_bytes: u64, end_bytes: u64) -> Result<Vec<u8>> {
        if start_bytes > end_bytes {
            return Err(CrateError::InvalidArgument(format!(
                "start_bytes {start_bytes} is after end_bytes {end_bytes}"
            )));
        }
        let max_bytes = self.get_max_bytes();
        let end_bytes = end_bytes.min(max_bytes);

        let extended_start = self.extend_backward_to_line_start(start_bytes)?;
        let extended_end = self.extend_forward_past_newline(end_bytes)?;
        self.read(extended_start, extended_end)
    }

    /// Scan backward (by re-scanning forward from the covering checkpoint)
    /// for the offset just past the newline preceding `offset`. Falls back
    /// to earlier checkpoints when the covering region has no newline
    /// before `offset` (a line may span more than one checkpoint region).
    fn extend_backward_to_line_start(&mut self, offset: u64) -> Result<u64> {
        if offset == 0 {
            return Ok(0);
        }

        let mut region_idx = self
            .checkpoints
            .partition_point(|c| c.uc_offset <= offset);

        loop {
            let region_start = if region_idx == 0 {
                0
            } else {
                self.checkpoints[region_idx - 1].uc_offset
            };

            let mut buf = Vec::new();
            self.read_into(region_start, offset, &mut buf)?;
            if let Some(rel) = buf.iter().rposition(|&b| b == b'\n') {
                return Ok(region_start + rel as u64 + 1);
            }
            if region_start == 0 {
                return Ok(0);
            }
            region_idx -= 1;
        }
    }

    /// Scan forward from `offset` for the first `\n`, returning the offset
    /// just past it (or the archive length if none exists before EOF).
    fn extend_forward_past_newline(&mut self, offset: u64) -> Result<u64> {
        const CHUNK: u64 = 64 * 1024;
        let max_bytes = self.get_max_bytes();
        let mut cursor = offset;

        while cursor < max_bytes {
            let chunk_end = (cursor + CHUNK).min(max_bytes);
            let mut buf = Vec::new();
            self.read_into(cursor, chunk_end, &mut buf)?;
            if let Some(rel) = buf.iter().position(|&b| b == b'\n') {
                return Ok(cursor + rel as u64 + 1);
            }
            cursor = chunk_end;
        }
        Ok(max_bytes)
    }
}
