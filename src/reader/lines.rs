// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Line-range reads (§4.5): map a `[start_line, end_line)` range onto the
//! underlying bytes using the stored checkpoints' per-region line counts.

use crate::error::{CrateError, Result};

use super::Reader;

const SCAN_CHUNK: u64 = 64 * 1024;

impl Reader {
    /// Read lines `[start_line, end_line)`, 0-indexed, as the concatenation
    /// of those lines, each terminated by `\n` (§4.4/§6, §8 scenario 1).
    /// A trailing line with no terminating `\n` in the archive gets a
    /// synthetic one appended, per §9's trailing-newline policy, so every
    /// line in the result always ends in `\n`.
    pub fn read_lines(&mut self, start_line: u64, end_line: u64) -> Result<Vec<u8>> {
        if start_line > end_line {
            return Err(CrateError::InvalidArgument(format!(
                "start_line {start_line} is after end_line {end_line}"
            )));
        }
        let total_lines = self.get_num_lines();
        if start_line > total_lines {
            return Err(CrateError::InvalidArgument(format!(
                "start_line {start_line} is past end of archive ({total_lines} lines)"
            )));
        }
        if start_line == end_line {
            return Ok(Vec::new());
        }

        let start_byte = self.byte_offset_of_line(start_line)?;
        let reaches_trailing_line = end_line >= total_lines;
        let end_byte = if reaches_trailing_line {
            self.get_max_bytes()
        } else {
            self.byte_offset_of_line(end_line)?
        };

        let mut raw = self.read(start_byte, end_byte)?;
        if reaches_trailing_line && raw.last() != Some(&b'\n') {
            raw.push(b'\n');
        }
        Ok(raw)
    }

    /// The byte offset at which line `line` (0-indexed) begins, resolved via
    /// the covering checkpoint region and a forward newline scan.
    fn byte_offset_of_line(&mut self, line: u64) -> Result<u64> {
        let (region_start, _checkpoint, skip_lines) = self.line_region_for(line);
        if skip_lines == 0 {
            return Ok(region_start);
        }

        let max_bytes = self.get_max_bytes();
        let mut cursor = region_start;
        let mut remaining = skip_lines;

        while cursor < max_bytes {
            let chunk_end = (cursor + SCAN_CHUNK).min(max_bytes);
            let mut buf = Vec::new();
            self.read_into(cursor, chunk_end, &mut buf)?;
            if buf.is_empty() {
                break;
            }
            for (i, &b) in buf.iter().enumerate() {
                if b == b'\n' {
                    remaining -= 1;
                    if remaining == 0 {
                        return Ok(cursor + i as u64 + 1);
                    }
                }
            }
            cursor = chunk_end;
        }

        Err(CrateError::InvalidArgument(format!(
            "line {line} is past end of archive"
        )))
    }
}
