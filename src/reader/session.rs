// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The restartable, forward-only decompression session backing the reader
//! (§4.4 "Streaming model"). A session holds the file handle, the inflate
//! state, and the current uncompressed position; the reader caches at most
//! one.

use std::fs::File;
use std::io::Read;

use positioned_io::ReadAt;

use crate::error::{CrateError, Result};
use crate::index::CheckpointRecord;
use crate::inflate::{gzip_decompress, RawInflater, WindowMode};

const COMPRESSED_READ_CHUNK: usize = 16 * 1024;

/// One in-progress decompression pass, resumable only by creating a fresh
/// session at the same logical position (see [`Session::covers`]).
pub struct Session {
    file: File,
    c_pos: u64,
    inflater: RawInflater,
    carry: Vec<u8>,
    /// Current uncompressed position the session has delivered/discarded up to.
    pub pos: u64,
    scratch_size: usize,
}

impl Session {
    /// Open at uncompressed offset 0: no checkpoint needed, gzip-framed.
    pub fn at_start(path: &std::path::Path, scratch_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            c_pos: 0,
            inflater: RawInflater::new(WindowMode::GzipOrZlib)?,
            carry: Vec::new(),
            pos: 0,
            scratch_size,
        })
    }

    /// Seek algorithm for `start_bytes > 0` (§4.4): restore the inflater's
    /// preset dictionary and bit-aligned position from `checkpoint`.
    pub fn at_checkpoint(path: &std::path::Path, checkpoint: &CheckpointRecord, scratch_size: usize) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut inflater = RawInflater::new(WindowMode::Raw)?;

        if checkpoint.bits > 0 {
            let mut byte = [0u8; 1];
            file.read_exact_at(checkpoint.c_offset, &mut byte)?;
            let value = (byte[0] >> (8 - checkpoint.bits)) as i32;
            inflater.prime(checkpoint.bits, value)?;
        }

        let dict = gzip_decompress(&checkpoint.dict_compressed)?;
        if dict.len() != 32 * 1024 && checkpoint.uc_offset != 0 {
            return Err(CrateError::CorruptIndex(format!(
                "checkpoint dictionary is {} bytes, expected 32768",
                dict.len()
            )));
        }
        if !dict.is_empty() {
            inflater.set_dictionary(&dict)?;
        }

        let c_start = checkpoint.c_offset + if checkpoint.bits > 0 { 1 } else { 0 };

        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(c_start))?;

        Ok(Self {
            file,
            c_pos: c_start,
            inflater,
            carry: Vec::new(),
            pos: checkpoint.uc_offset,
            scratch_size,
        })
    }

    /// Whether this open session can continue serving a request that starts
    /// exactly where the last one left off.
    pub fn covers(&self, start_bytes: u64) -> bool {
        self.pos == start_bytes
    }

    /// Discard `n` uncompressed bytes (used to skip from a checkpoint's
    /// `uc_offset` to the requested start, or from a synthetic zero
    /// checkpoint). Returns the number actually discarded (less than `n`
    /// only at EOF).
    pub fn discard(&mut self, n: u64) -> Result<u64> {
        self.pump(n, None)
    }

    /// Deliver up to `n` uncompressed bytes into `out`. Returns the number
    /// actually written (less than `n` only at EOF).
    pub fn deliver(&mut self, n: u64, out: &mut Vec<u8>) -> Result<u64> {
        self.pump(n, Some(out))
    }

    fn pump(&mut self, mut remaining: u64, mut sink: Option<&mut Vec<u8>>) -> Result<u64> {
        let mut produced = 0u64;
        let mut read_buf = [0u8; COMPRESSED_READ_CHUNK];
        let mut scratch = vec![0u8; self.scratch_size];

        while remaining > 0 {
            if self.carry.is_empty() {
                let n = self.file.read(&mut read_buf)?;
                self.c_pos += n as u64;
                if n == 0 {
                    // EOF on the compressed side: if the inflater hasn't
                    // signalled stream end, remaining uncompressed bytes
                    // simply don't exist (truncate to EOF per §4.4).
                    break;
                }
                self.carry.extend_from_slice(&read_buf[..n]);
            }

            let cap = scratch.len().min(remaining as usize).max(1);
            let outcome = self.inflater.decompress(&self.carry, &mut scratch[..cap])?;
            self.carry.drain(..outcome.bytes_in_consumed);

            let written = outcome.bytes_out_written as u64;
            let take = written.min(remaining);
            if let Some(out) = sink.as_deref_mut() {
                out.extend_from_slice(&scratch[..take as usize]);
            }
            produced += take;
            remaining -= take;
            self.pos += take;

            if outcome.stream_end {
                break;
            }
        }

        Ok(produced)
    }
}
