// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Checkpoint builder (C3, §4.3).

use std::fs::File;
use std::io::{BufReader, Read};

use crate::archive::{ArchiveHandle, ArchiveKind};
use crate::error::{CrateError, Result};
use crate::inflate::{gzip_compress, RawInflater, WindowMode};

use super::store::IndexStore;
use super::tar_members::record_tar_members;
use super::{CheckpointRecord, IndexMetadata, TarMemberRecord};

const DEFAULT_CHECKPOINT_SIZE: u64 = 32 * 1024 * 1024;
const DEFAULT_MAX_CHECKPOINT_SIZE: u64 = 512 * 1024 * 1024;
const DEFAULT_MAX_PARTS: u64 = 100_000_000;
const READ_CHUNK: usize = 16 * 1024;
const DECOMPRESS_SCRATCH: usize = 64 * 1024;

/// Recognized builder options (§6).
#[derive(Debug, Clone, Copy)]
pub struct IndexerOptions {
    pub checkpoint_size: u64,
    pub max_checkpoint_size: u64,
    pub max_parts: u64,
    pub force_rebuild: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            checkpoint_size: DEFAULT_CHECKPOINT_SIZE,
            max_checkpoint_size: DEFAULT_MAX_CHECKPOINT_SIZE,
            max_parts: DEFAULT_MAX_PARTS,
            force_rebuild: false,
        }
    }
}

impl IndexerOptions {
    /// Clamp the requested cadence to the configured maximum and to
    /// `ceil(file_size / max_parts)` (§4.3).
    fn effective_checkpoint_size(&self, file_size: u64) -> Result<u64> {
        if self.checkpoint_size == 0 {
            return Err(CrateError::InvalidArgument(
                "checkpoint_size must be non-zero".into(),
            ));
        }
        let mut size = self.checkpoint_size.min(self.max_checkpoint_size);
        if self.max_parts > 0 {
            let floor_for_max_parts = file_size.div_ceil(self.max_parts).max(1);
            size = size.max(floor_for_max_parts);
        }
        Ok(size)
    }
}

/// Ensure a valid, up-to-date index exists for `handle`, rebuilding it if
/// missing or stale, and return it open for querying.
#[tracing::instrument(level = "debug", skip_all, fields(name = %handle.logical_name))]
pub fn build_index(handle: &ArchiveHandle, options: &IndexerOptions) -> Result<IndexStore> {
    let mut store = IndexStore::open(handle.index_path())?;

    if !options.force_rebuild {
        if let Some(_file_id) = store.valid_file_id(handle)? {
            tracing::debug!("reusing cached index");
            return Ok(store);
        }
    }

    tracing::debug!("building fresh index");
    let checkpoint_size = options.effective_checkpoint_size(handle.byte_size)?;
    let (checkpoints, total_lines, total_uc_size) =
        compute_checkpoints(&handle.path, checkpoint_size)?;

    let tar_members = if handle.kind == ArchiveKind::TarGz {
        record_tar_members(&handle.path)?
    } else {
        Vec::new()
    };

    store.write_build(
        handle,
        &checkpoints,
        &tar_members,
        IndexMetadata {
            checkpoint_size,
            total_lines,
            total_uc_size,
        },
    )?;

    Ok(store)
}

struct PendingRegion {
    uc_offset: u64,
    c_offset: u64,
    bits: u8,
    dict: Vec<u8>,
    num_lines: u64,
}

/// Stream the DEFLATE input, capturing inflate state at block boundaries on
/// a size cadence (§4.3 steps 2-8). Returns the stored checkpoint rows plus
/// the archive-wide totals.
fn compute_checkpoints(path: &std::path::Path, checkpoint_size: u64) -> Result<(Vec<CheckpointRecord>, u64, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(READ_CHUNK, file);
    let mut inflater = RawInflater::new(WindowMode::GzipOrZlib)?;

    let mut checkpoints = Vec::new();
    let mut checkpoint_idx = 0u64;
    let mut total_newlines = 0u64;
    let mut pending: Option<PendingRegion> = None;
    // lines seen since the region currently accumulating (whether or not it
    // is `pending`, i.e. including the un-triggered leading region)
    let mut region_lines = 0u64;
    let mut region_start_uc = 0u64;

    let mut in_buf = vec![0u8; READ_CHUNK];
    let mut carry: Vec<u8> = Vec::new();
    let mut out_buf = vec![0u8; DECOMPRESS_SCRATCH];

    loop {
        if carry.is_empty() {
            let n = reader.read(&mut in_buf)?;
            if n == 0 && inflater.stream_end() {
                break;
            }
            carry.extend_from_slice(&in_buf[..n]);
            if n == 0 && carry.is_empty() {
                // No more input and decoder hasn't signalled end: truncated stream.
                if !inflater.stream_end() {
                    return Err(CrateError::CorruptArchive(
                        "unexpected end of compressed input".into(),
                    ));
                }
                break;
            }
        }

        let outcome = inflater.decompress_to_block_boundary(&carry, &mut out_buf)?;
        count_newlines(&out_buf[..outcome.bytes_out_written], &mut total_newlines, &mut region_lines);
        carry.drain(..outcome.bytes_in_consumed);

        if outcome.stream_end {
            break;
        }

        if outcome.at_block_boundary && !outcome.last_block {
            let total_out = inflater.total_out();
            let total_in = inflater.total_in();

            if total_out.saturating_sub(region_start_uc) >= checkpoint_size {
                if let Some(mut prev) = pending.take() {
                    prev.num_lines = region_lines;
                    checkpoints.push(CheckpointRecord {
                        checkpoint_idx,
                        uc_offset: prev.uc_offset,
                        uc_size: total_out - prev.uc_offset,
                        c_offset: prev.c_offset,
                        c_size: boundary_c_offset(total_in, outcome.unused_bits) - prev.c_offset,
                        bits: prev.bits,
                        dict_compressed: gzip_compress(&prev.dict)?,
                        num_lines: prev.num_lines,
                    });
                    checkpoint_idx += 1;
                }

                pending = Some(PendingRegion {
                    uc_offset: total_out,
                    c_offset: boundary_c_offset(total_in, outcome.unused_bits),
                    bits: outcome.unused_bits,
                    dict: inflater.get_dictionary()?,
                    num_lines: 0,
                });
                region_start_uc = total_out;
                region_lines = 0;
            } else if let Some(p) = pending.as_mut() {
                p.num_lines = region_lines;
            }
        }
    }

    let total_uc_size = inflater.total_out();
    let total_in = inflater.total_in();
    if let Some(mut prev) = pending.take() {
        prev.num_lines = region_lines;
        checkpoints.push(CheckpointRecord {
            checkpoint_idx,
            uc_offset: prev.uc_offset,
            uc_size: total_uc_size - prev.uc_offset,
            c_offset: prev.c_offset,
            c_size: total_in - prev.c_offset,
            bits: prev.bits,
            dict_compressed: gzip_compress(&prev.dict)?,
            num_lines: prev.num_lines,
        });
    }

    Ok((checkpoints, total_newlines, total_uc_size))
}

/// The byte offset of the start of the block that begins right after a
/// `Z_BLOCK` boundary: if bits are left unused in the last consumed byte,
/// that byte is shared with the following block, so the seek point backs
/// up by one.
fn boundary_c_offset(total_in: u64, unused_bits: u8) -> u64 {
    if unused_bits > 0 {
        total_in.saturating_sub(1)
    } else {
        total_in
    }
}

fn count_newlines(bytes: &[u8], total: &mut u64, region: &mut u64) {
    let n = bytes.iter().filter(|&&b| b == b'\n').count() as u64;
    *total += n;
    *region += n;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_gzip(path: &std::path::Path, bytes: &[u8]) {
        let file = File::create(path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn small_archive_has_no_stored_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.gz");
        write_gzip(&path, b"alpha\nbeta\ngamma\n");

        let (checkpoints, total_lines, total_uc_size) =
            compute_checkpoints(&path, DEFAULT_CHECKPOINT_SIZE).unwrap();
        assert!(checkpoints.is_empty());
        assert_eq!(total_lines, 3);
        assert_eq!(total_uc_size, 18);
    }

    #[test]
    fn large_archive_produces_multiple_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.gz");
        let pattern = b"0123456789abcdef";
        let mut data = Vec::with_capacity(64 * 1024 * 1024);
        while data.len() < 64 * 1024 * 1024 {
            data.extend_from_slice(pattern);
        }
        write_gzip(&path, &data);

        let (checkpoints, total_lines, total_uc_size) =
            compute_checkpoints(&path, 16 * 1024 * 1024).unwrap();
        assert!(checkpoints.len() >= 3);
        assert_eq!(total_lines, 0);
        assert_eq!(total_uc_size, data.len() as u64);

        let mut expected_offset = checkpoints[0].uc_offset;
        for cp in &checkpoints {
            assert_eq!(cp.uc_offset, expected_offset);
            assert!(cp.bits <= 7);
            expected_offset += cp.uc_size;
        }
        assert_eq!(expected_offset, total_uc_size);
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let opts = IndexerOptions {
            checkpoint_size: 0,
            ..Default::default()
        };
        assert!(opts.effective_checkpoint_size(100).is_err());
    }
}
