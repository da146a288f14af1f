// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Format detection (C1) and the immutable archive handle (§3).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};

use crate::error::{CrateError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const TAR_PROBE_BYTES: usize = 512;

/// Result of §4.1's format detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gzip,
    TarGz,
    Unknown,
}

/// Identify gzip vs tar-in-gzip by magic bytes and an inner TAR header check.
#[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn detect_archive_kind(path: impl AsRef<Path>) -> Result<ArchiveKind> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    if read < 2 || magic != GZIP_MAGIC {
        return Ok(ArchiveKind::Unknown);
    }

    // Re-open: GzDecoder wants to parse the header itself from offset 0.
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut probe = [0u8; TAR_PROBE_BYTES];
    let mut filled = 0;
    while filled < TAR_PROBE_BYTES {
        match decoder.read(&mut probe[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                tracing::debug!(error = %e, "gzip decode stopped during tar probe");
                break;
            }
        }
    }

    if filled == TAR_PROBE_BYTES && is_valid_ustar_header(&probe) {
        Ok(ArchiveKind::TarGz)
    } else {
        Ok(ArchiveKind::Gzip)
    }
}

/// Validate the octal checksum field of a 512-byte POSIX ustar/pax header
/// block against the sum of all bytes in the block (checksum field itself
/// is treated as spaces while summing, per the tar format).
fn is_valid_ustar_header(block: &[u8; TAR_PROBE_BYTES]) -> bool {
    const CHECKSUM_OFFSET: usize = 148;
    const CHECKSUM_LEN: usize = 8;

    let stored = &block[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN];
    let stored_str = match std::str::from_utf8(stored) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let stored_value = match u32::from_str_radix(stored_str.trim_matches(|c: char| {
        c == '\0' || c == ' '
    }), 8) {
        Ok(v) => v,
        Err(_) => return false,
    };

    let mut sum: u32 = 0;
    for (i, &b) in block.iter().enumerate() {
        if (CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN).contains(&i) {
            sum += b' ' as u32;
        } else {
            sum += b as u32;
        }
    }
    sum == stored_value
}

/// Immutable reference to an on-disk compressed file (§3).
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub logical_name: String,
    pub byte_size: u64,
    pub mtime: SystemTime,
    pub sha256: [u8; 32],
    pub kind: ArchiveKind,
}

impl ArchiveHandle {
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path)?;
        let logical_name = path
            .file_name()
            .ok_or_else(|| CrateError::InvalidArgument("archive path has no file name".into()))?
            .to_string_lossy()
            .into_owned();
        let kind = detect_archive_kind(&path)?;
        let sha256 = sha256_of_file(&path)?;

        Ok(Self {
            path,
            logical_name,
            byte_size: metadata.len(),
            mtime: metadata.modified()?,
            sha256,
            kind,
        })
    }

    /// `.idx` for gzip, `.tar.idx` for tar-in-gzip (§6).
    pub fn index_path(&self) -> PathBuf {
        let ext = match self.kind {
            ArchiveKind::TarGz => "tar.idx",
            _ => "idx",
        };
        let mut p = self.path.clone();
        let file_name = format!(
            "{}.{ext}",
            p.file_name().unwrap_or_default().to_string_lossy()
        );
        p.set_file_name(file_name);
        p
    }
}

/// SHA-256 over the full compressed bytes, used as the cache-validation
/// fingerprint (§3, §4.2).
pub fn sha256_of_file(path: impl AsRef<Path>) -> Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
