// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Tar member boundary recording for `TarGz` archives (SPEC_FULL §4.3,
//! §6; resolves the open question in spec.md §9 by recording boundaries
//! during build without yet exposing member-level reads).

use std::fs::File;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::Result;

use super::TarMemberRecord;

/// Decompress `path` end to end and walk its POSIX ustar/pax entries,
/// recording each member's name and uncompressed byte span.
pub fn record_tar_members(path: &Path) -> Result<Vec<TarMemberRecord>> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let mut members = Vec::new();
    for (idx, entry) in archive.entries()?.enumerate() {
        let entry = entry?;
        let header_uc_offset = entry.raw_header_position();
        let uc_start = entry.raw_file_position();
        let uc_size = entry.header().size()?;
        let name = entry.path()?.to_string_lossy().into_owned();

        members.push(TarMemberRecord {
            member_idx: idx as u64,
            name,
            uc_start,
            uc_size,
            header_uc_offset,
        });
    }
    Ok(members)
}
