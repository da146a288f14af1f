// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Persistent index store (C2, §4.2) — a single-file SQLite database per
//! archive, holding file identity, ordered checkpoint records, and
//! per-archive totals.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::archive::ArchiveHandle;
use crate::error::{CrateError, Result};

use super::{CheckpointRecord, IndexMetadata, TarMemberRecord};

/// Schema revision tagged via `PRAGMA user_version`; a mismatch is treated
/// the same as a stale index (rebuild in place).
const SCHEMA_VERSION: i64 = 1;

pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    /// Open (creating if absent) the index database at `path`, ensuring the
    /// schema exists and matches [`SCHEMA_VERSION`].
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            tracing::debug!(found = version, expected = SCHEMA_VERSION, "index schema mismatch, rebuilding");
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS files;
                 DROP TABLE IF EXISTS checkpoints;
                 DROP TABLE IF EXISTS metadata;
                 DROP TABLE IF EXISTS tar_members;",
            )?;
        }

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                logical_name TEXT NOT NULL UNIQUE,
                byte_size INTEGER NOT NULL,
                mtime_unix_nanos INTEGER NOT NULL,
                sha256 BLOB NOT NULL,
                archive_kind INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                file_id INTEGER NOT NULL REFERENCES files(id),
                checkpoint_idx INTEGER NOT NULL,
                uc_offset INTEGER NOT NULL,
                uc_size INTEGER NOT NULL,
                c_offset INTEGER NOT NULL,
                c_size INTEGER NOT NULL,
                bits INTEGER NOT NULL,
                dict_compressed BLOB NOT NULL,
                num_lines INTEGER NOT NULL,
                PRIMARY KEY (file_id, checkpoint_idx)
            );
            CREATE INDEX IF NOT EXISTS checkpoints_by_uc_offset
                ON checkpoints (file_id, uc_offset);

            CREATE TABLE IF NOT EXISTS metadata (
                file_id INTEGER PRIMARY KEY REFERENCES files(id),
                checkpoint_size INTEGER NOT NULL,
                total_lines INTEGER NOT NULL,
                total_uc_size INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tar_members (
                file_id INTEGER NOT NULL REFERENCES files(id),
                member_idx INTEGER NOT NULL,
                name TEXT NOT NULL,
                uc_start INTEGER NOT NULL,
                uc_size INTEGER NOT NULL,
                header_uc_offset INTEGER NOT NULL,
                PRIMARY KEY (file_id, member_idx)
            );",
        )?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// Returns `Some(file_id)` iff a row exists for this logical name whose
    /// stored sha256 matches the handle's current sha256. A stale `mtime`
    /// alone does **not** invalidate the cache (scenario 4, §8).
    pub fn valid_file_id(&self, handle: &ArchiveHandle) -> Result<Option<i64>> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT id, sha256 FROM files WHERE logical_name = ?1",
                params![handle.logical_name],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        match row {
            Some((id, sha)) if sha == handle.sha256.to_vec() => Ok(Some(id)),
            Some(_) => {
                tracing::debug!(name = %handle.logical_name, "sha256 mismatch, index stale");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Begin a fresh build for `handle`: deletes any existing rows for this
    /// logical name and inserts a new `files` row. The caller is
    /// responsible for wrapping checkpoint/metadata writes and this call in
    /// one transaction (see [`IndexStore::write_build`]).
    fn upsert_file_row(&self, tx: &rusqlite::Transaction<'_>, handle: &ArchiveHandle) -> Result<i64> {
        tx.execute(
            "DELETE FROM checkpoints WHERE file_id IN (SELECT id FROM files WHERE logical_name = ?1)",
            params![handle.logical_name],
        )?;
        tx.execute(
            "DELETE FROM metadata WHERE file_id IN (SELECT id FROM files WHERE logical_name = ?1)",
            params![handle.logical_name],
        )?;
        tx.execute(
            "DELETE FROM tar_members WHERE file_id IN (SELECT id FROM files WHERE logical_name = ?1)",
            params![handle.logical_name],
        )?;
        tx.execute(
            "DELETE FROM files WHERE logical_name = ?1",
            params![handle.logical_name],
        )?;

        let mtime_unix_nanos = handle
            .mtime
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        tx.execute(
            "INSERT INTO files (logical_name, byte_size, mtime_unix_nanos, sha256, archive_kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                handle.logical_name,
                handle.byte_size as i64,
                mtime_unix_nanos,
                handle.sha256.to_vec(),
                handle.kind as i64,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    /// Write a complete build result inside a single transaction (§4.2:
    /// "All writes happen inside a single transaction per build").
    pub fn write_build(
        &mut self,
        handle: &ArchiveHandle,
        checkpoints: &[CheckpointRecord],
        tar_members: &[TarMemberRecord],
        metadata: IndexMetadata,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        let file_id = self.upsert_file_row(&tx, handle)?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO checkpoints
                 (file_id, checkpoint_idx, uc_offset, uc_size, c_offset, c_size, bits, dict_compressed, num_lines)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for cp in checkpoints {
                stmt.execute(params![
                    file_id,
                    cp.checkpoint_idx as i64,
                    cp.uc_offset as i64,
                    cp.uc_size as i64,
                    cp.c_offset as i64,
                    cp.c_size as i64,
                    cp.bits as i64,
                    cp.dict_compressed,
                    cp.num_lines as i64,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO tar_members (file_id, member_idx, name, uc_start, uc_size, header_uc_offset)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for member in tar_members {
                stmt.execute(params![
                    file_id,
                    member.member_idx as i64,
                    member.name,
                    member.uc_start as i64,
                    member.uc_size as i64,
                    member.header_uc_offset as i64,
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO metadata (file_id, checkpoint_size, total_lines, total_uc_size)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                file_id,
                metadata.checkpoint_size as i64,
                metadata.total_lines as i64,
                metadata.total_uc_size as i64,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn file_id(&self, logical_name: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT id FROM files WHERE logical_name = ?1",
                params![logical_name],
                |r| r.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    CrateError::CorruptIndex(format!("no index row for {logical_name}"))
                }
                other => CrateError::Store(other),
            })
    }

    pub fn metadata(&self, logical_name: &str) -> Result<IndexMetadata> {
        let file_id = self.file_id(logical_name)?;
        self.conn
            .query_row(
                "SELECT checkpoint_size, total_lines, total_uc_size FROM metadata WHERE file_id = ?1",
                params![file_id],
                |r| {
                    Ok(IndexMetadata {
                        checkpoint_size: r.get::<_, i64>(0)? as u64,
                        total_lines: r.get::<_, i64>(1)? as u64,
                        total_uc_size: r.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .map_err(CrateError::from)
    }

    /// All checkpoint rows for this archive, ordered by `checkpoint_idx`
    /// (equivalently `uc_offset`, since checkpoints are contiguous).
    pub fn checkpoints(&self, logical_name: &str) -> Result<Vec<CheckpointRecord>> {
        let file_id = self.file_id(logical_name)?;
        let mut stmt = self.conn.prepare(
            "SELECT checkpoint_idx, uc_offset, uc_size, c_offset, c_size, bits, dict_compressed, num_lines
             FROM checkpoints WHERE file_id = ?1 ORDER BY checkpoint_idx ASC",
        )?;
        let rows = stmt
            .query_map(params![file_id], |r| {
                Ok(CheckpointRecord {
                    checkpoint_idx: r.get::<_, i64>(0)? as u64,
                    uc_offset: r.get::<_, i64>(1)? as u64,
                    uc_size: r.get::<_, i64>(2)? as u64,
                    c_offset: r.get::<_, i64>(3)? as u64,
                    c_size: r.get::<_, i64>(4)? as u64,
                    bits: r.get::<_, i64>(5)? as u8,
                    dict_compressed: r.get(6)?,
                    num_lines: r.get::<_, i64>(7)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn tar_members(&self, logical_name: &str) -> Result<Vec<TarMemberRecord>> {
        let file_id = self.file_id(logical_name)?;
        let mut stmt = self.conn.prepare(
            "SELECT member_idx, name, uc_start, uc_size, header_uc_offset
             FROM tar_members WHERE file_id = ?1 ORDER BY member_idx ASC",
        )?;
        let rows = stmt
            .query_map(params![file_id], |r| {
                Ok(TarMemberRecord {
                    member_idx: r.get::<_, i64>(0)? as u64,
                    name: r.get(1)?,
                    uc_start: r.get::<_, i64>(2)? as u64,
                    uc_size: r.get::<_, i64>(3)? as u64,
                    header_uc_offset: r.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveKind;

    fn handle(name: &str, sha: [u8; 32]) -> ArchiveHandle {
        ArchiveHandle {
            path: name.into(),
            logical_name: name.to_string(),
            byte_size: 1234,
            mtime: std::time::SystemTime::now(),
            sha256: sha,
            kind: ArchiveKind::Gzip,
        }
    }

    #[test]
    fn write_and_read_back_round_trip() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let h = handle("a.gz", [1u8; 32]);
        let checkpoints = vec![CheckpointRecord {
            checkpoint_idx: 0,
            uc_offset: 1024,
            uc_size: 2048,
            c_offset: 10,
            c_size: 20,
            bits: 3,
            dict_compressed: vec![9, 9, 9],
            num_lines: 5,
        }];
        store
            .write_build(
                &h,
                &checkpoints,
                &[],
                IndexMetadata {
                    checkpoint_size: 1024,
                    total_lines: 5,
                    total_uc_size: 3072,
                },
            )
            .unwrap();

        assert_eq!(store.checkpoints("a.gz").unwrap(), checkpoints);
        assert_eq!(store.valid_file_id(&h).unwrap(), Some(1));

        let mut tampered = h.clone();
        tampered.sha256 = [2u8; 32];
        assert_eq!(store.valid_file_id(&tampered).unwrap(), None);
    }

    #[test]
    fn rebuild_replaces_prior_rows() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let h = handle("b.gz", [3u8; 32]);
        store
            .write_build(
                &h,
                &[CheckpointRecord {
                    checkpoint_idx: 0,
                    uc_offset: 10,
                    uc_size: 10,
                    c_offset: 1,
                    c_size: 1,
                    bits: 0,
                    dict_compressed: vec![],
                    num_lines: 0,
                }],
                &[],
                IndexMetadata {
                    checkpoint_size: 10,
                    total_lines: 0,
                    total_uc_size: 10,
                },
            )
            .unwrap();
        store
            .write_build(&h, &[], &[], IndexMetadata {
                checkpoint_size: 10,
                total_lines: 0,
                total_uc_size: 0,
            })
            .unwrap();
        assert!(store.checkpoints("b.gz").unwrap().is_empty());
    }
}
