// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Error taxonomy for the checkpoint indexer, random-access reader, and
/// operator pipeline.
#[derive(Debug, Error)]
pub enum CrateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Never surfaced to callers: the indexer rebuilds and proceeds.
    #[error("stale index: {0}")]
    StaleIndex(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("plan validation failed: {0}")]
    Validation(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("index store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CrateError>;

impl From<std::num::TryFromIntError> for CrateError {
    fn from(e: std::num::TryFromIntError) -> Self {
        CrateError::InvalidArgument(e.to_string())
    }
}
