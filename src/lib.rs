// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Checkpointed random-access reading of large gzip and tar.gz trace
//! archives, plus a typed operator dataflow pipeline over the records they
//! contain.
//!
//! The crate is split along the two subsystems the analyzer binding joins:
//! a reader (archive detection, checkpoint index, random-access decompress)
//! and a pipeline (typed element buffers, operators, execution contexts).

pub mod analyzer;
pub mod archive;
pub mod error;
pub mod index;
pub mod inflate;
pub mod pipeline;
pub mod reader;

pub use analyzer::{analyze_trace_file, AnalyzerOptions};
pub use archive::{ArchiveHandle, ArchiveKind};
pub use error::{CrateError, Result};
pub use index::{IndexerOptions, IndexMetadata};
pub use reader::{Reader, ReaderOptions};
