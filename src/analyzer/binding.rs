// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Analyzer binding (C10, §4.10): the thin wiring between the line reader
//! (C4/C5) and the operator pipeline (C6-C9) for the trace-analysis use
//! case. Domain-specific aggregation is an external collaborator's concern
//! (§4.10's non-goal); this module only supplies the plumbing a caller's
//! combiner closure runs inside.

use std::collections::HashMap;
use std::sync::Arc;

use crate::archive::ArchiveHandle;
use crate::error::{CrateError, Result};
use crate::index::{build_index, IndexerOptions};
use crate::pipeline::{fnv1a_hash, Driver, ElementBuffer, ExecutionContext, HashFn, NodeOutput, Plan, RepartitionOptions};
use crate::reader::{Reader, ReaderOptions};

use super::record::TraceRecord;

const ELEM_SIZE: usize = std::mem::size_of::<u64>();

/// Recognized analyzer options (§6, §4.10).
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// JSON field whose value groups records before reduction.
    pub grouping_field: String,
    pub repartition: RepartitionOptions,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            grouping_field: "kind".to_string(),
            repartition: RepartitionOptions::default(),
        }
    }
}

/// Reduces one partition's records to a single summary value. Left fully
/// generic: the binding has no opinion on what "summary" means.
pub type SummaryFn = Box<dyn Fn(&[TraceRecord]) -> Result<serde_json::Value> + Send + Sync>;

/// Pull `[start_line, end_line)` through the line reader (C5) and parse
/// each line as one JSON record.
pub fn read_json_lines(reader: &mut Reader, start_line: u64, end_line: u64) -> Result<Vec<TraceRecord>> {
    let raw = reader.read_lines(start_line, end_line)?;
    let mut lines: Vec<&[u8]> = raw.split(|&b| b == b'\n').collect();
    if raw.last() == Some(&b'\n') {
        // The split on a trailing delimiter yields one extra empty slice.
        lines.pop();
    }
    lines
        .into_iter()
        .map(|line| TraceRecord::parse_line(&String::from_utf8_lossy(line)))
        .collect()
}

/// Ensure `path`'s index exists (building it if missing or stale), read
/// every line as a JSON record, repartition by `options.grouping_field`'s
/// hash, and reduce each non-empty partition with `summarize` (§4.10).
///
/// Partitions are hash buckets, not exact groups: two distinct grouping
/// values that hash into the same partition are summarized together. This
/// is the open question from §9 resolved in favor of staying thin — see
/// DESIGN.md.
pub fn analyze_trace_file(
    path: impl AsRef<std::path::Path>,
    reader_options: ReaderOptions,
    indexer_options: &IndexerOptions,
    analyzer_options: &AnalyzerOptions,
    ctx: &dyn ExecutionContext,
    summarize: SummaryFn,
) -> Result<Vec<serde_json::Value>> {
    let handle = ArchiveHandle::open(path)?;
    let store = build_index(&handle, indexer_options)?;
    let mut reader = Reader::from_store(handle, store, reader_options)?;

    let total_lines = reader.get_num_lines();
    let records = read_json_lines(&mut reader, 0, total_lines)?;
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let records = Arc::new(records);

    let mut plan = Plan::new();
    let src = plan.add_source(ELEM_SIZE)?;

    let grouping_field = analyzer_options.grouping_field.clone();
    let records_for_hash = records.clone();
    let hash_fn: HashFn = Box::new(move |bytes, seed| {
        let idx = u64::from_le_bytes(bytes.try_into().expect("repartition elements are 8 bytes")) as usize;
        let key = records_for_hash[idx].field_as_str(&grouping_field).unwrap_or_default();
        fnv1a_hash(key.as_bytes(), seed)
    });

    let num_partitions = analyzer_options.repartition.num_partitions.max(1);
    let repart = plan.add_repartition_by_hash(
        src,
        ELEM_SIZE,
        num_partitions,
        hash_fn,
        Some(analyzer_options.repartition.hash_seed),
        analyzer_options.repartition.stable_within_partition,
    )?;
    plan.validate(&[repart])?;

    let indices: Vec<u64> = (0..records.len() as u64).collect();
    let source_buf = ElementBuffer::from_elements(&indices, ELEM_SIZE, |v, out| out.copy_from_slice(&v.to_le_bytes()))?;

    let outputs = Driver::run_with_sources(&plan, ctx, HashMap::from([(src, source_buf)]))?;
    let partitioned = match outputs.get(&repart).cloned() {
        Some(NodeOutput::Partitioned(p)) => p,
        _ => return Err(CrateError::Execution("repartition node produced no partitioned output".into())),
    };

    let mut summaries = Vec::with_capacity(partitioned.num_partitions());
    for p in 0..partitioned.num_partitions() {
        let bytes = partitioned.partition(p);
        if bytes.is_empty() {
            continue;
        }
        let partition_records: Vec<TraceRecord> = bytes
            .chunks_exact(ELEM_SIZE)
            .map(|c| records[u64::from_le_bytes(c.try_into().unwrap()) as usize].clone())
            .collect();
        summaries.push(summarize(&partition_records)?);
    }
    Ok(summaries)
}
