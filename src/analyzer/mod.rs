// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Analyzer binding (C10): wires the reader (C1-C5) and pipeline (C6-C9)
//! together for the trace-analysis use case. Intentionally thin per §4.10.

pub mod binding;
pub mod record;

pub use binding::{analyze_trace_file, read_json_lines, AnalyzerOptions, SummaryFn};
pub use record::TraceRecord;
