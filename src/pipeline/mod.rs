// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Typed operator dataflow pipeline (C6-C9): map/filter/flatmap/
//! map-partitions/repartition-by-hash operators over typed element
//! buffers, executed under a pluggable sequential/threaded/distributed
//! context.

pub mod buffer;
pub mod context;
pub mod driver;
pub mod engines;
pub mod operator;
pub mod plan;

pub use buffer::{ElementBuffer, PartitionedBuffer};
pub use context::{CollectiveTransport, Distributed, ExecutionContext, LocalRanks, Sequential, Threaded, ThreadedOptions};
pub use driver::{Driver, NodeOutput};
pub use operator::{fnv1a_hash, FilterFn, FlatMapFn, HashFn, MapFn, MapPartitionsFn, OperatorKind, PartitionInfo, RepartitionOptions, FNV_OFFSET_BASIS};
pub use plan::{Node, Plan};
