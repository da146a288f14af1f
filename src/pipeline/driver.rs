// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Pipeline driver (§4.9): walks a validated [`Plan`] in insertion order,
//! invoking each node's engine under a shared [`ExecutionContext`] and
//! collecting every node's output buffer.
//!
//! Buffers are `Arc`-backed ([`ElementBuffer`], [`PartitionedBuffer`]), so
//! "released when the last child consumes it" (§4.9) is just normal Rust
//! drop order once a caller stops holding a node's entry in the returned
//! map — there is no separate manual refcount to manage here.

use std::collections::HashMap;

use crate::error::{CrateError, Result};

use super::buffer::{ElementBuffer, PartitionedBuffer};
use super::context::ExecutionContext;
use super::engines::{filter, flatmap, map, map_partitions, repartition};
use super::operator::OperatorKind;
use super::plan::Plan;

/// One node's result: an ordinary buffer, or a repartitioned one (which
/// additionally carries per-partition bounds).
#[derive(Clone)]
pub enum NodeOutput {
    Buffer(ElementBuffer),
    Partitioned(PartitionedBuffer),
}

impl NodeOutput {
    /// Flatten to a plain buffer, losing partition boundaries if present —
    /// used when a downstream node consumes a repartitioned parent as
    /// ordinary input.
    fn into_buffer(self) -> Result<ElementBuffer> {
        match self {
            NodeOutput::Buffer(b) => Ok(b),
            NodeOutput::Partitioned(p) => p.into_buffer(),
        }
    }
}

pub struct Driver;

impl Driver {
    /// Run every node of `plan` under `ctx`, returning each node's output
    /// keyed by node id. Any node's failure aborts the run; no partial
    /// output is returned (§4.9, §7).
    #[tracing::instrument(level = "debug", skip_all, fields(nodes = plan.nodes().len()))]
    pub fn run(plan: &Plan, ctx: &dyn ExecutionContext) -> Result<HashMap<usize, NodeOutput>> {
        let mut outputs: HashMap<usize, NodeOutput> = HashMap::with_capacity(plan.nodes().len());

        for node in plan.nodes() {
            let result = Self::run_node(node, &outputs, ctx)?;
            outputs.insert(node.id, result);
        }

        Ok(outputs)
    }

    fn run_node(
        node: &super::plan::Node,
        outputs: &HashMap<usize, NodeOutput>,
        ctx: &dyn ExecutionContext,
    ) -> Result<NodeOutput> {
        let parent_buffer = |idx: usize| -> Result<ElementBuffer> {
            let parent_id = *node.parents.get(idx).ok_or_else(|| {
                CrateError::Validation(format!("node {} has no parent at index {idx}", node.id))
            })?;
            outputs
                .get(&parent_id)
                .cloned()
                .ok_or_else(|| CrateError::Validation(format!("parent node {parent_id} has not run yet")))?
                .into_buffer()
        };

        match &node.op {
            OperatorKind::Source { elem_size } => {
                // A source node's buffer is supplied out-of-band by the
                // caller before the run (see `Driver::run_with_sources`);
                // reaching here means the plan declared a source with no
                // data attached.
                let _ = elem_size;
                Err(CrateError::Validation(format!(
                    "source node {} has no data bound to it",
                    node.id
                )))
            }
            OperatorKind::Map { in_size, out_size, f } => {
                let input = parent_buffer(0)?;
                Ok(NodeOutput::Buffer(map::run(ctx, &input, *in_size, *out_size, f)?))
            }
            OperatorKind::Filter { elem_size, pred } => {
                let input = parent_buffer(0)?;
                Ok(NodeOutput::Buffer(filter::run(ctx, &input, *elem_size, pred)?))
            }
            OperatorKind::FlatMap { in_size, out_size, f } => {
                let input = parent_buffer(0)?;
                Ok(NodeOutput::Buffer(flatmap::run(ctx, &input, *in_size, *out_size, f)?))
            }
            OperatorKind::MapPartitions { in_size, out_size, f } => {
                let input = parent_buffer(0)?;
                Ok(NodeOutput::Buffer(map_partitions::run(ctx, &input, *in_size, *out_size, f)?))
            }
            OperatorKind::RepartitionByHash { elem_size, num_partitions, hash_fn, seed, stable } => {
                let input = parent_buffer(0)?;
                Ok(NodeOutput::Partitioned(repartition::run(
                    ctx, &input, *elem_size, *num_partitions, hash_fn, *seed, *stable,
                )?))
            }
            OperatorKind::Reduce | OperatorKind::GroupBy | OperatorKind::Sort | OperatorKind::Distinct | OperatorKind::Join => {
                Err(CrateError::Execution(format!(
                    "{} has no engine (declared but unimplemented, §4.6)",
                    node.op.name()
                )))
            }
        }
    }

    /// Like [`Driver::run`], but binds each `Source` node's buffer from
    /// `sources` (node id → buffer) before walking the plan.
    pub fn run_with_sources(
        plan: &Plan,
        ctx: &dyn ExecutionContext,
        sources: HashMap<usize, ElementBuffer>,
    ) -> Result<HashMap<usize, NodeOutput>> {
        let mut outputs: HashMap<usize, NodeOutput> = HashMap::with_capacity(plan.nodes().len());

        for node in plan.nodes() {
            let result = if let OperatorKind::Source { elem_size } = &node.op {
                let buf = sources.get(&node.id).ok_or_else(|| {
                    CrateError::Validation(format!("no source buffer bound for node {}", node.id))
                })?;
                if buf.elem_size() != *elem_size {
                    return Err(CrateError::TypeMismatch(format!(
                        "source node {} declares {elem_size}-byte elements, bound buffer has {}",
                        node.id,
                        buf.elem_size()
                    )));
                }
                NodeOutput::Buffer(buf.clone())
            } else {
                Self::run_node(node, &outputs, ctx)?
            };
            outputs.insert(node.id, result);
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::Sequential;
    use crate::pipeline::operator::{FilterFn, MapFn};

    #[test]
    fn runs_a_linear_map_filter_chain() {
        let mut plan = Plan::new();
        let src = plan.add_source(4).unwrap();
        let double: MapFn = Box::new(|i, o| {
            let v = u32::from_le_bytes(i.try_into().unwrap());
            o.copy_from_slice(&(v * 2).to_le_bytes());
            Ok(())
        });
        let mapped = plan.add_map(src, 4, 4, double).unwrap();
        let even: FilterFn = Box::new(|e| Ok(u32::from_le_bytes(e.try_into().unwrap()) % 4 == 0));
        let filtered = plan.add_filter(mapped, 4, even).unwrap();
        plan.validate(&[filtered]).unwrap();

        let source_buf = ElementBuffer::from_elements(&(0u32..10).collect::<Vec<_>>(), 4, |v, out| {
            out.copy_from_slice(&v.to_le_bytes())
        })
        .unwrap();

        let outputs = Driver::run_with_sources(&plan, &Sequential, HashMap::from([(src, source_buf)])).unwrap();
        let NodeOutput::Buffer(result) = outputs.get(&filtered).unwrap().clone() else {
            panic!("expected a plain buffer");
        };
        let values: Vec<u32> = result.as_bytes().chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
        assert_eq!(values, vec![0, 4, 8, 12, 16]);
    }
}
