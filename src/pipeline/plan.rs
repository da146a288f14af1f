// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The operator DAG (§4.9): an arena of nodes indexed by small integers,
//! appended in topological order by construction (a node can only name
//! parents that already exist, so parent IDs are always less than the
//! child's).

use crate::error::{CrateError, Result};

use super::operator::{FilterFn, FlatMapFn, HashFn, MapFn, MapPartitionsFn, OperatorKind, FNV_OFFSET_BASIS};

pub struct Node {
    pub id: usize,
    pub parents: Vec<usize>,
    pub op: OperatorKind,
}

/// A plan under construction. Nodes are appended, never removed or
/// reordered — `Node::id` is always the node's index in `nodes`.
#[derive(Default)]
pub struct Plan {
    nodes: Vec<Node>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn parent_output_size(&self, parent: usize) -> Result<usize> {
        let node = self
            .nodes
            .get(parent)
            .ok_or_else(|| CrateError::Validation(format!("unknown parent node {parent}")))?;
        node.op
            .output_size()
            .ok_or_else(|| CrateError::Validation(format!("parent node {parent} ({}) has no usable output", node.op.name())))
    }

    fn push(&mut self, parents: Vec<usize>, op: OperatorKind) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node { id, parents, op });
        id
    }

    pub fn add_source(&mut self, elem_size: usize) -> Result<usize> {
        if elem_size == 0 {
            return Err(CrateError::InvalidArgument("elem_size must be non-zero".into()));
        }
        Ok(self.push(Vec::new(), OperatorKind::Source { elem_size }))
    }

    pub fn add_map(&mut self, parent: usize, in_size: usize, out_size: usize, f: MapFn) -> Result<usize> {
        self.check_input_size(parent, in_size)?;
        Ok(self.push(vec![parent], OperatorKind::Map { in_size, out_size, f }))
    }

    pub fn add_filter(&mut self, parent: usize, elem_size: usize, pred: FilterFn) -> Result<usize> {
        self.check_input_size(parent, elem_size)?;
        Ok(self.push(vec![parent], OperatorKind::Filter { elem_size, pred }))
    }

    pub fn add_flatmap(&mut self, parent: usize, in_size: usize, out_size: usize, f: FlatMapFn) -> Result<usize> {
        self.check_input_size(parent, in_size)?;
        Ok(self.push(vec![parent], OperatorKind::FlatMap { in_size, out_size, f }))
    }

    pub fn add_map_partitions(&mut self, parent: usize, in_size: usize, out_size: usize, f: MapPartitionsFn) -> Result<usize> {
        self.check_input_size(parent, in_size)?;
        Ok(self.push(vec![parent], OperatorKind::MapPartitions { in_size, out_size, f }))
    }

    pub fn add_repartition_by_hash(
        &mut self,
        parent: usize,
        elem_size: usize,
        num_partitions: usize,
        hash_fn: HashFn,
        seed: Option<u64>,
        stable: bool,
    ) -> Result<usize> {
        self.check_input_size(parent, elem_size)?;
        if num_partitions == 0 {
            return Err(CrateError::InvalidArgument("num_partitions must be non-zero".into()));
        }
        Ok(self.push(
            vec![parent],
            OperatorKind::RepartitionByHash {
                elem_size,
                num_partitions,
                hash_fn,
                seed: seed.unwrap_or(FNV_OFFSET_BASIS),
                stable,
            },
        ))
    }

    fn check_input_size(&self, parent: usize, expected: usize) -> Result<()> {
        let actual = self.parent_output_size(parent)?;
        if actual != expected {
            return Err(CrateError::TypeMismatch(format!(
                "node declares {expected}-byte input but parent {parent} produces {actual}-byte elements"
            )));
        }
        Ok(())
    }

    /// Validate the plan's structural invariants (§4.9): parent IDs precede
    /// their children (guaranteed by construction), every non-source node
    /// has a parent (guaranteed by construction), and every node is an
    /// ancestor of at least one of `terminals`.
    pub fn validate(&self, terminals: &[usize]) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(CrateError::Validation("plan is empty".into()));
        }
        for &t in terminals {
            if self.nodes.get(t).is_none() {
                return Err(CrateError::Validation(format!("unknown terminal node {t}")));
            }
        }

        let mut reachable = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = terminals.to_vec();
        while let Some(id) = stack.pop() {
            if reachable[id] {
                continue;
            }
            reachable[id] = true;
            for &parent in &self.nodes[id].parents {
                stack.push(parent);
            }
        }

        if let Some(id) = reachable.iter().position(|&r| !r) {
            return Err(CrateError::Validation(format!(
                "node {id} is not an ancestor of any designated terminal"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_element_size_mismatch_at_construction() {
        let mut plan = Plan::new();
        let src = plan.add_source(4).unwrap();
        let f: MapFn = Box::new(|_, _| Ok(()));
        assert!(plan.add_map(src, 8, 4, f).is_err());
    }

    #[test]
    fn validate_rejects_unreachable_nodes() {
        let mut plan = Plan::new();
        let src = plan.add_source(4).unwrap();
        let f: MapFn = Box::new(|i, o| {
            o.copy_from_slice(i);
            Ok(())
        });
        let mapped = plan.add_map(src, 4, 4, f).unwrap();
        let _unused_branch = plan.add_source(4).unwrap();
        assert!(plan.validate(&[mapped]).is_err());
    }

    #[test]
    fn validate_accepts_a_linear_chain() {
        let mut plan = Plan::new();
        let src = plan.add_source(4).unwrap();
        let f: MapFn = Box::new(|i, o| {
            o.copy_from_slice(i);
            Ok(())
        });
        let mapped = plan.add_map(src, 4, 4, f).unwrap();
        assert!(plan.validate(&[mapped]).is_ok());
    }
}
