// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! MapPartitions engine (§4.8): divides the input into `P` contiguous
//! partitions, `P` being the context's parallel width, and runs one
//! partition function per partition with its upstream bounds and rank
//! metadata.

use parking_lot::Mutex;

use crate::error::{CrateError, Result};
use crate::pipeline::buffer::ElementBuffer;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::operator::{MapPartitionsFn, PartitionInfo};

/// Contiguous `[offset, offset + count)` element bounds of partition `p`
/// out of `num_partitions`, spreading any remainder over the first
/// partitions.
fn partition_bounds(n: usize, num_partitions: usize, p: usize) -> (usize, usize) {
    let base = n / num_partitions;
    let rem = n % num_partitions;
    let count = base + usize::from(p < rem);
    let offset = p * base + p.min(rem);
    (offset, count)
}

pub fn run(ctx: &dyn ExecutionContext, input: &ElementBuffer, in_size: usize, out_size: usize, f: &MapPartitionsFn) -> Result<ElementBuffer> {
    if input.elem_size() != in_size {
        return Err(CrateError::TypeMismatch(format!(
            "map_partitions expects {in_size}-byte input elements, got {}",
            input.elem_size()
        )));
    }

    let n = input.len();
    let partitions = ctx.parallel_width().max(1).min(n.max(1));
    let results: Vec<Mutex<Vec<u8>>> = (0..partitions).map(|_| Mutex::new(Vec::new())).collect();

    ctx.parallel_for(partitions, &|p| {
        let (offset, count) = partition_bounds(n, partitions, p);
        let slice = &input.as_bytes()[offset * in_size..(offset + count) * in_size];
        let info = PartitionInfo {
            partition_index: p,
            partitions_in_context: partitions,
            upstream_offset_elems: offset,
            upstream_count_elems: count,
            world_rank: ctx.world_rank(),
            world_size: ctx.world_size(),
        };

        let mut local_out = Vec::with_capacity(count * out_size);
        let written = f(slice, info, &mut local_out)?;
        if local_out.len() != written * out_size {
            return Err(CrateError::TypeMismatch(format!(
                "map_partitions function reported {written} elements but wrote {} bytes",
                local_out.len()
            )));
        }
        *results[p].lock() = local_out;
        Ok(())
    })?;

    let mut out = Vec::new();
    for r in results {
        out.extend(r.into_inner());
    }
    ElementBuffer::new(out, out_size)
}
