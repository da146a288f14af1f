// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! RepartitionByHash engine (§4.8): hash each element, count per
//! partition, then scatter with per-partition write cursors.
//!
//! `stable = false` is rejected outright (`InvalidArgument`): an unstable
//! repartition's ordering is unspecified, and nothing downstream needs it,
//! so this crate simply never builds the non-deterministic variant (see
//! DESIGN.md).

use crate::error::{CrateError, Result};
use crate::pipeline::buffer::{ElementBuffer, PartitionedBuffer};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::operator::HashFn;

use super::SendPtr;

#[allow(clippy::too_many_arguments)]
pub fn run(
    ctx: &dyn ExecutionContext,
    input: &ElementBuffer,
    elem_size: usize,
    num_partitions: usize,
    hash_fn: &HashFn,
    seed: u64,
    stable: bool,
) -> Result<PartitionedBuffer> {
    if input.elem_size() != elem_size {
        return Err(CrateError::TypeMismatch(format!(
            "repartition_by_hash expects {elem_size}-byte elements, got {}",
            input.elem_size()
        )));
    }
    if num_partitions == 0 {
        return Err(CrateError::InvalidArgument("num_partitions must be non-zero".into()));
    }
    if !stable {
        return Err(CrateError::InvalidArgument(
            "repartition_by_hash requires stable_within_partition = true".into(),
        ));
    }

    let n = input.len();

    // Pass 1: parallel hash assignment, one disjoint write per element.
    let mut partition_of = vec![0usize; n];
    {
        let dst = SendPtr(partition_of.as_mut_ptr() as *mut u8);
        ctx.parallel_for(n, &|i| {
            let p = (hash_fn(input.element(i), seed) as usize) % num_partitions;
            unsafe {
                *(dst.0 as *mut usize).add(i) = p;
            }
            Ok(())
        })?;
    }

    // Pass 2: sequential counting and cursor assignment, guaranteeing
    // within-partition input order.
    let mut counts = vec![0usize; num_partitions];
    for &p in &partition_of {
        counts[p] += 1;
    }
    let mut offsets_elems = vec![0usize; num_partitions];
    let mut running = 0usize;
    for p in 0..num_partitions {
        offsets_elems[p] = running;
        running += counts[p];
    }
    let mut cursor = offsets_elems.clone();
    let mut positions = vec![0usize; n];
    for i in 0..n {
        let p = partition_of[i];
        positions[i] = cursor[p];
        cursor[p] += 1;
    }

    // Pass 3: parallel scatter.
    let mut out = vec![0u8; n * elem_size];
    {
        let out_ptr = SendPtr(out.as_mut_ptr());
        ctx.parallel_for(n, &|i| {
            let dst = unsafe {
                std::slice::from_raw_parts_mut(out_ptr.0.add(positions[i] * elem_size), elem_size)
            };
            dst.copy_from_slice(input.element(i));
            Ok(())
        })?;
    }

    let offsets_bytes = offsets_elems.iter().map(|o| o * elem_size).collect();
    Ok(PartitionedBuffer::from_parts(out, elem_size, offsets_bytes, counts))
}
