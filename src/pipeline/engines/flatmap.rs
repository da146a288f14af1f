// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! FlatMap engine (§4.8): a parallel counting pass sizes each input's
//! output run, a sequential prefix sum turns counts into offsets, then a
//! parallel write pass emits into place. Outputs of input `i` precede
//! those of input `i + 1`.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{CrateError, Result};
use crate::pipeline::buffer::ElementBuffer;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::operator::FlatMapFn;

use super::SendPtr;

pub fn run(ctx: &dyn ExecutionContext, input: &ElementBuffer, in_size: usize, out_size: usize, f: &FlatMapFn) -> Result<ElementBuffer> {
    if input.elem_size() != in_size {
        return Err(CrateError::TypeMismatch(format!(
            "flatmap expects {in_size}-byte input elements, got {}",
            input.elem_size()
        )));
    }

    let n = input.len();
    let counts: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();

    // Pass 1: counting sizing pass.
    ctx.parallel_for(n, &|i| {
        let mut count = 0usize;
        f(input.element(i), &mut |_out: &[u8]| -> Result<()> {
            count += 1;
            Ok(())
        })?;
        counts[i].store(count, Ordering::Relaxed);
        Ok(())
    })?;

    // Pass 2: sequential prefix sum.
    let mut offsets = vec![0usize; n];
    let mut next = 0usize;
    for i in 0..n {
        offsets[i] = next;
        next += counts[i].load(Ordering::Relaxed);
    }
    let total = next;

    // Pass 3: parallel write at each input's precomputed offset.
    let mut out = vec![0u8; total * out_size];
    {
        let out_ptr = SendPtr(out.as_mut_ptr());
        ctx.parallel_for(n, &|i| {
            let mut cursor = offsets[i];
            f(input.element(i), &mut |elem: &[u8]| -> Result<()> {
                if elem.len() != out_size {
                    return Err(CrateError::TypeMismatch(format!(
                        "flatmap emitted a {}-byte element, expected {out_size}",
                        elem.len()
                    )));
                }
                let dst = unsafe {
                    std::slice::from_raw_parts_mut(out_ptr.0.add(cursor * out_size), out_size)
                };
                dst.copy_from_slice(elem);
                cursor += 1;
                Ok(())
            })?;
            Ok(())
        })?;
    }

    ElementBuffer::new(out, out_size)
}
