// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Filter engine (§4.8): three passes — parallel predicate evaluation,
//! sequential exclusive prefix sum for stable output positions, parallel
//! scatter of kept elements.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{CrateError, Result};
use crate::pipeline::buffer::ElementBuffer;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::operator::FilterFn;

use super::SendPtr;

pub fn run(ctx: &dyn ExecutionContext, input: &ElementBuffer, elem_size: usize, pred: &FilterFn) -> Result<ElementBuffer> {
    if input.elem_size() != elem_size {
        return Err(CrateError::TypeMismatch(format!(
            "filter expects {elem_size}-byte elements, got {}",
            input.elem_size()
        )));
    }

    let n = input.len();
    let keep: Vec<AtomicU8> = (0..n).map(|_| AtomicU8::new(0)).collect();

    // Pass 1: parallel predicate evaluation.
    ctx.parallel_for(n, &|i| {
        if pred(input.element(i))? {
            keep[i].store(1, Ordering::Relaxed);
        }
        Ok(())
    })?;

    // Pass 2: sequential exclusive prefix sum, guaranteeing deterministic
    // output order regardless of how pass 1 was parallelized.
    let mut positions = vec![0usize; n];
    let mut next = 0usize;
    for i in 0..n {
        positions[i] = next;
        if keep[i].load(Ordering::Relaxed) == 1 {
            next += 1;
        }
    }
    let kept = next;

    // Pass 3: parallel scatter.
    let mut out = vec![0u8; kept * elem_size];
    {
        let out_ptr = SendPtr(out.as_mut_ptr());
        ctx.parallel_for(n, &|i| {
            if keep[i].load(Ordering::Relaxed) == 1 {
                let dst = unsafe {
                    std::slice::from_raw_parts_mut(out_ptr.0.add(positions[i] * elem_size), elem_size)
                };
                dst.copy_from_slice(input.element(i));
            }
            Ok(())
        })?;
    }

    ElementBuffer::new(out, elem_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::{Sequential, Threaded, ThreadedOptions};

    fn u32_buffer(values: &[u32]) -> ElementBuffer {
        ElementBuffer::from_elements(values, 4, |v, out| out.copy_from_slice(&v.to_le_bytes())).unwrap()
    }

    fn as_u32s(buf: &ElementBuffer) -> Vec<u32> {
        buf.as_bytes()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn keeps_stable_order_under_threaded_context() {
        let input = u32_buffer(&(0..1000).collect::<Vec<_>>());
        let pred: FilterFn = Box::new(|e| Ok(u32::from_le_bytes(e.try_into().unwrap()) % 3 == 0));

        let seq = run(&Sequential, &input, 4, &pred).unwrap();
        let threaded = run(&Threaded::new(ThreadedOptions { num_threads: 8 }), &input, 4, &pred).unwrap();

        let expected: Vec<u32> = (0..1000).step_by(3).collect();
        assert_eq!(as_u32s(&seq), expected);
        assert_eq!(as_u32s(&threaded), expected);
    }

    #[test]
    fn always_false_produces_empty_output() {
        let input = u32_buffer(&[1, 2, 3]);
        let pred: FilterFn = Box::new(|_| Ok(false));
        let out = run(&Sequential, &input, 4, &pred).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn always_true_is_identity() {
        let input = u32_buffer(&[1, 2, 3]);
        let pred: FilterFn = Box::new(|_| Ok(true));
        let out = run(&Sequential, &input, 4, &pred).unwrap();
        assert_eq!(as_u32s(&out), vec![1, 2, 3]);
    }
}
