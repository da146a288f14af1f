// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Map engine (§4.8): stride-aware read, invoke, stride-aware write.
//! Output count equals input count.

use crate::error::{CrateError, Result};
use crate::pipeline::buffer::ElementBuffer;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::operator::MapFn;

use super::SendPtr;

pub fn run(ctx: &dyn ExecutionContext, input: &ElementBuffer, in_size: usize, out_size: usize, f: &MapFn) -> Result<ElementBuffer> {
    if input.elem_size() != in_size {
        return Err(CrateError::TypeMismatch(format!(
            "map expects {in_size}-byte input elements, got {}",
            input.elem_size()
        )));
    }

    let n = input.len();
    let mut out = vec![0u8; n * out_size];

    {
        // SAFETY: each worker writes to its own disjoint `out_size`-byte
        // slice, identified by its own index `i`; no two indices overlap.
        let out_ptr = SendPtr(out.as_mut_ptr());
        ctx.parallel_for(n, &|i| {
            let dst = unsafe {
                std::slice::from_raw_parts_mut(out_ptr.0.add(i * out_size), out_size)
            };
            f(input.element(i), dst)
        })?;
    }

    ElementBuffer::new(out, out_size)
}
