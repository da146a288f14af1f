// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Typed element buffers (§3, §4.6): a shared byte buffer plus a fixed
//! element stride. Reference counting across the DAG (§4.9, "buffer is
//! reference-counted and released when the last child consumes it") is
//! `Arc`'s ordinary job — no manual refcount bookkeeping is needed.

use std::sync::Arc;

use crate::error::{CrateError, Result};

/// An immutable, shared, fixed-stride run of elements.
#[derive(Clone)]
pub struct ElementBuffer {
    data: Arc<Vec<u8>>,
    elem_size: usize,
}

impl ElementBuffer {
    /// Wrap `data` as a buffer of `elem_size`-byte elements. `elem_size ==
    /// 0` or a length not a multiple of it is `InvalidArgument`.
    pub fn new(data: Vec<u8>, elem_size: usize) -> Result<Self> {
        if elem_size == 0 {
            return Err(CrateError::InvalidArgument("elem_size must be non-zero".into()));
        }
        if data.len() % elem_size != 0 {
            return Err(CrateError::InvalidArgument(format!(
                "buffer of {} bytes is not a multiple of elem_size {elem_size}",
                data.len()
            )));
        }
        Ok(Self {
            data: Arc::new(data),
            elem_size,
        })
    }

    pub fn empty(elem_size: usize) -> Result<Self> {
        Self::new(Vec::new(), elem_size)
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.elem_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The byte slice for element `i`.
    pub fn element(&self, i: usize) -> &[u8] {
        let start = i * self.elem_size;
        &self.data[start..start + self.elem_size]
    }

    /// Build a buffer of typed values, one `elem_size`-byte record per
    /// item, via a per-element writer. A thin convenience over
    /// [`ElementBuffer::new`] for sources constructed in Rust rather than
    /// read off the wire.
    pub fn from_elements<T>(items: &[T], elem_size: usize, write: impl Fn(&T, &mut [u8])) -> Result<Self> {
        let mut data = vec![0u8; items.len() * elem_size];
        for (i, item) in items.iter().enumerate() {
            write(item, &mut data[i * elem_size..(i + 1) * elem_size]);
        }
        Self::new(data, elem_size)
    }
}

/// Output of a [`super::engines::repartition`] pass (§4.8): one packed byte
/// buffer plus per-partition byte offsets and element counts.
#[derive(Clone)]
pub struct PartitionedBuffer {
    data: Arc<Vec<u8>>,
    elem_size: usize,
    pub offsets: Vec<usize>,
    pub counts: Vec<usize>,
}

impl PartitionedBuffer {
    pub fn num_partitions(&self) -> usize {
        self.counts.len()
    }

    pub fn partition(&self, i: usize) -> &[u8] {
        let start = self.offsets[i];
        let len = self.counts[i] * self.elem_size;
        &self.data[start..start + len]
    }

    /// Flatten back into an ordinary buffer (partition order, each
    /// partition's elements in the order the engine wrote them).
    pub fn into_buffer(self) -> Result<ElementBuffer> {
        ElementBuffer::new((*self.data).clone(), self.elem_size)
    }

    pub(crate) fn from_parts(data: Vec<u8>, elem_size: usize, offsets: Vec<usize>, counts: Vec<usize>) -> Self {
        Self {
            data: Arc::new(data),
            elem_size,
            offsets,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_misaligned_length() {
        assert!(ElementBuffer::new(vec![0u8; 7], 4).is_err());
    }

    #[test]
    fn element_slices_are_stride_aligned() {
        let buf = ElementBuffer::new(vec![1, 2, 3, 4, 5, 6], 2).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.element(1), &[3, 4]);
    }
}
