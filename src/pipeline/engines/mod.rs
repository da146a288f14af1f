// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Operator engines (§4.8). Each validates element-size agreement between
//! the operator and its buffers, then dispatches the per-element body
//! through an [`super::context::ExecutionContext`].

pub mod filter;
pub mod flatmap;
pub mod map;
pub mod map_partitions;
pub mod repartition;

/// A raw pointer is `!Send`/`!Sync` by default; engines use this newtype to
/// hand worker closures a pointer into a scratch buffer where the engine
/// itself guarantees each worker only touches its own disjoint slice.
#[derive(Clone, Copy)]
pub(crate) struct SendPtr(pub *mut u8);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}
