// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Execution contexts (§4.7): a single capability, `parallel_for`, with
//! three variants sharing one exception policy — the first per-element
//! failure is captured, every other invocation still runs, and the
//! failure is re-raised once all of them complete.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{CrateError, Result};

/// `body(i)` is invoked once per `i ∈ [0, N)`; implementations differ only
/// in how that fan-out is scheduled.
pub trait ExecutionContext: Send + Sync {
    /// Degree of parallelism this context will actually use for a given
    /// `parallel_for` (informational; used by `MapPartitions` to size
    /// partitions).
    fn parallel_width(&self) -> usize;

    /// This context's rank in a distributed run, `0` otherwise.
    fn world_rank(&self) -> usize {
        0
    }

    /// Total rank count in a distributed run, `1` otherwise.
    fn world_size(&self) -> usize {
        1
    }

    fn parallel_for(&self, n: usize, body: &(dyn Fn(usize) -> Result<()> + Send + Sync)) -> Result<()>;
}

/// Direct loop on the calling thread (§4.7).
#[derive(Debug, Default)]
pub struct Sequential;

impl ExecutionContext for Sequential {
    fn parallel_width(&self) -> usize {
        1
    }

    fn parallel_for(&self, n: usize, body: &(dyn Fn(usize) -> Result<()> + Send + Sync)) -> Result<()> {
        let mut first_error: Option<CrateError> = None;
        for i in 0..n {
            if let Err(e) = body(i) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(CrateError::Execution(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Worker count for [`Threaded`] (§6).
#[derive(Debug, Clone, Copy)]
pub struct ThreadedOptions {
    /// `0` means hardware concurrency via `num_cpus::get()`.
    pub num_threads: usize,
}

impl Default for ThreadedOptions {
    fn default() -> Self {
        Self { num_threads: 0 }
    }
}

/// A fixed-size worker pool sharing a `parking_lot`-guarded job queue and a
/// count-down barrier (§4.7, §9: "blocking job queue with a count-down
/// barrier"), using the same `Mutex`/`Condvar` pair this crate already
/// relies on elsewhere.
pub struct Threaded {
    num_threads: usize,
}

impl Threaded {
    pub fn new(options: ThreadedOptions) -> Self {
        let num_threads = if options.num_threads == 0 {
            num_cpus::get()
        } else {
            options.num_threads
        };
        Self { num_threads }
    }
}

impl Default for Threaded {
    fn default() -> Self {
        Self::new(ThreadedOptions::default())
    }
}

impl ExecutionContext for Threaded {
    fn parallel_width(&self) -> usize {
        self.num_threads
    }

    fn parallel_for(&self, n: usize, body: &(dyn Fn(usize) -> Result<()> + Send + Sync)) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let workers = self.num_threads.max(1).min(n);

        let queue = Mutex::new((0..n).collect::<VecDeque<usize>>());
        let remaining = Mutex::new(n);
        let done = Condvar::new();
        let first_error: Mutex<Option<CrateError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().pop_front();
                    let Some(i) = next else { break };

                    if let Err(e) = body(i) {
                        let mut guard = first_error.lock();
                        if guard.is_none() {
                            *guard = Some(e);
                        }
                    }

                    let mut remaining = remaining.lock();
                    *remaining -= 1;
                    if *remaining == 0 {
                        done.notify_all();
                    }
                });
            }

            let mut remaining = remaining.lock();
            done.wait_while(&mut remaining, |r| *r > 0);
        });

        match first_error.into_inner() {
            Some(e) => Err(CrateError::Execution(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Collective operations a distributed transport must provide (§4.7). This
/// is the abstract collective layer an MPI-style context sits behind; a
/// real multi-process transport is an external collaborator out of scope
/// here.
pub trait CollectiveTransport: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
}

/// An in-process transport for tests: `size` simulated ranks run as
/// threads within this one process instead of separate processes.
pub struct LocalRanks {
    size: usize,
}

impl LocalRanks {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl CollectiveTransport for LocalRanks {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {}
}

/// Shards `[0, N)` across `transport.size()` simulated ranks, each further
/// sharded by `inner`, then completes with a collective barrier (§4.7).
pub struct Distributed<T: CollectiveTransport> {
    transport: T,
    inner: Arc<dyn ExecutionContext>,
}

impl<T: CollectiveTransport> Distributed<T> {
    pub fn new(transport: T, inner: Arc<dyn ExecutionContext>) -> Self {
        Self { transport, inner }
    }
}

impl<T: CollectiveTransport> ExecutionContext for Distributed<T> {
    fn parallel_width(&self) -> usize {
        self.inner.parallel_width() * self.transport.size()
    }

    fn world_rank(&self) -> usize {
        self.transport.rank()
    }

    fn world_size(&self) -> usize {
        self.transport.size()
    }

    fn parallel_for(&self, n: usize, body: &(dyn Fn(usize) -> Result<()> + Send + Sync)) -> Result<()> {
        let size = self.transport.size();
        let first_error: Mutex<Option<CrateError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            for rank in 0..size {
                let inner = &self.inner;
                handles.push(scope.spawn(move || {
                    let per_rank = n.div_ceil(size);
                    let start = rank * per_rank;
                    let end = (start + per_rank).min(n);
                    let local_n = end.saturating_sub(start);
                    inner.parallel_for(local_n, &|i| body(start + i))
                }));
            }
            for handle in handles {
                if let Err(e) = handle.join().expect("rank thread panicked") {
                    let mut guard = first_error.lock();
                    if guard.is_none() {
                        *guard = Some(e);
                    }
                }
            }
        });

        self.transport.barrier();

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sequential_visits_every_index() {
        let seen = AtomicUsize::new(0);
        Sequential.parallel_for(10, &|_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn threaded_visits_every_index_exactly_once() {
        let seen: Vec<_> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
        let ctx = Threaded::new(ThreadedOptions { num_threads: 4 });
        ctx.parallel_for(seen.len(), &|i| {
            seen[i].fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn threaded_continues_past_first_failure() {
        let seen = AtomicUsize::new(0);
        let ctx = Threaded::new(ThreadedOptions { num_threads: 4 });
        let result = ctx.parallel_for(100, &|i| {
            seen.fetch_add(1, Ordering::SeqCst);
            if i == 50 {
                Err(CrateError::Execution("boom".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn distributed_covers_all_indices_across_simulated_ranks() {
        let seen: Vec<_> = (0..97).map(|_| AtomicUsize::new(0)).collect();
        let ctx = Distributed::new(LocalRanks::new(4), Arc::new(Sequential));
        ctx.parallel_for(seen.len(), &|i| {
            seen[i].fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }
}
