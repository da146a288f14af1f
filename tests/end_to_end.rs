// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! End-to-end scenarios (§8): small round-trip, multi-checkpoint,
//! line extension, stale index, filter determinism, repartition
//! conservation.

use std::collections::HashMap;
use std::io::Write;

use trace_vault::archive::ArchiveHandle;
use trace_vault::index::{build_index, IndexerOptions};
use trace_vault::pipeline::{Driver, ElementBuffer, HashFn, NodeOutput, Plan, Sequential, Threaded, ThreadedOptions};
use trace_vault::reader::{Reader, ReaderOptions};

fn gzip_to(path: &std::path::Path, bytes: &[u8]) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap();
}

fn open_reader(dir: &std::path::Path, name: &str, bytes: &[u8], checkpoint_size: u64) -> Reader {
    let path = dir.join(name);
    gzip_to(&path, bytes);
    let handle = ArchiveHandle::open(&path).unwrap();
    let store = build_index(
        &handle,
        &IndexerOptions {
            checkpoint_size,
            ..Default::default()
        },
    )
    .unwrap();
    Reader::from_store(handle, store, ReaderOptions::default()).unwrap()
}

#[test]
fn small_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = open_reader(dir.path(), "small.gz", b"alpha\nbeta\ngamma\n", 32 * 1024 * 1024);

    assert_eq!(reader.get_num_lines(), 3);
    assert_eq!(reader.get_max_bytes(), 17);
    assert_eq!(reader.read_lines(1, 3).unwrap(), b"beta\ngamma\n");
    assert_eq!(reader.read(6, 10).unwrap(), b"beta");
}

#[test]
fn multi_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = b"0123456789abcdef";
    let mut data = Vec::with_capacity(4 * 1024 * 1024);
    while data.len() < 4 * 1024 * 1024 {
        data.extend_from_slice(pattern);
    }

    let path = dir.path().join("pattern.gz");
    gzip_to(&path, &data);
    let handle = ArchiveHandle::open(&path).unwrap();
    let store = build_index(
        &handle,
        &IndexerOptions {
            checkpoint_size: 1024 * 1024,
            ..Default::default()
        },
    )
    .unwrap();
    let checkpoints_first = store.checkpoints(&handle.logical_name).unwrap();
    assert!(checkpoints_first.len() >= 3);

    let mut reader = Reader::from_store(handle.clone(), store, ReaderOptions::default()).unwrap();
    let start = 1024 * 1024 - 16;
    let end = start + 32;
    let got = reader.read(start, end).unwrap();
    assert_eq!(got, &data[start as usize..end as usize]);

    // Rebuilding from scratch yields the same checkpoint count.
    let store2 = build_index(
        &handle,
        &IndexerOptions {
            checkpoint_size: 1024 * 1024,
            force_rebuild: true,
            ..Default::default()
        },
    )
    .unwrap();
    let checkpoints_second = store2.checkpoints(&handle.logical_name).unwrap();
    assert_eq!(checkpoints_first.len(), checkpoints_second.len());
}

#[test]
fn line_extension() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = open_reader(dir.path(), "lines.gz", b"aaa\nbbb\nccc\n", 32 * 1024 * 1024);
    assert_eq!(reader.read_line_bytes(5, 6).unwrap(), b"bbb\n");
}

#[test]
fn stale_index_is_rebuilt_on_content_change_but_not_on_mtime_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stale.gz");
    gzip_to(&path, b"one\ntwo\nthree\n");

    let handle = ArchiveHandle::open(&path).unwrap();
    let store1 = build_index(&handle, &IndexerOptions::default()).unwrap();
    let metadata1 = store1.metadata(&handle.logical_name).unwrap();
    assert_eq!(metadata1.total_lines, 3);

    // Touching mtime without changing bytes must not be treated as stale:
    // sha256 is the validity fingerprint, not mtime.
    std::fs::File::open(&path).unwrap().set_modified(std::time::SystemTime::now()).unwrap();
    let handle_same = ArchiveHandle::open(&path).unwrap();
    assert_eq!(handle_same.sha256, handle.sha256);
    let store1b = build_index(&handle_same, &IndexerOptions::default()).unwrap();
    let metadata1b = store1b.metadata(&handle_same.logical_name).unwrap();
    assert_eq!(metadata1b.total_lines, metadata1.total_lines);

    // Changing the bytes must force a rebuild with new totals.
    gzip_to(&path, b"one\ntwo\nthree\nfour\nfive\n");
    let handle2 = ArchiveHandle::open(&path).unwrap();
    assert_ne!(handle2.sha256, handle.sha256);
    let store2 = build_index(&handle2, &IndexerOptions::default()).unwrap();
    let metadata2 = store2.metadata(&handle2.logical_name).unwrap();
    assert_eq!(metadata2.total_lines, 5);
}

fn int_source(n: u32) -> (Plan, usize, ElementBuffer) {
    let mut plan = Plan::new();
    let src = plan.add_source(4).unwrap();
    let buffer = ElementBuffer::from_elements(&(0..n).collect::<Vec<_>>(), 4, |v, out| out.copy_from_slice(&v.to_le_bytes())).unwrap();
    (plan, src, buffer)
}

#[test]
fn filter_determinism_sequential_vs_threaded() {
    let (mut plan, src, buffer) = int_source(1_000_000);
    let divisible_by_three = plan
        .add_filter(src, 4, Box::new(|e| Ok(u32::from_le_bytes(e.try_into().unwrap()) % 3 == 0)))
        .unwrap();
    plan.validate(&[divisible_by_three]).unwrap();

    let run = |ctx: &dyn trace_vault::pipeline::ExecutionContext| -> Vec<u32> {
        let outputs = Driver::run_with_sources(&plan, ctx, HashMap::from([(src, buffer.clone())])).unwrap();
        let NodeOutput::Buffer(result) = outputs.get(&divisible_by_three).unwrap().clone() else {
            panic!("expected a plain buffer");
        };
        result.as_bytes().chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect()
    };

    let sequential = run(&Sequential);
    let threaded = run(&Threaded::new(ThreadedOptions { num_threads: 8 }));

    assert_eq!(sequential.len(), 333_334);
    assert_eq!(sequential, threaded);
    assert!(sequential.iter().enumerate().all(|(i, &v)| v == (i as u32) * 3));
}

#[test]
fn repartition_conservation_and_determinism() {
    let (mut plan, src, buffer) = int_source(1_000_000);
    let hash_fn: HashFn = Box::new(trace_vault::pipeline::fnv1a_hash);
    let repart = plan.add_repartition_by_hash(src, 4, 8, hash_fn, None, true).unwrap();
    plan.validate(&[repart]).unwrap();

    let run_once = || -> Vec<u32> {
        let outputs = Driver::run_with_sources(&plan, &Sequential, HashMap::from([(src, buffer.clone())])).unwrap();
        let NodeOutput::Partitioned(partitioned) = outputs.get(&repart).unwrap().clone() else {
            panic!("expected a partitioned buffer");
        };
        assert_eq!(partitioned.num_partitions(), 8);
        assert_eq!(partitioned.counts.iter().sum::<usize>(), 1_000_000);
        partitioned
            .into_buffer()
            .unwrap()
            .as_bytes()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    };

    let mut first = run_once();
    let mut second = run_once();
    assert_eq!(first, second, "repartition assignment must be deterministic across runs");

    first.sort_unstable();
    second.sort_unstable();
    let expected: Vec<u32> = (0..1_000_000).collect();
    assert_eq!(first, expected, "repartition must conserve the input multiset");
}
