// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Operator laws (§8): map composition, filter identity/annihilation,
//! flatmap identity, repartition conservation/stability, and
//! sequential/parallel equivalence.

use std::collections::HashMap;

use quickcheck_macros::quickcheck;

use trace_vault::pipeline::{Driver, ElementBuffer, FilterFn, HashFn, MapFn, NodeOutput, Plan, Sequential, Threaded, ThreadedOptions};

fn source_buffer(values: &[i32]) -> ElementBuffer {
    ElementBuffer::from_elements(values, 4, |v, out| out.copy_from_slice(&v.to_le_bytes())).unwrap()
}

fn run_to_vec(plan: &Plan, ctx: &dyn trace_vault::pipeline::ExecutionContext, src: usize, buffer: ElementBuffer, terminal: usize) -> Vec<i32> {
    let outputs = Driver::run_with_sources(plan, ctx, HashMap::from([(src, buffer)])).unwrap();
    let NodeOutput::Buffer(result) = outputs.get(&terminal).unwrap().clone() else {
        panic!("expected a plain buffer");
    };
    result.as_bytes().chunks_exact(4).map(|c| i32::from_le_bytes(c.try_into().unwrap())).collect()
}

#[quickcheck]
fn map_composition_matches_single_composed_map(values: Vec<i32>) -> bool {
    let add_one: MapFn = Box::new(|i, o| {
        o.copy_from_slice(&(i32::from_le_bytes(i.try_into().unwrap()).wrapping_add(1)).to_le_bytes());
        Ok(())
    });
    let double: MapFn = Box::new(|i, o| {
        o.copy_from_slice(&(i32::from_le_bytes(i.try_into().unwrap()).wrapping_mul(2)).to_le_bytes());
        Ok(())
    });
    let composed: MapFn = Box::new(|i, o| {
        let v = i32::from_le_bytes(i.try_into().unwrap());
        o.copy_from_slice(&((v.wrapping_add(1)).wrapping_mul(2)).to_le_bytes());
        Ok(())
    });

    let mut two_stage_plan = Plan::new();
    let src1 = two_stage_plan.add_source(4).unwrap();
    let stage1 = two_stage_plan.add_map(src1, 4, 4, add_one).unwrap();
    let stage2 = two_stage_plan.add_map(stage1, 4, 4, double).unwrap();
    two_stage_plan.validate(&[stage2]).unwrap();

    let mut one_stage_plan = Plan::new();
    let src2 = one_stage_plan.add_source(4).unwrap();
    let fused = one_stage_plan.add_map(src2, 4, 4, composed).unwrap();
    one_stage_plan.validate(&[fused]).unwrap();

    let two_stage = run_to_vec(&two_stage_plan, &Sequential, src1, source_buffer(&values), stage2);
    let one_stage = run_to_vec(&one_stage_plan, &Sequential, src2, source_buffer(&values), fused);
    two_stage == one_stage
}

#[quickcheck]
fn filter_always_true_is_identity(values: Vec<i32>) -> bool {
    let mut plan = Plan::new();
    let src = plan.add_source(4).unwrap();
    let always_true: FilterFn = Box::new(|_| Ok(true));
    let filtered = plan.add_filter(src, 4, always_true).unwrap();
    plan.validate(&[filtered]).unwrap();

    run_to_vec(&plan, &Sequential, src, source_buffer(&values), filtered) == values
}

#[quickcheck]
fn filter_always_false_is_empty(values: Vec<i32>) -> bool {
    let mut plan = Plan::new();
    let src = plan.add_source(4).unwrap();
    let always_false: FilterFn = Box::new(|_| Ok(false));
    let filtered = plan.add_filter(src, 4, always_false).unwrap();
    plan.validate(&[filtered]).unwrap();

    run_to_vec(&plan, &Sequential, src, source_buffer(&values), filtered).is_empty()
}

#[quickcheck]
fn flatmap_singleton_is_identity(values: Vec<i32>) -> bool {
    let mut plan = Plan::new();
    let src = plan.add_source(4).unwrap();
    let singleton = plan
        .add_flatmap(
            src,
            4,
            4,
            Box::new(|i, emit| emit(i)),
        )
        .unwrap();
    plan.validate(&[singleton]).unwrap();

    run_to_vec(&plan, &Sequential, src, source_buffer(&values), singleton) == values
}

#[quickcheck]
fn map_filter_flatmap_agree_between_sequential_and_threaded(values: Vec<i32>) -> bool {
    let mut plan = Plan::new();
    let src = plan.add_source(4).unwrap();
    let doubled = plan
        .add_map(src, 4, 4, Box::new(|i, o| {
            o.copy_from_slice(&i32::from_le_bytes(i.try_into().unwrap()).wrapping_mul(2).to_le_bytes());
            Ok(())
        }))
        .unwrap();
    let positive = plan
        .add_filter(doubled, 4, Box::new(|e| Ok(i32::from_le_bytes(e.try_into().unwrap()) >= 0)))
        .unwrap();
    let duplicated = plan
        .add_flatmap(positive, 4, 4, Box::new(|i, emit| {
            emit(i)?;
            emit(i)
        }))
        .unwrap();
    plan.validate(&[duplicated]).unwrap();

    let sequential = run_to_vec(&plan, &Sequential, src, source_buffer(&values), duplicated);
    let threaded = run_to_vec(&plan, &Threaded::new(ThreadedOptions { num_threads: 4 }), src, source_buffer(&values), duplicated);
    sequential == threaded
}

#[quickcheck]
fn repartition_conserves_the_multiset_and_is_stable(values: Vec<i32>) -> bool {
    if values.is_empty() {
        return true;
    }
    let mut plan = Plan::new();
    let src = plan.add_source(4).unwrap();
    let hash_fn: HashFn = Box::new(trace_vault::pipeline::fnv1a_hash);
    let repart = plan.add_repartition_by_hash(src, 4, 5, hash_fn, None, true).unwrap();
    plan.validate(&[repart]).unwrap();

    let outputs = Driver::run_with_sources(&plan, &Sequential, HashMap::from([(src, source_buffer(&values))])).unwrap();
    let NodeOutput::Partitioned(partitioned) = outputs.get(&repart).unwrap().clone() else {
        panic!("expected a partitioned buffer");
    };

    let mut observed: Vec<i32> = partitioned
        .into_buffer()
        .unwrap()
        .as_bytes()
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let mut expected = values;
    observed.sort_unstable();
    expected.sort_unstable();
    observed == expected
}
