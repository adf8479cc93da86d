//! Array growth benchmarks
//!
//! Measures fast-mode push throughput, the cost of general-mode element
//! writes, and how cheaply objects with a shared history reuse structure
//! transitions.
//!
//! Run with: `cargo bench -p conch-core array_push`

use std::hint::black_box;

use conch_core::array;
use conch_core::{Context, PropertyName, Value};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

fn push_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_push");
    let mut ctx = Context::new();

    for count in [1_000u32, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("fast_mode", count), &count, |b, &n| {
            b.iter(|| {
                let object = ctx.new_array(0);
                for i in 0..n {
                    array::push(&mut ctx, object, Value::int32(i as i32)).unwrap();
                }
                black_box(object);
                ctx.collect_garbage();
            });
        });

        group.bench_with_input(BenchmarkId::new("general_mode", count), &count, |b, &n| {
            b.iter(|| {
                let object = ctx.new_array(0);
                array::convert_into_non_fast_mode(object, "benchmark");
                for i in 0..n {
                    object
                        .set_property(&mut ctx, &PropertyName::Index(i), Value::int32(i as i32))
                        .unwrap();
                }
                black_box(object);
                ctx.collect_garbage();
            });
        });
    }
    group.finish();
}

fn transition_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("structure_transition");
    let mut ctx = Context::new();
    let names: Vec<PropertyName> = (0..16).map(|i| ctx.name(&format!("p{i}"))).collect();

    for width in [4usize, 16] {
        group.bench_with_input(BenchmarkId::new("shared_history", width), &width, |b, &w| {
            b.iter(|| {
                for _ in 0..1_000 {
                    let object = ctx.new_plain_object();
                    for name in &names[..w] {
                        object.set_property(&mut ctx, name, Value::int32(1)).unwrap();
                    }
                    black_box(object);
                }
                ctx.collect_garbage();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, push_benchmark, transition_benchmark);
criterion_main!(benches);
